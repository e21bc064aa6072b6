use super::bar::EstimationError;
use super::config::{ConfigError, SimulationProtocol};
use super::state::InitialState;
use crate::core::md::MdError;
use crate::core::potentials::PotentialError;
use crate::core::storage::StorageError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationPhase {
    Equilibration,
    Production,
}

impl fmt::Display for SimulationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationPhase::Equilibration => write!(f, "equilibration"),
            SimulationPhase::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Error)]
pub enum FepError {
    #[error("Non-finite coordinates after {phase} at lambda = {lambda}")]
    NumericalDivergence { phase: SimulationPhase, lambda: f64 },

    #[error("Free-energy estimation failed: {source}")]
    Estimation {
        #[from]
        source: EstimationError,
    },

    #[error("Ladder of {n_states} states requires {expected} adjacent pairs, found {found}")]
    IncompleteLadder {
        n_states: usize,
        expected: usize,
        found: usize,
    },

    #[error("Adjacent states have {left} and {right} energy components")]
    ComponentMismatch { left: usize, right: usize },

    #[error("keep index {index} is out of range for a ladder of {n_states} states")]
    InvalidKeepIndex { index: usize, n_states: usize },

    #[error("Invalid initial state: {0}")]
    InvalidState(String),

    #[error("{frames} frames but {boxes} boxes")]
    FrameCountMismatch { frames: usize, boxes: usize },

    #[error("Potential error: {source}")]
    Potential {
        #[from]
        source: PotentialError,
    },

    #[error("MD engine error: {source}")]
    Md {
        #[from]
        source: MdError,
    },

    #[error("Trajectory storage error: {source}")]
    Storage {
        #[from]
        source: StorageError,
    },

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("{mover} produced non-finite coordinates")]
    MoveDivergence { mover: &'static str },

    #[error("Invalid {mover} setup: {reason}")]
    InvalidMove { mover: &'static str, reason: String },

    #[error("Failed to render figure '{figure}': {reason}")]
    Figure { figure: &'static str, reason: String },
}

/// A failure annotated with the context needed to reproduce it.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ContextualError<C: fmt::Debug> {
    pub context: C,
    #[source]
    pub source: FepError,
}

impl<C: fmt::Debug> ContextualError<C> {
    pub fn new(context: C, source: FepError) -> Self {
        Self { context, source }
    }
}

/// Everything needed to rerun a failed estimate.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub initial_states: Vec<InitialState>,
    pub protocol: SimulationProtocol,
    pub prefix: String,
}

pub type SimulationError = ContextualError<SimulationContext>;
