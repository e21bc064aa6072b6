//! # Workflows Module
//!
//! Top-level entry points of fepkit. A workflow takes a description of the alchemical
//! transformation, builds the lambda ladder, drives the engine through every window and
//! packages the outcome as a [`free_energy::SimulationResult`].
//!
//! ## Architecture
//!
//! - **Free-Energy Aggregation** ([`free_energy`]) - Pair-BAR over a sampled ladder,
//!   per-component diagnostics, figures and frame imaging
//! - **Relative Free Energy** ([`relative`]) - Ladder construction from two end states,
//!   context-carrying failures and parallel independent legs

pub mod free_energy;
pub mod relative;
