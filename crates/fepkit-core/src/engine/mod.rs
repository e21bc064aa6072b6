//! # Engine Module
//!
//! The estimation layer of fepkit: it drives sampling across a lambda ladder and turns
//! the sampled frames into free-energy differences.
//!
//! ## Overview
//!
//! Each lambda window is simulated by the [`sampler`], wrapped into an
//! [`decomposition::EnergyDecomposedState`] and compared with its predecessor to build
//! per-component reduced-energy tensors. The [`runner`] sequences this over the whole
//! ladder while the [`window`] ring buffer keeps at most two decomposed states alive.
//! The [`bar`] estimator consumes the tensors, and [`report`] renders diagnostics.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Simulation protocol, bootstrap and estimation settings
//! - **Initial States** ([`state`]) - The immutable, reproducible input of one lambda window
//! - **Sampling** ([`sampler`]) - Burn-in, strided production and bounded-memory batching
//! - **Energy Decomposition** ([`decomposition`]) - Per-term batch evaluators and `u_kln` tensors
//! - **Sliding Window** ([`window`]) - Fixed-capacity storage for decomposed states
//! - **Sequential Runner** ([`runner`]) - Ladder traversal producing work tensors
//! - **Pair-BAR** ([`bar`]) - Bennett acceptance ratio, bootstrap errors and overlap
//! - **Movers** ([`moves`]) - Composable MD and Monte-Carlo state transitions
//! - **Figures** ([`report`]) - SVG diagnostics of errors and overlaps
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - Engine error types and context-carrying failures

pub mod bar;
pub mod config;
pub mod decomposition;
pub mod error;
pub mod moves;
pub mod progress;
pub mod report;
pub mod runner;
pub mod sampler;
pub mod state;
pub mod window;
