//! # fepkit Core Library
//!
//! Multi-state sampling and pair-BAR free-energy estimation for alchemical
//! molecular simulations.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`CoordsVelBox`), the tagged
//!   potential-term enum, periodic geometry, the reference MD engine (Langevin integrator,
//!   Monte-Carlo barostat, stepping context) and bounded-memory trajectory storage.
//!
//! - **[`engine`]: The Logic Core.** The sampler, the energy-decomposed states and their
//!   sliding window, the sequential multi-state runner, the pair-BAR estimator and the
//!   polymorphic MC/MD movers.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures that build a lambda ladder,
//!   run every window, and package a [`workflows::free_energy::SimulationResult`].

pub mod core;
pub mod engine;
pub mod workflows;
