//! # Core Module
//!
//! Fundamental building blocks consumed by the estimation engine.
//!
//! ## Architecture
//!
//! - **Constants** ([`constants`]) - Physical constants and unit conversions (nm, ps, kJ/mol)
//! - **Molecular State** ([`models`]) - Coordinates, velocities and periodic boxes
//! - **Potentials** ([`potentials`]) - Tagged potential-term enum and its energy/force kernels
//! - **Geometry** ([`geometry`]) - Minimum-image displacements, centroids and frame imaging
//! - **Reference Engine** ([`md`]) - Langevin integrator, Monte-Carlo barostat, stepping context
//! - **Storage** ([`storage`]) - Bounded-memory, append-only trajectory container
//!
//! The estimation layer treats everything here as a black box exposing the
//! "evaluate energy and forces, advance state" contract.

pub mod constants;
pub mod geometry;
pub mod md;
pub mod models;
pub mod potentials;
pub mod storage;
