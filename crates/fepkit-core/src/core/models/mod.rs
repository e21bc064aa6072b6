//! # Models Module
//!
//! Plain data carried between the reference engine, the movers and the sampler.
//!
//! - [`state`] - Coordinate/velocity/box triples and the frame type aliases

pub mod state;
