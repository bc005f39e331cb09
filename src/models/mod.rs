//! Velocity distribution models.
//!
//! Models are small pure functions so the fit driver and the synthetic data
//! generator share a single forward model.

pub mod bimaxwellian;

pub use bimaxwellian::*;
