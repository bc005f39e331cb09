//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - measured inputs (`IonSample`, `IonDistribution`, `Fit1dSummary`, `MagSeries`)
//! - fit parameters and the per-distribution output record (`FitOutput`)
//! - the status taxonomy (`FitStatus`)
//! - run configuration (`FitConfig`, `RunConfig`)

pub mod status;
pub mod types;

pub use status::*;
pub use types::*;
