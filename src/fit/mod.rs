//! Distribution fitting.
//!
//! Responsibilities:
//!
//! - resolve the magnetic field over each distribution's measurement window
//! - run the gated bi-Maxwellian fit and build the output record

pub mod driver;
pub mod field;

pub use driver::*;
pub use field::*;
