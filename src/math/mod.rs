//! Mathematical utilities: frame rotation, thermal conversions, and least squares.

pub mod lm;
pub mod ols;
pub mod rotation;
pub mod thermal;

pub use lm::*;
pub use ols::*;
pub use rotation::*;
pub use thermal::*;
