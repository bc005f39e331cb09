//! Data sources that live inside the crate.
//!
//! Real instrument data arrive through `io::ingest`; this module only holds
//! the synthetic generator used by `corefit simulate` and the tests.

pub mod synthetic;

pub use synthetic::*;
