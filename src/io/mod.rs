//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - fit table and simulated input exports (`export`)
//! - archival status collapse (`archive`)

pub mod archive;
pub mod export;
pub mod ingest;

pub use archive::*;
pub use export::*;
pub use ingest::*;
