//! `helios-corefit` library crate.
//!
//! The binary (`corefit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fit driver can be reused from other batch tools
//!
//! Data flow: `io::ingest` -> `fit::driver` (using `math` and `models`) ->
//! `io::export` / `report`.

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
