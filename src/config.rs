//! Environment-driven configuration.
//!
//! A `.env` file in the working directory (or any parent) is loaded at start-up.
//! Recognised variables:
//!
//! - `RUST_LOG`: log filter (default `info`)
//! - `COREFIT_DATA_DIR`: directory that relative input paths are resolved against

use std::path::{Path, PathBuf};

/// Environment variable naming the default input directory.
pub const DATA_DIR_ENV: &str = "COREFIT_DATA_DIR";

/// Load `.env` if present. Returns the file that was loaded.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// The configured data directory, if set and non-empty.
pub fn data_dir() -> Option<PathBuf> {
    std::env::var_os(DATA_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Resolve an input path against `COREFIT_DATA_DIR`.
pub fn resolve_input(path: &Path) -> PathBuf {
    resolve_against(path, data_dir().as_deref())
}

/// Absolute paths are kept; relative ones are joined onto `base` when given.
pub fn resolve_against(path: &Path, base: Option<&Path>) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}
