//! Archival status collapse.
//!
//! Archived fit tables only distinguish three outcomes: a usable fit (1), a fit
//! without a magnetic field (2), and everything else (3).

use std::path::Path;

use tracing::info;

use crate::domain::{ArchivalStatus, FitOutput, FitStatus};
use crate::error::AppError;
use crate::io::{load_fit_table, write_fit_table};

/// Re-label detailed records with their archival status.
pub fn collapse_statuses(records: Vec<FitOutput>) -> Vec<FitOutput<ArchivalStatus>> {
    records
        .into_iter()
        .map(|r| {
            let archived = r.status.archival();
            r.with_status(archived)
        })
        .collect()
}

/// Read a detailed fit table, collapse its statuses, and write it to `output`.
pub fn archive_fit_table(input: &Path, output: &Path) -> Result<Vec<FitOutput<ArchivalStatus>>, AppError> {
    let detailed = load_fit_table::<FitStatus>(input)?;
    let changed = detailed
        .iter()
        .filter(|r| r.status.archival().code() != r.status.code())
        .count();
    let records = collapse_statuses(detailed);
    info!(
        input = %input.display(),
        output = %output.display(),
        records = records.len(),
        changed,
        "archived fit table"
    );
    write_fit_table(output, &records)?;
    Ok(records)
}
