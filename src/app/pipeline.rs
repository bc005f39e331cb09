//! Shared batch-fit pipeline.
//!
//! load CSVs -> group samples by distribution -> fit each distribution -> sort
//! -> export table -> summarise
//!
//! Distributions are independent, so the fit step runs on the rayon pool
//! unless the run asks for sequential processing.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use tracing::info;

use crate::domain::{FitConfig, FitOutput, IonDistribution, MagSeries, RunConfig, TIME_FORMAT};
use crate::error::AppError;
use crate::fit::fit_distribution;
use crate::io::{DistributionInputs, load_distributions, load_mag_series, load_params};
use crate::report::{RunSummary, StatusHistogram};

/// All computed outputs of a single `corefit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// One record per fitted distribution, sorted by time.
    pub records: Vec<FitOutput>,
    pub summary: RunSummary,
}

/// Everything the fit step needs, already parsed.
#[derive(Debug, Clone, Default)]
pub struct FitInputs {
    pub distributions: Vec<IonDistribution>,
    pub params: BTreeMap<NaiveDateTime, DistributionInputs>,
    pub mag_high: Option<MagSeries>,
    pub mag_low: Option<MagSeries>,
}

/// Execute the full pipeline described by `config`.
pub fn run_fit(config: &RunConfig) -> Result<RunOutput, AppError> {
    let ingested = load_distributions(&config.samples_path)?;
    info!(
        path = %config.samples_path.display(),
        rows = ingested.rows_read,
        skipped = ingested.row_errors.len(),
        distributions = ingested.rows.len(),
        "loaded samples"
    );

    let params = load_params(&config.params_path)?;
    let mag_high = config.mag_high_path.as_deref().map(load_mag_series).transpose()?;
    let mag_low = config.mag_low_path.as_deref().map(load_mag_series).transpose()?;
    info!(
        params = params.len(),
        mag_4hz = mag_high.as_ref().map_or(0, MagSeries::len),
        mag_6s = mag_low.as_ref().map_or(0, MagSeries::len),
        "loaded auxiliary inputs"
    );

    let inputs = FitInputs {
        distributions: ingested.rows,
        params,
        mag_high,
        mag_low,
    };
    let records = fit_all(&inputs, &config.fit, config.parallel)?;

    if let Some(path) = &config.output_path {
        crate::io::write_fit_table(path, &records)?;
        info!(path = %path.display(), records = records.len(), "wrote fit table");
    }

    let summary = RunSummary {
        rows_read: ingested.rows_read,
        rows_skipped: ingested.row_errors.len(),
        distributions: inputs.distributions.len(),
        statuses: StatusHistogram::from_records(&records),
    };
    if let Some(path) = &config.summary_json {
        crate::io::write_json(path, &summary)?;
    }

    Ok(RunOutput { records, summary })
}

/// Fit every distribution, one record each, sorted by time.
///
/// Every distribution needs a params row: without one there is no ion
/// instrument or 1-D summary to fit against, so the run fails and lists the
/// start times that are missing.
pub fn fit_all(inputs: &FitInputs, config: &FitConfig, parallel: bool) -> Result<Vec<FitOutput>, AppError> {
    let missing: Vec<String> = inputs
        .distributions
        .iter()
        .filter(|d| !inputs.params.contains_key(&d.start_time))
        .map(|d| d.start_time.format(TIME_FORMAT).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AppError::input(format!(
            "{} distribution(s) have no params row: {}",
            missing.len(),
            missing.join(", ")
        )));
    }

    let fit_one = |dist: &IonDistribution| -> Option<FitOutput> {
        let aux = inputs.params.get(&dist.start_time)?;
        Some(fit_distribution(
            dist,
            &aux.fit_1d,
            inputs.mag_high.as_ref(),
            inputs.mag_low.as_ref(),
            &aux.params,
            config,
        ))
    };

    let mut records: Vec<FitOutput> = if parallel {
        inputs.distributions.par_iter().filter_map(fit_one).collect()
    } else {
        inputs.distributions.iter().filter_map(fit_one).collect()
    };
    records.sort_by_key(|r| r.time);
    Ok(records)
}
