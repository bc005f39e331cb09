//! Reporting: run summaries and aggregate fit statistics.
//!
//! Everything here works on finished `FitOutput` records, so it serves both a
//! fresh `corefit fit` run and archived tables read back by `corefit stats`.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::data::DISTRIBUTION_CADENCE_S;
use crate::domain::{FitOutput, TableStatus};

pub mod format;

pub use format::*;

/// Number of records carrying one status code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub code: i64,
    pub message: &'static str,
    pub count: usize,
}

/// Status histogram over a set of records, ordered by code.
#[derive(Debug, Clone, Serialize)]
pub struct StatusHistogram {
    pub total: usize,
    pub counts: Vec<StatusCount>,
}

impl StatusHistogram {
    pub fn from_records<S: TableStatus>(records: &[FitOutput<S>]) -> Self {
        let mut by_status: BTreeMap<S, usize> = BTreeMap::new();
        for r in records {
            *by_status.entry(r.status).or_default() += 1;
        }
        Self {
            total: records.len(),
            counts: by_status
                .into_iter()
                .map(|(status, count)| StatusCount {
                    code: status.code(),
                    message: status.message(),
                    count,
                })
                .collect(),
        }
    }

    pub fn count<S: TableStatus>(&self, status: S) -> usize {
        self.counts
            .iter()
            .find(|c| c.code == status.code())
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

/// Summary of a `corefit fit` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub distributions: usize,
    pub statuses: StatusHistogram,
}

/// Distribution counts for one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyStats {
    pub year: i32,
    pub month: u32,
    pub distributions: usize,
    pub status_1: usize,
    pub status_2: usize,
    /// Fitted (status 1 or 2) distributions over the number the instrument
    /// could have produced in that month.
    pub fraction_fitted: f64,
}

/// Aggregate statistics over a fit table.
#[derive(Debug, Clone, Serialize)]
pub struct FitStatistics {
    pub months: Vec<MonthlyStats>,
    pub statuses: StatusHistogram,
}

/// Group records by calendar month and build the global histogram.
///
/// Codes 1 and 2 mean the same in the detailed and archival schemes, so this
/// works on either kind of table.
pub fn fit_statistics<S: TableStatus>(records: &[FitOutput<S>]) -> FitStatistics {
    let mut months: BTreeMap<(i32, u32), MonthlyStats> = BTreeMap::new();
    for r in records {
        let key = (r.time.year(), r.time.month());
        let entry = months.entry(key).or_insert_with(|| MonthlyStats {
            year: key.0,
            month: key.1,
            distributions: 0,
            status_1: 0,
            status_2: 0,
            fraction_fitted: 0.0,
        });
        entry.distributions += 1;
        match r.status.code() {
            1 => entry.status_1 += 1,
            2 => entry.status_2 += 1,
            _ => {}
        }
    }

    for m in months.values_mut() {
        let possible = max_distributions(m.year, m.month);
        if possible > 0.0 {
            m.fraction_fitted = (m.status_1 + m.status_2) as f64 / possible;
        }
    }

    FitStatistics {
        months: months.into_values().collect(),
        statuses: StatusHistogram::from_records(records),
    }
}

/// Distributions the instrument can produce in a month at one per 40.5 s.
pub fn max_distributions(year: i32, month: u32) -> f64 {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return 0.0;
    };
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let Some(next) = next else {
        return 0.0;
    };
    let seconds = (next - first).num_seconds() as f64;
    (seconds / DISTRIBUTION_CADENCE_S).floor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArchivalStatus, FitStatus};
    use chrono::NaiveDateTime;

    fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn records() -> Vec<FitOutput> {
        vec![
            FitOutput::missing(FitStatus::Success, at(1976, 2, 1), 1),
            FitOutput::missing(FitStatus::Success, at(1976, 2, 3), 1),
            FitOutput::missing(FitStatus::NoMagneticField, at(1976, 2, 5), 1),
            FitOutput::missing(FitStatus::ProtonPeakMissing, at(1976, 2, 7), 2),
            FitOutput::missing(FitStatus::InsufficientPoints, at(1976, 3, 1), 1),
        ]
    }

    #[test]
    fn histogram_is_ordered_by_code() {
        let h = StatusHistogram::from_records(&records());
        assert_eq!(h.total, 5);
        let codes: Vec<i64> = h.counts.iter().map(|c| c.code).collect();
        assert_eq!(codes, vec![1, 2, 5, 10]);
        assert_eq!(h.count(FitStatus::Success), 2);
        assert_eq!(h.count(FitStatus::LeastSquaresFailed), 0);
    }

    #[test]
    fn monthly_counts_and_fraction() {
        let stats = fit_statistics(&records());
        assert_eq!(stats.months.len(), 2);

        let feb = &stats.months[0];
        assert_eq!((feb.year, feb.month), (1976, 2));
        assert_eq!((feb.distributions, feb.status_1, feb.status_2), (4, 2, 1));
        // 1976 is a leap year: 29 days.
        let possible = (29.0 * 86_400.0 / 40.5_f64).floor();
        assert!((feb.fraction_fitted - 3.0 / possible).abs() < 1e-15);

        let mar = &stats.months[1];
        assert_eq!(mar.distributions, 1);
        assert_eq!(mar.fraction_fitted, 0.0);
    }

    #[test]
    fn archived_histogram_labels_code_three_as_failed() {
        let archived: Vec<FitOutput<ArchivalStatus>> = records()
            .into_iter()
            .map(|r| {
                let status = r.status.archival();
                r.with_status(status)
            })
            .collect();
        let h = StatusHistogram::from_records(&archived);
        let failed = h.counts.iter().find(|c| c.code == 3).unwrap();
        assert_eq!(failed.count, 2);
        assert_eq!(failed.message, "Fit failed");
        assert_eq!(h.count(ArchivalStatus::Fitted), 2);
        assert_eq!(fit_statistics(&archived).months[0].status_2, 1);
    }

    #[test]
    fn december_rolls_into_next_year() {
        assert_eq!(max_distributions(1975, 12), (31.0 * 86_400.0 / 40.5_f64).floor());
        assert_eq!(max_distributions(1975, 13), 0.0);
    }
}
