//! Formatted terminal output.
//!
//! Formatting lives in one place so the fitting code stays free of
//! presentation concerns.

use crate::domain::RunConfig;
use crate::report::{FitStatistics, RunSummary, StatusHistogram};

/// Format the summary printed after `corefit fit`.
pub fn format_run_summary(summary: &RunSummary, config: &RunConfig) -> String {
    let mut out = String::new();

    out.push_str("=== corefit - Helios 3-D bi-Maxwellian fits ===\n");
    out.push_str(&format!("Samples: {}\n", config.samples_path.display()));
    out.push_str(&format!("Params : {}\n", config.params_path.display()));
    out.push_str(&format!(
        "Field  : 4 Hz={} | 6 s={}\n",
        fmt_path(config.mag_high_path.as_deref()),
        fmt_path(config.mag_low_path.as_deref()),
    ));
    out.push_str(&format!(
        "Rows: read={} skipped={} | distributions={}\n",
        summary.rows_read, summary.rows_skipped, summary.distributions
    ));
    if let Some(path) = &config.output_path {
        out.push_str(&format!("Output: {}\n", path.display()));
    }

    out.push('\n');
    out.push_str(&format_histogram(&summary.statuses));
    out
}

/// Format monthly statistics followed by the global status histogram.
pub fn format_statistics(stats: &FitStatistics) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<8} {:>8} {:>8} {:>8} {:>10}\n",
            "month", "dists", "status1", "status2", "fitted%"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<8} {:-<8} {:-<8} {:-<8} {:-<10}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for m in &stats.months {
        out.push_str(&format!(
            "{:04}-{:02}  {:>8} {:>8} {:>8} {:>10.2}\n",
            m.year,
            m.month,
            m.distributions,
            m.status_1,
            m.status_2,
            m.fraction_fitted * 100.0
        ));
    }

    out.push('\n');
    out.push_str(&format_histogram(&stats.statuses));
    out
}

/// Status histogram, one line per code with its message.
pub fn format_histogram(h: &StatusHistogram) -> String {
    let mut out = String::new();
    out.push_str(&format!("Status summary ({} distributions):\n", h.total));
    for c in &h.counts {
        let share = if h.total > 0 { c.count as f64 / h.total as f64 * 100.0 } else { 0.0 };
        out.push_str(&format!("{:>3} {:>8} {:>6.1}%  {}\n", c.code, c.count, share, c.message));
    }
    out
}

fn fmt_path(path: Option<&std::path::Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string())
}
