//! Command-line parsing for the `corefit` binary.
//!
//! Argument parsing and command dispatch stay separate from the fitting code:
//! `app::fit_config_from_args` is the only place CLI flags become a `FitConfig`.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "corefit", version, about = "3-D bi-Maxwellian proton core fits for Helios ion distributions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every distribution in a samples CSV and write the fit table.
    Fit(FitArgs),
    /// Generate synthetic samples, params, and field CSVs.
    Simulate(SimulateArgs),
    /// Collapse a fit table's status codes to the archival 1/2/3 scheme.
    Archive(ArchiveArgs),
    /// Monthly counts and a status histogram for a fit table.
    Stats(StatsArgs),
}

/// Options for a batch fit.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Ion samples CSV (`time,E_bin,El,Az,vx,vy,vz,pdf,counts`).
    #[arg(long, value_name = "CSV")]
    pub samples: PathBuf,

    /// Per-distribution params CSV (1-D fit summary, spacecraft velocity).
    #[arg(long, value_name = "CSV")]
    pub params: PathBuf,

    /// 4 Hz magnetic field CSV (`time,Bx,By,Bz`). Preferred when both are given.
    #[arg(long = "mag-4hz", value_name = "CSV")]
    pub mag_high: Option<PathBuf>,

    /// 6 s magnetic field CSV (`time,Bx,By,Bz`).
    #[arg(long = "mag-6s", value_name = "CSV")]
    pub mag_low: Option<PathBuf>,

    /// Write the fit table to this CSV.
    #[arg(short, long, value_name = "CSV")]
    pub output: Option<PathBuf>,

    /// Write the run summary as JSON.
    #[arg(long = "summary-json", value_name = "JSON")]
    pub summary_json: Option<PathBuf>,

    /// Fit distributions one at a time instead of on the thread pool.
    #[arg(long)]
    pub no_parallel: bool,

    /// Log initial guesses and output records for every distribution.
    #[arg(long)]
    pub diagnostics: bool,

    /// Minimum samples left after velocity truncation.
    #[arg(long, default_value_t = 7)]
    pub min_points: usize,

    /// Minimum distinct azimuth and elevation bins.
    #[arg(long, default_value_t = 3)]
    pub min_angular_bins: usize,

    /// Lower bound (km/s) for accepting the 1-D thermal speed guess.
    #[arg(long, default_value_t = 10.0)]
    pub vth_guess_min: f64,

    /// Upper bound (km/s) for accepting the 1-D thermal speed guess.
    #[arg(long, default_value_t = 100.0)]
    pub vth_guess_max: f64,

    /// Thermal speed guess (km/s) when the 1-D value is unusable.
    #[arg(long, default_value_t = 40.0)]
    pub vth_guess_default: f64,

    /// Smallest accepted fitted amplitude, as a multiple of the peak pdf.
    #[arg(long, default_value_t = 0.1)]
    pub amplitude_ratio_min: f64,

    /// Largest accepted fitted amplitude, as a multiple of the peak pdf.
    #[arg(long, default_value_t = 20.0)]
    pub amplitude_ratio_max: f64,

    /// Smallest accepted fitted thermal speed (km/s).
    #[arg(long, default_value_t = 5.0)]
    pub min_thermal_speed: f64,

    /// Levenberg-Marquardt iteration limit.
    #[arg(long, default_value_t = 200)]
    pub max_iterations: usize,

    /// Relative SSE reduction tolerance.
    #[arg(long, default_value_t = 1.49012e-8)]
    pub ftol: f64,

    /// Relative step size tolerance.
    #[arg(long, default_value_t = 1.49012e-8)]
    pub xtol: f64,
}

/// Options for synthetic data generation.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Directory receiving `samples.csv`, `params.csv`, and `mag_4hz.csv`.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Number of distributions.
    #[arg(short = 'n', long, default_value_t = 20)]
    pub count: usize,

    /// Random seed for noise and field jitter.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Start time of the first distribution.
    #[arg(long, value_parser = parse_cli_time, default_value = "1976-04-17 08:30:00")]
    pub start: NaiveDateTime,

    /// Peak phase-space density (s^3/m^6).
    #[arg(long, default_value_t = 1e-9)]
    pub amplitude: f64,

    /// Perpendicular thermal speed (km/s).
    #[arg(long, default_value_t = 30.0)]
    pub vth_perp: f64,

    /// Parallel thermal speed (km/s).
    #[arg(long, default_value_t = 40.0)]
    pub vth_par: f64,

    /// Bulk velocity in the spacecraft frame (km/s).
    #[arg(long, num_args = 3, value_names = ["VX", "VY", "VZ"], allow_negative_numbers = true, default_values_t = [-400.0, 20.0, 5.0])]
    pub bulk: Vec<f64>,

    /// Magnetic field (nT).
    #[arg(long, num_args = 3, value_names = ["BX", "BY", "BZ"], allow_negative_numbers = true, default_values_t = [3.0, -4.0, 1.0])]
    pub field: Vec<f64>,

    /// Relative Gaussian noise on every sample.
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Relative Gaussian jitter on each field sample.
    #[arg(long, default_value_t = 0.01)]
    pub field_jitter: f64,

    /// Do not write a field series.
    #[arg(long)]
    pub no_field: bool,

    /// Ion instrument code written to the params file.
    #[arg(long, default_value_t = 1)]
    pub ion_instrument: i64,

    /// Radial spacecraft velocity (km/s).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub helios_vr: f64,

    /// Tangential spacecraft velocity (km/s).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub helios_v: f64,

    /// Energy bins.
    #[arg(long, default_value_t = 16)]
    pub n_speed: usize,

    /// Azimuth bins.
    #[arg(long, default_value_t = 9)]
    pub n_az: usize,

    /// Elevation bins.
    #[arg(long, default_value_t = 9)]
    pub n_el: usize,
}

/// Options for archival conversion.
#[derive(Debug, Parser, Clone)]
pub struct ArchiveArgs {
    /// Fit table produced by `corefit fit`.
    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// Archived fit table.
    #[arg(short, long, value_name = "CSV")]
    pub output: PathBuf,
}

/// Options for aggregate statistics.
#[derive(Debug, Parser, Clone)]
pub struct StatsArgs {
    /// Fit table (detailed or archived).
    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// Read the status column with the archival 1/2/3 codes.
    #[arg(long)]
    pub archived: bool,

    /// Also write the statistics as JSON.
    #[arg(long, value_name = "JSON")]
    pub json: Option<PathBuf>,
}

fn parse_cli_time(s: &str) -> Result<NaiveDateTime, String> {
    crate::io::parse_time(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_defaults_match_documented_values() {
        let cli = Cli::parse_from(["corefit", "fit", "--samples", "s.csv", "--params", "p.csv"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.min_points, 7);
        assert_eq!(args.min_angular_bins, 3);
        assert_eq!(args.max_iterations, 200);
        assert!(args.mag_high.is_none() && !args.no_parallel);
    }

    #[test]
    fn simulate_accepts_negative_vectors() {
        let cli = Cli::parse_from([
            "corefit", "simulate", "--out-dir", "out", "--bulk", "-350", "10", "-2", "--start", "1976-01-01 00:00:00",
        ]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.bulk, vec![-350.0, 10.0, -2.0]);
        assert_eq!(args.field, vec![3.0, -4.0, 1.0]);
    }
}
