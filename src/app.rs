//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initialises logging
//! - parses CLI arguments
//! - runs batch fits, simulations, archival conversion, and statistics
//! - prints reports and writes exports

use clap::Parser;
use nalgebra::Vector3;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{ArchiveArgs, Command, FitArgs, SimulateArgs, StatsArgs};
use crate::config::{load_dotenv, resolve_input};
use crate::data::{SimulationConfig, SyntheticDistribution, simulate_run};
use crate::domain::{ArchivalStatus, FitConfig, FitStatus, RunConfig, TableStatus};
use crate::error::AppError;
use crate::math::LmOptions;
use crate::report::FitStatistics;

pub mod pipeline;

/// Entry point for the `corefit` binary.
pub fn run() -> Result<(), AppError> {
    let dotenv = load_dotenv();
    init_logging();
    if let Some(path) = dotenv {
        debug!(path = %path.display(), "loaded .env");
    }

    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Archive(args) => handle_archive(args),
        Command::Stats(args) => handle_stats(args),
    }
}

/// Install the stderr subscriber. `RUST_LOG` overrides the `info` default.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args);
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_run_summary(&run.summary, &config));
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = simulation_config_from_args(&args)?;
    let run = simulate_run(&config)?;
    let written = crate::io::write_simulated_run(&args.out_dir, &run)?;

    info!(distributions = run.distributions.len(), field_samples = run.field.len(), "simulation finished");
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn handle_archive(args: ArchiveArgs) -> Result<(), AppError> {
    let input = resolve_input(&args.input);
    let records = crate::io::archive_fit_table(&input, &args.output)?;

    let histogram = crate::report::StatusHistogram::from_records(&records);
    println!("archived -> {}", args.output.display());
    print!("{}", crate::report::format_histogram(&histogram));
    Ok(())
}

fn handle_stats(args: StatsArgs) -> Result<(), AppError> {
    let input = resolve_input(&args.input);
    let stats = if args.archived {
        table_statistics::<ArchivalStatus>(&input)?
    } else {
        table_statistics::<FitStatus>(&input)?
    };
    print!("{}", crate::report::format_statistics(&stats));

    if let Some(path) = &args.json {
        crate::io::write_json(path, &stats)?;
    }
    Ok(())
}

fn table_statistics<S: TableStatus>(input: &std::path::Path) -> Result<FitStatistics, AppError> {
    let records = crate::io::load_fit_table::<S>(input)?;
    if records.is_empty() {
        return Err(AppError::new(
            crate::error::EXIT_NO_DATA,
            format!("Fit table '{}' has no records.", input.display()),
        ));
    }
    Ok(crate::report::fit_statistics(&records))
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        min_points: args.min_points,
        min_angular_bins: args.min_angular_bins,
        vth_guess_min: args.vth_guess_min,
        vth_guess_max: args.vth_guess_max,
        vth_guess_default: args.vth_guess_default,
        amplitude_ratio_min: args.amplitude_ratio_min,
        amplitude_ratio_max: args.amplitude_ratio_max,
        min_thermal_speed: args.min_thermal_speed,
        diagnostics: args.diagnostics,
        solver: LmOptions {
            max_iterations: args.max_iterations,
            ftol: args.ftol,
            xtol: args.xtol,
            ..LmOptions::default()
        },
    }
}

pub fn run_config_from_args(args: &FitArgs) -> RunConfig {
    let optional = |p: &Option<std::path::PathBuf>| p.as_deref().map(resolve_input);
    RunConfig {
        samples_path: resolve_input(&args.samples),
        params_path: resolve_input(&args.params),
        mag_high_path: optional(&args.mag_high),
        mag_low_path: optional(&args.mag_low),
        output_path: args.output.clone(),
        summary_json: args.summary_json.clone(),
        parallel: !args.no_parallel,
        fit: fit_config_from_args(args),
    }
}

pub fn simulation_config_from_args(args: &SimulateArgs) -> Result<SimulationConfig, AppError> {
    let bulk = vector3(&args.bulk, "--bulk")?;
    let field = vector3(&args.field, "--field")?;
    Ok(SimulationConfig {
        start_time: args.start,
        count: args.count,
        seed: args.seed,
        truth: SyntheticDistribution {
            amplitude: args.amplitude,
            vth_perp: args.vth_perp,
            vth_par: args.vth_par,
            bulk,
            field,
            noise: args.noise,
            pdf_floor: 1e-3,
        },
        field_jitter: args.field_jitter,
        with_field: !args.no_field,
        ion_instrument: args.ion_instrument,
        helios_vr: args.helios_vr,
        helios_v: args.helios_v,
        n_speed: args.n_speed,
        n_az: args.n_az,
        n_el: args.n_el,
    })
}

fn vector3(values: &[f64], flag: &str) -> Result<Vector3<f64>, AppError> {
    match values {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => Err(AppError::input(format!("{flag} takes exactly three values."))),
    }
}
