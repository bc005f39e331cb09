//! Fit table CSV export.
//!
//! Column order and names are part of the archive format. Floating point
//! values are rounded to 6 significant figures; missing values are written
//! as `NaN`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::data::SimulatedRun;
use crate::domain::{FitOutput, MagSeries, TIME_FORMAT, TableStatus};
use crate::error::AppError;

/// Timestamp format for simulated inputs; fractional seconds only when present.
const INPUT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// File names written by `write_simulated_run`.
pub const SAMPLES_FILE: &str = "samples.csv";
pub const PARAMS_FILE: &str = "params.csv";
pub const MAG_HIGH_FILE: &str = "mag_4hz.csv";

/// Fit table header, in output order.
pub const FIT_TABLE_COLUMNS: [&str; 16] = [
    "Time",
    "B instrument",
    "Bx",
    "By",
    "Bz",
    "sigma B",
    "Ion instrument",
    "Status",
    "Tp_par",
    "Tp_perp",
    "n_p",
    "vp_x",
    "vp_y",
    "vp_z",
    "vth_p_par",
    "vth_p_perp",
];

/// Token written for missing values.
pub const MISSING: &str = "NaN";

const SIG_FIGS: usize = 6;

/// Write fit records to a CSV file.
pub fn write_fit_table<S: TableStatus>(path: &Path, records: &[FitOutput<S>]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create fit table '{}': {e}", path.display())))?;
    write_fit_records(BufWriter::new(file), records)
        .map_err(|e| AppError::input(format!("Failed to write fit table '{}': {e}", path.display())))
}

/// Write fit records as CSV to any writer.
pub fn write_fit_records<W: Write, S: TableStatus>(mut out: W, records: &[FitOutput<S>]) -> std::io::Result<()> {
    writeln!(out, "{}", FIT_TABLE_COLUMNS.join(","))?;
    for r in records {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            r.time.format(TIME_FORMAT),
            r.b_instrument.map(|b| b.code().to_string()).unwrap_or_else(|| MISSING.to_string()),
            sig_figs(r.bx),
            sig_figs(r.by),
            sig_figs(r.bz),
            sig_figs(r.sigma_b),
            r.ion_instrument,
            r.status.code(),
            sig_figs(r.tp_par),
            sig_figs(r.tp_perp),
            sig_figs(r.n_p),
            sig_figs(r.vp_x),
            sig_figs(r.vp_y),
            sig_figs(r.vp_z),
            sig_figs(r.vth_p_par),
            sig_figs(r.vth_p_perp),
        )?;
    }
    out.flush()
}

/// Write a simulated run as the three input CSVs `corefit fit` consumes.
///
/// The field file is only written when the run carries a field.
pub fn write_simulated_run(dir: &Path, run: &SimulatedRun) -> Result<Vec<std::path::PathBuf>, AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::input(format!("Failed to create output dir '{}': {e}", dir.display())))?;

    let mut written = Vec::new();
    let samples_path = dir.join(SAMPLES_FILE);
    write_with(&samples_path, |out| write_samples(out, run))?;
    written.push(samples_path);

    let params_path = dir.join(PARAMS_FILE);
    write_with(&params_path, |out| write_params(out, run))?;
    written.push(params_path);

    if !run.field.is_empty() {
        let mag_path = dir.join(MAG_HIGH_FILE);
        write_with(&mag_path, |out| write_mag_series(out, &run.field))?;
        written.push(mag_path);
    }
    Ok(written)
}

fn write_with(
    path: &Path,
    body: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<(), AppError> {
    let file =
        File::create(path).map_err(|e| AppError::input(format!("Failed to create '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    body(&mut out)
        .and_then(|_| out.flush())
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", path.display())))
}

fn write_samples<W: Write>(out: &mut W, run: &SimulatedRun) -> std::io::Result<()> {
    writeln!(out, "time,E_bin,El,Az,vx,vy,vz,pdf,counts")?;
    for sim in &run.distributions {
        let time = sim.distribution.start_time.format(INPUT_TIME_FORMAT);
        for s in &sim.distribution.samples {
            writeln!(
                out,
                "{time},{},{},{},{},{},{},{:e},{}",
                s.e_bin, s.el, s.az, s.velocity.x, s.velocity.y, s.velocity.z, s.pdf, s.counts
            )?;
        }
    }
    Ok(())
}

fn write_params<W: Write>(out: &mut W, run: &SimulatedRun) -> std::io::Result<()> {
    writeln!(out, "time,ion_instrument,helios_vr,helios_v,fit1d_status,T_p,v_max,v_peak")?;
    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for sim in &run.distributions {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            sim.distribution.start_time.format(INPUT_TIME_FORMAT),
            sim.params.ion_instrument,
            sim.params.helios_vr,
            sim.params.helios_v,
            sim.fit_1d.status,
            sig_figs(sim.fit_1d.t_p),
            opt(sim.fit_1d.v_max),
            opt(sim.fit_1d.v_peak),
        )?;
    }
    Ok(())
}

fn write_mag_series<W: Write>(out: &mut W, series: &MagSeries) -> std::io::Result<()> {
    writeln!(out, "time,Bx,By,Bz")?;
    for s in &series.samples {
        writeln!(out, "{},{},{},{}", s.time.format(INPUT_TIME_FORMAT), s.b.x, s.b.y, s.b.z)?;
    }
    Ok(())
}

/// Write any serializable value as pretty-printed JSON.
pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    write_with(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value).map_err(std::io::Error::from)?;
        writeln!(out)
    })
}

/// Format `x` rounded to 6 significant figures, or `NaN` if not finite.
pub fn sig_figs(x: f64) -> String {
    if !x.is_finite() {
        return MISSING.to_string();
    }
    let rounded: f64 = format!("{:.*e}", SIG_FIGS - 1, x).parse().unwrap_or(x);
    format!("{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitStatus, MagInstrument};
    use chrono::NaiveDate;

    #[test]
    fn rounds_to_six_significant_figures() {
        assert_eq!(sig_figs(123.456789), "123.457");
        assert_eq!(sig_figs(-0.000123456789), "-0.000123457");
        assert_eq!(sig_figs(123456789.0), "123457000");
        assert_eq!(sig_figs(2.0), "2");
        assert_eq!(sig_figs(f64::NAN), "NaN");
        assert_eq!(sig_figs(f64::INFINITY), "NaN");
    }

    #[test]
    fn writes_header_and_missing_tokens() {
        let time = NaiveDate::from_ymd_opt(1976, 3, 1)
            .unwrap()
            .and_hms_opt(1, 2, 3)
            .unwrap();
        let mut ok = FitOutput::missing(FitStatus::Success, time, 1);
        ok.b_instrument = Some(MagInstrument::LowCadence);
        ok.n_p = 12.345678;
        let rejected = FitOutput::missing(FitStatus::ProtonPeakMissing, time, 2);

        let mut buf = Vec::new();
        write_fit_records(&mut buf, &[ok, rejected]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], FIT_TABLE_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "1976-03-01 01:02:03,2,NaN,NaN,NaN,NaN,1,1,NaN,NaN,12.3457,NaN,NaN,NaN,NaN,NaN"
        );
        assert!(lines[2].starts_with("1976-03-01 01:02:03,NaN,"));
        assert_eq!(lines[2].split(',').nth(7), Some("10"));
        assert_eq!(lines[2].split(',').count(), FIT_TABLE_COLUMNS.len());
    }
}
