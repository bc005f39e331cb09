//! CSV ingest.
//!
//! Turns the sample, parameter, field, and fit-table CSVs into domain types.
//!
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation**: unparsable rows are skipped and reported
//! - headers are matched case-insensitively, ignoring a UTF-8 BOM

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use chrono::NaiveDateTime;
use csv::StringRecord;
use nalgebra::Vector3;
use tracing::warn;

use crate::domain::{
    DistributionParams, Fit1dSummary, FitOutput, IonDistribution, IonSample, MagInstrument, MagSample,
    MagSeries, TableStatus,
};
use crate::error::{AppError, EXIT_NO_DATA};

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Parsed rows plus whatever could not be parsed.
#[derive(Debug, Clone)]
pub struct Ingested<T> {
    pub rows: Vec<T>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Auxiliary inputs for one distribution, keyed by its start time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistributionInputs {
    pub fit_1d: Fit1dSummary,
    pub params: DistributionParams,
}

type HeaderMap = HashMap<String, usize>;

const SAMPLE_COLUMNS: [&str; 9] = ["time", "e_bin", "el", "az", "vx", "vy", "vz", "pdf", "counts"];
const PARAM_COLUMNS: [&str; 5] = ["time", "ion_instrument", "helios_vr", "helios_v", "fit1d_status"];
const MAG_COLUMNS: [&str; 4] = ["time", "bx", "by", "bz"];
const FIT_COLUMNS: [&str; 3] = ["time", "status", "ion instrument"];

/// Load samples and group them into distributions by start time.
pub fn load_distributions(path: &Path) -> Result<Ingested<IonDistribution>, AppError> {
    let parsed = read_rows(path, &SAMPLE_COLUMNS, parse_sample_row)?;

    let mut grouped: BTreeMap<NaiveDateTime, Vec<IonSample>> = BTreeMap::new();
    for (time, sample) in parsed.rows {
        grouped.entry(time).or_default().push(sample);
    }
    if grouped.is_empty() {
        return Err(AppError::new(
            EXIT_NO_DATA,
            format!("No valid samples in '{}'.", path.display()),
        ));
    }

    Ok(Ingested {
        rows: grouped
            .into_iter()
            .map(|(start_time, samples)| IonDistribution { start_time, samples })
            .collect(),
        row_errors: parsed.row_errors,
        rows_read: parsed.rows_read,
    })
}

/// Load per-distribution parameters and 1-D fit summaries.
pub fn load_params(path: &Path) -> Result<BTreeMap<NaiveDateTime, DistributionInputs>, AppError> {
    let parsed = read_rows(path, &PARAM_COLUMNS, parse_param_row)?;
    Ok(parsed.rows.into_iter().collect())
}

/// Load a magnetic field series.
pub fn load_mag_series(path: &Path) -> Result<MagSeries, AppError> {
    let parsed = read_rows(path, &MAG_COLUMNS, |record, headers| {
        Ok(MagSample {
            time: parse_time(get_required(record, headers, "time")?)?,
            b: Vector3::new(
                parse_f64(record, headers, "bx")?,
                parse_f64(record, headers, "by")?,
                parse_f64(record, headers, "bz")?,
            ),
        })
    })?;
    Ok(MagSeries::new(parsed.rows))
}

/// Load a fit table written by `io::export`, reading its status column in
/// scheme `S` (`FitStatus` or `ArchivalStatus`).
///
/// Unknown status codes abort the load: a table with codes outside the
/// scheme is not something we can safely aggregate.
pub fn load_fit_table<S: TableStatus>(path: &Path) -> Result<Vec<FitOutput<S>>, AppError> {
    let file = open(path)?;
    let mut reader = csv_reader(file);
    let headers = build_header_map(
        &reader
            .headers()
            .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
            .clone(),
    );
    ensure_columns(&headers, &FIT_COLUMNS, path)?;

    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| AppError::input(format!("line {line}: CSV parse error: {e}")))?;
        let row = parse_fit_row(&record, &headers).map_err(|e| AppError::input(format!("line {line}: {e}")))?;
        out.push(row);
    }
    Ok(out)
}

fn parse_fit_row<S: TableStatus>(record: &StringRecord, headers: &HeaderMap) -> Result<FitOutput<S>, String> {
    let time = parse_time(get_required(record, headers, "time")?)?;
    let code = parse_int(get_required(record, headers, "status")?)?;
    let status = S::try_from(code).map_err(|e| e.message().to_string())?;
    let ion_instrument = parse_int(get_required(record, headers, "ion instrument")?)?;

    let mut out = FitOutput::missing(status, time, ion_instrument);
    out.b_instrument = match get_optional(record, headers, "b instrument").filter(|s| !is_missing_token(s)) {
        Some(raw) => Some(MagInstrument::try_from(parse_int(raw)?)?),
        None => None,
    };
    let field = |name: &str| parse_opt_f64(get_optional(record, headers, name)).unwrap_or(f64::NAN);
    out.bx = field("bx");
    out.by = field("by");
    out.bz = field("bz");
    out.sigma_b = field("sigma b");
    out.tp_par = field("tp_par");
    out.tp_perp = field("tp_perp");
    out.n_p = field("n_p");
    out.vp_x = field("vp_x");
    out.vp_y = field("vp_y");
    out.vp_z = field("vp_z");
    out.vth_p_par = field("vth_p_par");
    out.vth_p_perp = field("vth_p_perp");
    Ok(out)
}

fn parse_sample_row(record: &StringRecord, headers: &HeaderMap) -> Result<(NaiveDateTime, IonSample), String> {
    let time = parse_time(get_required(record, headers, "time")?)?;
    let e_bin = get_required(record, headers, "e_bin")?
        .parse::<u32>()
        .map_err(|_| "Invalid `E_bin` value.".to_string())?;
    let sample = IonSample {
        e_bin,
        el: parse_bin(get_required(record, headers, "el")?)?,
        az: parse_bin(get_required(record, headers, "az")?)?,
        velocity: Vector3::new(
            parse_f64(record, headers, "vx")?,
            parse_f64(record, headers, "vy")?,
            parse_f64(record, headers, "vz")?,
        ),
        pdf: parse_f64(record, headers, "pdf")?,
        counts: parse_int(get_required(record, headers, "counts")?)?,
    };
    Ok((time, sample))
}

fn parse_param_row(record: &StringRecord, headers: &HeaderMap) -> Result<(NaiveDateTime, DistributionInputs), String> {
    let time = parse_time(get_required(record, headers, "time")?)?;
    let params = DistributionParams {
        ion_instrument: parse_int(get_required(record, headers, "ion_instrument")?)?,
        helios_vr: parse_f64(record, headers, "helios_vr")?,
        helios_v: parse_f64(record, headers, "helios_v")?,
    };
    let fit_1d = Fit1dSummary {
        status: parse_int(get_required(record, headers, "fit1d_status")?)?,
        t_p: parse_opt_f64(get_optional(record, headers, "t_p")).unwrap_or(f64::NAN),
        v_max: parse_opt_f64(get_optional(record, headers, "v_max")),
        v_peak: parse_opt_f64(get_optional(record, headers, "v_peak")),
    };
    Ok((time, DistributionInputs { fit_1d, params }))
}

/// Read every row of `path` with `parse`, collecting row errors.
fn read_rows<T>(
    path: &Path,
    required: &[&str],
    parse: impl Fn(&StringRecord, &HeaderMap) -> Result<T, String>,
) -> Result<Ingested<T>, AppError> {
    let file = open(path)?;
    let mut reader = csv_reader(file);
    let headers = build_header_map(
        &reader
            .headers()
            .map_err(|e| AppError::input(format!("Failed to read CSV headers of '{}': {e}", path.display())))?
            .clone(),
    );
    ensure_columns(&headers, required, path)?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header line, and CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse(&record, &headers));
        match parsed {
            Ok(row) => rows.push(row),
            Err(message) => {
                warn!(file = %path.display(), line, %message, "skipping row");
                row_errors.push(RowError { line, message });
            }
        }
    }

    Ok(Ingested {
        rows,
        row_errors,
        rows_read,
    })
}

fn open(path: &Path) -> Result<File, AppError> {
    File::open(path).map_err(|e| AppError::input(format!("Failed to open CSV '{}': {e}", path.display())))
}

fn csv_reader(file: File) -> csv::Reader<File> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file)
}

fn ensure_columns(headers: &HeaderMap, required: &[&str], path: &Path) -> Result<(), AppError> {
    for name in required {
        if !headers.contains_key(*name) {
            return Err(AppError::input(format!(
                "Missing required column `{name}` in '{}'.",
                path.display()
            )));
        }
    }
    Ok(())
}

fn build_header_map(headers: &StringRecord) -> HeaderMap {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn get_required<'a>(record: &'a StringRecord, headers: &HeaderMap, name: &str) -> Result<&'a str, String> {
    let idx = headers
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, headers: &HeaderMap, name: &str) -> Option<&'a str> {
    let idx = headers.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, optionally with fractional seconds and/or
/// a `T` separator.
pub fn parse_time(s: &str) -> Result<NaiveDateTime, String> {
    const FMTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    for fmt in FMTS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t);
        }
    }
    Err(format!("Invalid time '{s}'. Expected YYYY-MM-DD HH:MM:SS."))
}

fn parse_f64(record: &StringRecord, headers: &HeaderMap, name: &str) -> Result<f64, String> {
    let raw = get_required(record, headers, name)?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Invalid `{name}` value '{raw}'."))
}

/// Integers may arrive as floats (`1.0`) from spreadsheet exports.
fn parse_int(s: &str) -> Result<i64, String> {
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(v as i64),
        _ => Err(format!("Invalid integer '{s}'.")),
    }
}

/// Angular bin index; must fit in `i32`.
fn parse_bin(s: &str) -> Result<i32, String> {
    let v = parse_int(s)?;
    i32::try_from(v).map_err(|_| format!("Bin index '{s}' out of range."))
}

fn is_missing_token(s: &str) -> bool {
    s.eq_ignore_ascii_case("nan")
}

/// Missing, `NaN`, and unparsable values all become `None`.
fn parse_opt_f64(s: Option<&str>) -> Option<f64> {
    let v = s?.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ArchivalStatus, FitStatus};
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_csv(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("corefit_ingest_{}_{name}.csv", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn groups_samples_by_start_time_and_reports_bad_rows() {
        let path = temp_csv(
            "samples",
            "\u{feff}time,E_bin,El,Az,vx,vy,vz,pdf,counts\n\
             1976-04-01 00:00:00,0,1,2,-400,10,5,1e-10,12\n\
             1976-04-01 00:00:00,1,1,3,-410,12,4,2e-10,20\n\
             1976-04-01 00:00:40.5,0,0,0,-390,0,0,3e-10,25\n\
             1976-04-01 00:01:21,0,0,0,abc,0,0,1e-10,5\n",
        );
        let ingested = load_distributions(&path).unwrap();
        assert_eq!(ingested.rows_read, 4);
        assert_eq!(ingested.rows.len(), 2);
        assert_eq!(ingested.rows[0].samples.len(), 2);
        assert_eq!(ingested.rows[0].samples[1].az, 3);
        assert_eq!(ingested.row_errors.len(), 1);
        assert_eq!(ingested.row_errors[0].line, 5);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn params_allow_missing_optional_values() {
        let path = temp_csv(
            "params",
            "time,ion_instrument,helios_vr,helios_v,fit1d_status,T_p,v_max,v_peak\n\
             1976-04-01 00:00:00,1,-1.5,20.1,1,1.2e5,900,420\n\
             1976-04-01 00:00:40,2,-1.5,20.1,9,NaN,,\n",
        );
        let params = load_params(&path).unwrap();
        assert_eq!(params.len(), 2);
        let second = params.values().nth(1).unwrap();
        assert_eq!(second.params.ion_instrument, 2);
        assert!(second.fit_1d.signals_multiple_distributions());
        assert!(second.fit_1d.t_p.is_nan());
        assert!(second.fit_1d.v_max.is_none() && second.fit_1d.v_peak.is_none());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn missing_required_column_is_an_input_error() {
        let path = temp_csv("mag", "time,Bx,By\n1976-04-01 00:00:00,1,2\n");
        let err = load_mag_series(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("bz"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn fit_table_rejects_unknown_status() {
        let path = temp_csv(
            "fits",
            "Time,B instrument,Bx,By,Bz,sigma B,Ion instrument,Status\n\
             1976-04-01 00:00:00,NaN,NaN,NaN,NaN,NaN,1,8\n",
        );
        assert!(load_fit_table::<FitStatus>(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn fractional_b_instrument_is_rejected() {
        let path = temp_csv(
            "fits_binst",
            "Time,B instrument,Bx,By,Bz,sigma B,Ion instrument,Status\n\
             1976-04-01 00:00:00,1.7,1,2,3,0.1,1,1\n",
        );
        let err = load_fit_table::<FitStatus>(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("line 2"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn archived_table_reads_code_three_as_failed() {
        let path = temp_csv(
            "fits_archived",
            "Time,B instrument,Bx,By,Bz,sigma B,Ion instrument,Status\n\
             1976-04-01 00:00:00,2.0,1,2,3,0.1,1,1\n\
             1976-04-01 00:00:40,NaN,NaN,NaN,NaN,NaN,1,3\n",
        );
        let rows = load_fit_table::<ArchivalStatus>(&path).unwrap();
        assert_eq!(rows[0].b_instrument, Some(MagInstrument::LowCadence));
        assert_eq!(rows[1].status, ArchivalStatus::Failed);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn out_of_range_bins_are_row_errors() {
        let path = temp_csv(
            "samples_bins",
            "time,E_bin,El,Az,vx,vy,vz,pdf,counts\n\
             1976-04-01 00:00:00,0,1,2,-400,10,5,1e-10,12\n\
             1976-04-01 00:00:00,1,4294967297,3,-410,12,4,2e-10,20\n",
        );
        let ingested = load_distributions(&path).unwrap();
        assert_eq!(ingested.rows[0].samples.len(), 1);
        assert_eq!(ingested.row_errors.len(), 1);
        assert!(ingested.row_errors[0].message.contains("out of range"));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn time_formats() {
        assert!(parse_time("1976-04-01 00:00:00").is_ok());
        assert!(parse_time("1976-04-01T00:00:00.250").is_ok());
        assert!(parse_time("01/04/1976").is_err());
    }
}
