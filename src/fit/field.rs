//! Magnetic field context for a single distribution.
//!
//! A distribution is accumulated one energy bin per second, so the field is
//! averaged over `[start + min(E_bin), start + max(E_bin) + 1s]`. The 4 Hz
//! series is preferred; the 6 s series is the fallback.

use chrono::{Duration, NaiveDateTime};
use nalgebra::Vector3;

use crate::domain::{IonSample, MagInstrument, MagSample, MagSeries};

/// Averaged field over a measurement window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldContext {
    pub instrument: MagInstrument,
    /// Mean field vector (nT).
    pub mean: Vector3<f64>,
    /// Norm of the per-component standard deviations (nT).
    pub sigma_b: f64,
    /// Number of field samples averaged.
    pub n_samples: usize,
}

/// Time interval over which `samples` were measured.
///
/// Returns `None` when `samples` is empty.
pub fn measurement_window(
    start_time: NaiveDateTime,
    samples: &[IonSample],
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let min_bin = samples.iter().map(|s| s.e_bin).min()?;
    let max_bin = samples.iter().map(|s| s.e_bin).max()?;
    let begin = start_time + Duration::seconds(i64::from(min_bin));
    let end = start_time + Duration::seconds(i64::from(max_bin) + 1);
    Some((begin, end))
}

/// Pick the field series covering `(begin, end)` and average it.
pub fn resolve_field(
    high_cadence: Option<&MagSeries>,
    low_cadence: Option<&MagSeries>,
    begin: NaiveDateTime,
    end: NaiveDateTime,
) -> Option<FieldContext> {
    let candidates = [
        (MagInstrument::HighCadence, high_cadence),
        (MagInstrument::LowCadence, low_cadence),
    ];
    candidates.into_iter().find_map(|(instrument, series)| {
        let window = series?.strictly_between(begin, end);
        average_field(window).map(|(mean, sigma_b)| FieldContext {
            instrument,
            mean,
            sigma_b,
            n_samples: window.len(),
        })
    })
}

/// Mean vector and `‖σ‖` (population standard deviation per component).
fn average_field(samples: &[MagSample]) -> Option<(Vector3<f64>, f64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().fold(Vector3::zeros(), |acc, s| acc + s.b) / n;
    let var = samples
        .iter()
        .fold(Vector3::zeros(), |acc: Vector3<f64>, s| {
            let d = s.b - mean;
            acc + d.component_mul(&d)
        })
        / n;
    let sigma = var.map(f64::sqrt);
    Some((mean, sigma.norm()))
}
