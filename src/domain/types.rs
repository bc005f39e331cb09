//! Shared domain types.
//!
//! Units used throughout the crate:
//!
//! - velocities and thermal speeds in km/s
//! - distribution function values in s³/m⁶
//! - magnetic field in nT
//! - temperatures in K, number density in cm⁻³

use std::path::PathBuf;

use chrono::NaiveDateTime;
use nalgebra::{DVector, Vector3};

use crate::domain::FitStatus;
use crate::math::LmOptions;

/// Timestamp format used by every CSV the crate reads or writes.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One measured point of a 3-D ion distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct IonSample {
    /// Energy bin index. Each bin takes one second to accumulate.
    pub e_bin: u32,
    /// Elevation bin index.
    pub el: i32,
    /// Azimuth bin index.
    pub az: i32,
    /// Spacecraft-frame velocity.
    pub velocity: Vector3<f64>,
    /// Probability density.
    pub pdf: f64,
    /// Raw instrument counts.
    pub counts: i64,
}

impl IonSample {
    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }
}

/// All samples belonging to a single measured distribution.
#[derive(Debug, Clone)]
pub struct IonDistribution {
    pub start_time: NaiveDateTime,
    pub samples: Vec<IonSample>,
}

/// Result of the coarser 1-D fit for the same distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fit1dSummary {
    /// 1-D fit status; 9 means several distributions were seen.
    pub status: i64,
    /// 1-D proton temperature estimate (K). May be NaN.
    pub t_p: f64,
    /// Highest velocity covered by the 1-D distribution. `None` when the
    /// 1-D distribution is empty, in which case no 3-D sample survives.
    pub v_max: Option<f64>,
    /// Velocity of the 1-D proton peak, if known.
    pub v_peak: Option<f64>,
}

impl Fit1dSummary {
    pub const MULTIPLE_DISTRIBUTIONS: i64 = 9;

    pub fn signals_multiple_distributions(&self) -> bool {
        self.status == Self::MULTIPLE_DISTRIBUTIONS
    }
}

/// Per-distribution context supplied alongside the samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistributionParams {
    /// Ion instrument that produced the distribution.
    pub ion_instrument: i64,
    /// Radial spacecraft velocity (km/s), added to the fitted `vx`.
    pub helios_vr: f64,
    /// Tangential spacecraft velocity (km/s), added to the fitted `vy`.
    pub helios_v: f64,
}

/// One magnetic field measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagSample {
    pub time: NaiveDateTime,
    pub b: Vector3<f64>,
}

/// A time-ordered magnetic field series.
#[derive(Debug, Clone, Default)]
pub struct MagSeries {
    pub samples: Vec<MagSample>,
}

impl MagSeries {
    pub fn new(mut samples: Vec<MagSample>) -> Self {
        samples.sort_by_key(|s| s.time);
        Self { samples }
    }

    /// Samples with `start < time < end` (both bounds exclusive).
    pub fn strictly_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> &[MagSample] {
        let lo = self.samples.partition_point(|s| s.time <= start);
        let hi = self.samples.partition_point(|s| s.time < end);
        if lo >= hi { &[] } else { &self.samples[lo..hi] }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Which magnetometer series supplied the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagInstrument {
    /// 4 Hz series.
    HighCadence,
    /// 6 s series.
    LowCadence,
}

impl MagInstrument {
    pub fn code(self) -> i64 {
        match self {
            MagInstrument::HighCadence => 1,
            MagInstrument::LowCadence => 2,
        }
    }
}

impl TryFrom<i64> for MagInstrument {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MagInstrument::HighCadence),
            2 => Ok(MagInstrument::LowCadence),
            other => Err(format!("Unknown B instrument code: {other}")),
        }
    }
}

/// The six bi-Maxwellian shape/location parameters.
///
/// Thermal speeds and bulk velocity are expressed in whichever frame the fit
/// ran in (field-aligned when a field was available).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiMaxwellianParams {
    pub amplitude: f64,
    pub vth_perp: f64,
    pub vth_par: f64,
    pub bulk: Vector3<f64>,
}

impl BiMaxwellianParams {
    pub const LEN: usize = 6;

    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_row_slice(&[
            self.amplitude,
            self.vth_perp,
            self.vth_par,
            self.bulk.x,
            self.bulk.y,
            self.bulk.z,
        ])
    }

    /// # Panics
    /// Panics if `v` has fewer than six elements.
    pub fn from_slice(v: &[f64]) -> Self {
        Self {
            amplitude: v[0],
            vth_perp: v[1],
            vth_par: v[2],
            bulk: Vector3::new(v[3], v[4], v[5]),
        }
    }
}

/// One row of the fit table.
///
/// The shape is identical for every status: any quantity that could not be
/// determined is NaN (or `None` for the field instrument). `S` is the status
/// scheme: detailed `FitStatus` for fresh fits, `ArchivalStatus` for
/// archived tables.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutput<S = FitStatus> {
    pub time: NaiveDateTime,
    pub status: S,
    pub ion_instrument: i64,
    pub b_instrument: Option<MagInstrument>,
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
    pub sigma_b: f64,
    pub n_p: f64,
    pub vth_p_perp: f64,
    pub vth_p_par: f64,
    pub tp_perp: f64,
    pub tp_par: f64,
    pub vp_x: f64,
    pub vp_y: f64,
    pub vp_z: f64,
}

impl<S> FitOutput<S> {
    /// A record with every physical quantity missing.
    pub fn missing(status: S, time: NaiveDateTime, ion_instrument: i64) -> Self {
        Self {
            time,
            status,
            ion_instrument,
            b_instrument: None,
            bx: f64::NAN,
            by: f64::NAN,
            bz: f64::NAN,
            sigma_b: f64::NAN,
            n_p: f64::NAN,
            vth_p_perp: f64::NAN,
            vth_p_par: f64::NAN,
            tp_perp: f64::NAN,
            tp_par: f64::NAN,
            vp_x: f64::NAN,
            vp_y: f64::NAN,
            vp_z: f64::NAN,
        }
    }

    /// The same record under a different status scheme.
    pub fn with_status<T>(self, status: T) -> FitOutput<T> {
        FitOutput {
            time: self.time,
            status,
            ion_instrument: self.ion_instrument,
            b_instrument: self.b_instrument,
            bx: self.bx,
            by: self.by,
            bz: self.bz,
            sigma_b: self.sigma_b,
            n_p: self.n_p,
            vth_p_perp: self.vth_p_perp,
            vth_p_par: self.vth_p_par,
            tp_perp: self.tp_perp,
            tp_par: self.tp_par,
            vp_x: self.vp_x,
            vp_y: self.vp_y,
            vp_z: self.vp_z,
        }
    }
}

/// Tunables of the per-distribution fit.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Minimum samples left after velocity truncation.
    pub min_points: usize,
    /// Minimum distinct azimuth and elevation bins.
    pub min_angular_bins: usize,
    /// Accepted window for the thermal speed guess derived from the 1-D fit.
    pub vth_guess_min: f64,
    pub vth_guess_max: f64,
    /// Guess used when the 1-D derived value is unusable.
    pub vth_guess_default: f64,
    /// Fitted amplitude must lie in `[low, high] × max(pdf)`.
    pub amplitude_ratio_min: f64,
    pub amplitude_ratio_max: f64,
    /// Fitted thermal speeds below this are rejected.
    pub min_thermal_speed: f64,
    /// Log guesses and outputs for every distribution.
    pub diagnostics: bool,
    pub solver: LmOptions,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            min_points: 7,
            min_angular_bins: 3,
            vth_guess_min: 10.0,
            vth_guess_max: 100.0,
            vth_guess_default: 40.0,
            amplitude_ratio_min: 0.1,
            amplitude_ratio_max: 20.0,
            min_thermal_speed: 5.0,
            diagnostics: false,
            solver: LmOptions::default(),
        }
    }
}

/// A full batch run as understood by the pipeline.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub samples_path: PathBuf,
    pub params_path: PathBuf,
    pub mag_high_path: Option<PathBuf>,
    pub mag_low_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
    /// Fit distributions on the rayon pool.
    pub parallel: bool,
    pub fit: FitConfig,
}
