//! Synthetic ion distributions drawn from a known bi-Maxwellian.
//!
//! Samples sit on an instrument-like grid (energy × azimuth × elevation in
//! the spacecraft frame). Each energy bin index doubles as the second in
//! which it was accumulated, matching real data.

use chrono::{Duration, NaiveDateTime};
use nalgebra::Vector3;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{
    BiMaxwellianParams, DistributionParams, Fit1dSummary, IonDistribution, IonSample, MagSample, MagSeries,
};
use crate::error::AppError;
use crate::math::{PROTON_MASS, field_aligned_rotation, vth2temp};
use crate::models::bi_maxwellian_3d;

/// Counts recorded at the distribution peak.
const PEAK_COUNTS: f64 = 1000.0;

/// Cadence of real Helios 3-D distributions (s).
pub const DISTRIBUTION_CADENCE_S: f64 = 40.5;

/// Velocity-space sampling grid.
#[derive(Debug, Clone)]
pub struct InstrumentGrid {
    /// Speeds (km/s), one per energy bin.
    pub speeds: Vec<f64>,
    /// Azimuth bin centres (rad).
    pub azimuths: Vec<f64>,
    /// Elevation bin centres (rad).
    pub elevations: Vec<f64>,
}

impl InstrumentGrid {
    /// Grid covering every direction between `v_min` and `v_max`.
    pub fn full_sphere(v_min: f64, v_max: f64, n_speed: usize, n_az: usize, n_el: usize) -> Self {
        let n_az = n_az.max(1);
        let n_el = n_el.max(1);
        Self {
            speeds: log_space(v_min, v_max, n_speed),
            azimuths: (0..n_az)
                .map(|i| (i as f64 + 0.5) * 2.0 * std::f64::consts::PI / n_az as f64)
                .collect(),
            elevations: (0..n_el)
                .map(|j| -std::f64::consts::FRAC_PI_2 + (j as f64 + 0.5) * std::f64::consts::PI / n_el as f64)
                .collect(),
        }
    }

    /// Grid covering `±4 vth` around `bulk`, the way the instrument looks at
    /// a supersonic solar wind beam.
    pub fn around(bulk: &Vector3<f64>, vth: f64, n_speed: usize, n_az: usize, n_el: usize) -> Self {
        let speed = bulk.norm();
        let reach = 4.0 * vth;
        if speed <= reach {
            return Self::full_sphere(1.0, speed + reach, n_speed, n_az, n_el);
        }

        let half_width = (reach / speed).asin();
        let az0 = bulk.y.atan2(bulk.x);
        let el0 = (bulk.z / speed).asin();
        let spread = |center: f64, n: usize| -> Vec<f64> {
            let n = n.max(1);
            (0..n)
                .map(|i| center - half_width + (i as f64 + 0.5) * 2.0 * half_width / n as f64)
                .collect()
        };

        Self {
            speeds: log_space(speed - reach, speed + reach, n_speed),
            azimuths: spread(az0, n_az),
            elevations: spread(el0, n_el),
        }
    }

    /// `(energy bin, elevation bin, azimuth bin, velocity)` for every cell.
    pub fn cells(&self) -> Vec<(u32, i32, i32, Vector3<f64>)> {
        let mut out = Vec::with_capacity(self.speeds.len() * self.azimuths.len() * self.elevations.len());
        for (k, &v) in self.speeds.iter().enumerate() {
            for (j, &el) in self.elevations.iter().enumerate() {
                for (i, &az) in self.azimuths.iter().enumerate() {
                    let velocity = Vector3::new(v * el.cos() * az.cos(), v * el.cos() * az.sin(), v * el.sin());
                    out.push((k as u32, j as i32, i as i32, velocity));
                }
            }
        }
        out
    }

    pub fn max_speed(&self) -> f64 {
        self.speeds.iter().copied().fold(0.0, f64::max)
    }
}

/// Ground truth for one synthetic distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticDistribution {
    /// Peak phase-space density (s³/m⁶).
    pub amplitude: f64,
    /// Thermal speeds perpendicular/parallel to `field` (km/s).
    pub vth_perp: f64,
    pub vth_par: f64,
    /// Bulk velocity in the spacecraft frame (km/s).
    pub bulk: Vector3<f64>,
    /// Magnetic field defining the parallel direction (nT).
    pub field: Vector3<f64>,
    /// Relative Gaussian noise applied to each sample.
    pub noise: f64,
    /// Samples below `pdf_floor × amplitude` are not recorded.
    pub pdf_floor: f64,
}

impl SyntheticDistribution {
    /// Model parameters in the field-aligned frame.
    pub fn field_aligned_params(&self) -> BiMaxwellianParams {
        let r = field_aligned_rotation(&self.field);
        BiMaxwellianParams {
            amplitude: self.amplitude,
            vth_perp: self.vth_perp,
            vth_par: self.vth_par,
            bulk: r * self.bulk,
        }
    }

    /// Sample the distribution on `grid`. Noise is applied only when `rng`
    /// is given.
    pub fn generate(&self, start_time: NaiveDateTime, grid: &InstrumentGrid, mut rng: Option<&mut StdRng>) -> IonDistribution {
        let r = field_aligned_rotation(&self.field);
        let params = self.field_aligned_params();
        let normal = Normal::new(0.0, self.noise.max(0.0)).ok();

        let mut samples = Vec::new();
        for (e_bin, el, az, velocity) in grid.cells() {
            let mut pdf = bi_maxwellian_3d(&(r * velocity), &params);
            if let (Some(rng), Some(normal)) = (rng.as_deref_mut(), normal.as_ref()) {
                pdf *= (1.0 + normal.sample(rng)).max(0.0);
            }
            if pdf < self.pdf_floor * self.amplitude {
                continue;
            }
            let counts = (pdf / self.amplitude * PEAK_COUNTS).round() as i64;
            samples.push(IonSample {
                e_bin,
                el,
                az,
                velocity,
                pdf,
                counts,
            });
        }

        IonDistribution { start_time, samples }
    }

    /// A 1-D fit summary consistent with this distribution.
    pub fn fit_1d(&self, grid: &InstrumentGrid) -> Fit1dSummary {
        let vth = (self.vth_perp + self.vth_par) / 2.0;
        Fit1dSummary {
            status: 1,
            t_p: vth2temp(vth, PROTON_MASS),
            v_max: Some(grid.max_speed()),
            v_peak: Some(self.bulk.norm()),
        }
    }
}

/// A constant field sampled every `cadence_s` seconds over `[begin, end]`.
pub fn synthetic_field(begin: NaiveDateTime, end: NaiveDateTime, cadence_s: f64, b: Vector3<f64>) -> MagSeries {
    let step_ms = (cadence_s * 1e3).round().max(1.0) as i64;
    let mut samples = Vec::new();
    let mut t = begin;
    while t <= end {
        samples.push(MagSample { time: t, b });
        t += Duration::milliseconds(step_ms);
    }
    MagSeries::new(samples)
}

/// Settings for a simulated batch run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub start_time: NaiveDateTime,
    pub count: usize,
    pub seed: u64,
    pub truth: SyntheticDistribution,
    /// Relative jitter applied to the field between samples.
    pub field_jitter: f64,
    /// Emit a field series at all.
    pub with_field: bool,
    pub ion_instrument: i64,
    pub helios_vr: f64,
    pub helios_v: f64,
    pub n_speed: usize,
    pub n_az: usize,
    pub n_el: usize,
}

/// One simulated distribution with its auxiliary inputs.
#[derive(Debug, Clone)]
pub struct SimulatedDistribution {
    pub distribution: IonDistribution,
    pub fit_1d: Fit1dSummary,
    pub params: DistributionParams,
}

/// Output of `simulate_run`.
#[derive(Debug, Clone)]
pub struct SimulatedRun {
    pub distributions: Vec<SimulatedDistribution>,
    /// 4 Hz field series (empty when the run has no field).
    pub field: MagSeries,
}

/// Generate `count` distributions spaced at the instrument cadence.
pub fn simulate_run(config: &SimulationConfig) -> Result<SimulatedRun, AppError> {
    if config.count == 0 {
        return Err(AppError::input("Distribution count must be > 0."));
    }
    let t = &config.truth;
    if !(t.amplitude > 0.0 && t.vth_perp > 0.0 && t.vth_par > 0.0) {
        return Err(AppError::input("Amplitude and thermal speeds must be positive."));
    }
    if t.field.norm() == 0.0 {
        return Err(AppError::input("Synthetic magnetic field must be non-zero."));
    }
    if !(config.field_jitter.is_finite() && config.field_jitter >= 0.0) {
        return Err(AppError::input("Field jitter must be finite and >= 0."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let jitter = Normal::new(0.0, config.field_jitter)
        .map_err(|e| AppError::input(format!("Field jitter distribution error: {e}")))?;
    let grid = InstrumentGrid::around(
        &t.bulk,
        t.vth_perp.max(t.vth_par),
        config.n_speed,
        config.n_az,
        config.n_el,
    );

    let cadence_ms = (DISTRIBUTION_CADENCE_S * 1e3) as i64;
    let mut distributions = Vec::with_capacity(config.count);
    let mut field_samples = Vec::new();

    for i in 0..config.count {
        let start_time = config.start_time + Duration::milliseconds(cadence_ms * i as i64);
        let distribution = t.generate(start_time, &grid, Some(&mut rng));

        if config.with_field {
            // 4 Hz samples over the whole distribution slot.
            for q in 0..(DISTRIBUTION_CADENCE_S * 4.0) as i64 {
                let b = t.field + Vector3::from_fn(|_, _| jitter.sample(&mut rng)) * t.field.norm();
                field_samples.push(MagSample {
                    time: start_time + Duration::milliseconds(250 * q),
                    b,
                });
            }
        }

        distributions.push(SimulatedDistribution {
            distribution,
            fit_1d: t.fit_1d(&grid),
            params: DistributionParams {
                ion_instrument: config.ion_instrument,
                helios_vr: config.helios_vr,
                helios_v: config.helios_v,
            },
        });
    }

    Ok(SimulatedRun {
        distributions,
        field: MagSeries::new(field_samples),
    })
}

/// `steps` log-spaced points between `min` and `max` (inclusive).
fn log_space(min: f64, max: f64, steps: usize) -> Vec<f64> {
    if steps < 2 || !(min > 0.0 && max > min) {
        return vec![min.max(max)];
    }
    let ln_min = min.ln();
    let step = (max.ln() - ln_min) / (steps as f64 - 1.0);
    (0..steps).map(|i| (ln_min + step * i as f64).exp()).collect()
}
