//! Per-distribution bi-Maxwellian fit.
//!
//! The driver is a sequence of gates. Each gate may reject the distribution
//! with a status code; the first failing gate wins:
//!
//! 1. input gates: ambiguous 1-D fit, negative counts, too few points after
//!    truncation, too few angular bins, proton peak outside the 3-D range
//! 2. magnetic field resolution and rotation into the field-aligned frame
//! 3. Levenberg–Marquardt fit from a moment-based initial guess
//! 4. plausibility gates (amplitude, thermal speeds), only with a field
//! 5. bulk velocity bounds in the spacecraft frame
//!
//! A rejected distribution still yields a full `FitOutput` with every
//! physical quantity set to NaN.

use std::collections::HashSet;
use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use tracing::{debug, info};

use crate::domain::{
    BiMaxwellianParams, DistributionParams, Fit1dSummary, FitConfig, FitOutput, FitStatus, IonDistribution,
    IonSample, MagSeries,
};
use crate::fit::field::{FieldContext, measurement_window, resolve_field};
use crate::math::{LeastSquaresProblem, PROTON_MASS, levenberg_marquardt, temp2vth, vth2temp};
use crate::models::{bi_maxwellian_3d, bi_maxwellian_gradient};

/// Fit a single distribution. Never fails: rejections are encoded in the
/// returned record's status.
pub fn fit_distribution(
    dist: &IonDistribution,
    fit_1d: &Fit1dSummary,
    mag_high: Option<&MagSeries>,
    mag_low: Option<&MagSeries>,
    params: &DistributionParams,
    config: &FitConfig,
) -> FitOutput {
    match run_fit(dist, fit_1d, mag_high, mag_low, params, config) {
        Ok(output) => {
            if config.diagnostics {
                info!(time = %dist.start_time, ?output, "fit finished");
            }
            output
        }
        Err(status) => {
            debug!(time = %dist.start_time, code = status.code(), reason = status.message(), "distribution rejected");
            FitOutput::missing(status, dist.start_time, params.ion_instrument)
        }
    }
}

fn run_fit(
    dist: &IonDistribution,
    fit_1d: &Fit1dSummary,
    mag_high: Option<&MagSeries>,
    mag_low: Option<&MagSeries>,
    params: &DistributionParams,
    config: &FitConfig,
) -> Result<FitOutput, FitStatus> {
    let samples = select_samples(dist, fit_1d, config)?;

    let (begin, end) = measurement_window(dist.start_time, &samples).ok_or(FitStatus::InsufficientPoints)?;
    debug!(%begin, %end, "distribution measurement window");

    let field = resolve_field(mag_high, mag_low, begin, end);
    match &field {
        Some(f) => debug!(
            instrument = f.instrument.code(),
            samples = f.n_samples,
            sigma_b = f.sigma_b,
            "field resolved"
        ),
        None => debug!("no field samples in window"),
    }
    let ctx = FitContext::new(&samples, field);

    let guess = ctx.initial_guess(fit_1d.t_p, config);
    if config.diagnostics {
        info!(time = %dist.start_time, ?guess, "initial guess");
    } else {
        debug!(?guess, "initial guess");
    }

    let report = levenberg_marquardt(&ctx, guess.to_vector(), &config.solver);
    debug!(
        code = report.termination.code(),
        iterations = report.iterations,
        sse = report.sse,
        "least squares finished"
    );
    if !report.termination.is_converged() {
        return Err(FitStatus::LeastSquaresFailed);
    }

    let fitted = BiMaxwellianParams::from_slice(report.params.as_slice());
    ctx.check_plausibility(&fitted, config)?;
    ctx.finalize(&fitted, params, dist.start_time)
}

/// Input gates. Returns the samples that take part in the fit.
fn select_samples(
    dist: &IonDistribution,
    fit_1d: &Fit1dSummary,
    config: &FitConfig,
) -> Result<Vec<IonSample>, FitStatus> {
    if fit_1d.signals_multiple_distributions() {
        return Err(FitStatus::AmbiguousDistribution);
    }
    if dist.samples.iter().any(|s| s.counts < 0) {
        return Err(FitStatus::AmbiguousDistribution);
    }

    // Drop energies above the range covered by the 1-D distribution.
    let samples: Vec<IonSample> = match fit_1d.v_max {
        Some(v_max) => dist
            .samples
            .iter()
            .filter(|s| s.speed() <= v_max)
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    if samples.len() < config.min_points {
        return Err(FitStatus::InsufficientPoints);
    }

    let az_bins: HashSet<i32> = samples.iter().map(|s| s.az).collect();
    let el_bins: HashSet<i32> = samples.iter().map(|s| s.el).collect();
    if az_bins.len() < config.min_angular_bins || el_bins.len() < config.min_angular_bins {
        return Err(FitStatus::InsufficientAngularBins);
    }

    if let Some(v_peak) = fit_1d.v_peak {
        let min_speed = samples.iter().map(IonSample::speed).fold(f64::INFINITY, f64::min);
        if min_speed > v_peak {
            return Err(FitStatus::ProtonPeakMissing);
        }
    }

    Ok(samples)
}

/// Everything the residual function and the post-fit checks need.
struct FitContext {
    /// Velocities in the frame the fit runs in.
    fit_velocities: Vec<Vector3<f64>>,
    pdf: Vec<f64>,
    pdf_max: f64,
    /// Spacecraft → field-aligned rotation, when a field is available.
    rotation: Option<Matrix3<f64>>,
    field: Option<FieldContext>,
    /// Per-axis spacecraft-frame velocity bounds of the samples.
    v_lo: Vector3<f64>,
    v_hi: Vector3<f64>,
    min_speed: f64,
}

impl FitContext {
    fn new(samples: &[IonSample], field: Option<FieldContext>) -> Self {
        let rotation = field.map(|f| crate::math::field_aligned_rotation(&f.mean));
        let fit_velocities = samples
            .iter()
            .map(|s| match &rotation {
                Some(r) => r * s.velocity,
                None => s.velocity,
            })
            .collect();
        let pdf: Vec<f64> = samples.iter().map(|s| s.pdf).collect();
        let pdf_max = pdf.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut v_lo = Vector3::repeat(f64::INFINITY);
        let mut v_hi = Vector3::repeat(f64::NEG_INFINITY);
        for s in samples {
            v_lo = v_lo.inf(&s.velocity);
            v_hi = v_hi.sup(&s.velocity);
        }
        let min_speed = samples.iter().map(IonSample::speed).fold(f64::INFINITY, f64::min);

        Self {
            fit_velocities,
            pdf,
            pdf_max,
            rotation,
            field,
            v_lo,
            v_hi,
            min_speed,
        }
    }

    /// Moment-based starting point for the solver.
    fn initial_guess(&self, t_p: f64, config: &FitConfig) -> BiMaxwellianParams {
        let total: f64 = self.pdf.iter().sum();
        let weighted = self
            .fit_velocities
            .iter()
            .zip(&self.pdf)
            .fold(Vector3::zeros(), |acc: Vector3<f64>, (v, &f)| acc + v * f);

        let mut vth = temp2vth(t_p, PROTON_MASS);
        if !vth.is_finite() || vth < config.vth_guess_min || vth > config.vth_guess_max {
            vth = config.vth_guess_default;
        }

        BiMaxwellianParams {
            amplitude: self.pdf_max,
            vth_perp: vth,
            vth_par: vth,
            bulk: weighted / total,
        }
    }

    /// Plausibility gates. Only meaningful with a field to anchor the fit.
    fn check_plausibility(&self, fitted: &BiMaxwellianParams, config: &FitConfig) -> Result<(), FitStatus> {
        if self.field.is_none() {
            return Ok(());
        }
        if fitted.amplitude > config.amplitude_ratio_max * self.pdf_max
            || fitted.amplitude < config.amplitude_ratio_min * self.pdf_max
        {
            return Err(FitStatus::UnrealisticDensity);
        }
        if fitted.vth_perp < config.min_thermal_speed || fitted.vth_par < config.min_thermal_speed {
            return Err(FitStatus::InsufficientAngularBins);
        }
        Ok(())
    }

    /// Convert fitted parameters into the output record.
    fn finalize(
        &self,
        fitted: &BiMaxwellianParams,
        params: &DistributionParams,
        time: chrono::NaiveDateTime,
    ) -> Result<FitOutput, FitStatus> {
        let bulk = match &self.rotation {
            Some(r) => r.transpose() * fitted.bulk,
            None => fitted.bulk,
        };

        let outside_axis = (0..3).any(|i| bulk[i] < self.v_lo[i] || bulk[i] > self.v_hi[i]);
        if outside_axis || bulk.norm() < self.min_speed {
            return Err(FitStatus::BulkVelocityOutOfBounds);
        }

        let vth_perp = fitted.vth_perp.abs();
        let vth_par = fitted.vth_par.abs();
        let n_p = number_density(fitted.amplitude, vth_perp, vth_par);

        let mut out = FitOutput::missing(FitStatus::NoMagneticField, time, params.ion_instrument);
        out.n_p = n_p;
        // Aberration: add the spacecraft's own motion back in.
        out.vp_x = bulk.x + params.helios_vr;
        out.vp_y = bulk.y + params.helios_v;
        out.vp_z = bulk.z;

        // Without a field the perp/par split is meaningless.
        if let Some(field) = &self.field {
            out.status = FitStatus::Success;
            out.b_instrument = Some(field.instrument);
            out.bx = field.mean.x;
            out.by = field.mean.y;
            out.bz = field.mean.z;
            out.sigma_b = field.sigma_b;
            out.vth_p_perp = vth_perp;
            out.vth_p_par = vth_par;
            out.tp_perp = vth2temp(vth_perp, PROTON_MASS);
            out.tp_par = vth2temp(vth_par, PROTON_MASS);
        }

        Ok(out)
    }
}

impl LeastSquaresProblem for FitContext {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        let p = BiMaxwellianParams::from_slice(params.as_slice());
        DVector::from_iterator(
            self.pdf.len(),
            self.fit_velocities
                .iter()
                .zip(&self.pdf)
                .map(|(v, &f)| f - bi_maxwellian_3d(v, &p)),
        )
    }

    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let p = BiMaxwellianParams::from_slice(params.as_slice());
        let mut jac = DMatrix::zeros(self.pdf.len(), BiMaxwellianParams::LEN);
        for (i, v) in self.fit_velocities.iter().enumerate() {
            let g = bi_maxwellian_gradient(v, &p);
            for k in 0..BiMaxwellianParams::LEN {
                jac[(i, k)] = -g[k];
            }
        }
        jac
    }
}

/// Proton number density (cm⁻³) from amplitude (s³/m⁶) and thermal speeds (km/s).
pub fn number_density(amplitude: f64, vth_perp: f64, vth_par: f64) -> f64 {
    let perp = vth_perp * 1e3;
    let par = vth_par * 1e3;
    amplitude * PI.powf(1.5) * perp * perp * par * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{InstrumentGrid, SyntheticDistribution, synthetic_field};
    use crate::domain::{MagInstrument, MagSample};
    use crate::math::LmOptions;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(1976, 4, 17)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn truth() -> SyntheticDistribution {
        SyntheticDistribution {
            amplitude: 1.0,
            vth_perp: 30.0,
            vth_par: 25.0,
            bulk: Vector3::new(10.0, -5.0, 2.0),
            field: Vector3::new(1.5, -1.0, 5.0),
            noise: 0.0,
            pdf_floor: 1e-4,
        }
    }

    fn grid() -> InstrumentGrid {
        InstrumentGrid::full_sphere(2.0, 120.0, 14, 16, 9)
    }

    fn fit_1d() -> Fit1dSummary {
        Fit1dSummary {
            status: 1,
            t_p: vth2temp(28.0, PROTON_MASS),
            v_max: Some(1000.0),
            v_peak: None,
        }
    }

    fn params() -> DistributionParams {
        DistributionParams {
            ion_instrument: 1,
            helios_vr: 0.0,
            helios_v: 0.0,
        }
    }

    fn dist(truth: &SyntheticDistribution) -> IonDistribution {
        truth.generate(start(), &grid(), None)
    }

    fn field_series(b: Vector3<f64>) -> MagSeries {
        synthetic_field(start() - Duration::seconds(5), start() + Duration::seconds(60), 0.25, b)
    }

    fn assert_close(actual: f64, expected: f64, rel: f64, what: &str) {
        assert!(
            ((actual - expected) / expected).abs() < rel,
            "{what}: expected {expected}, got {actual}"
        );
    }

    fn assert_all_missing(out: &FitOutput) {
        for v in [
            out.n_p, out.vth_p_perp, out.vth_p_par, out.tp_perp, out.tp_par, out.vp_x, out.vp_y, out.vp_z, out.bx,
            out.by, out.bz, out.sigma_b,
        ] {
            assert!(v.is_nan());
        }
        assert!(out.b_instrument.is_none());
    }

    #[test]
    fn recovers_synthetic_parameters_with_field() {
        let truth = truth();
        let mag = field_series(truth.field);
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&mag), None, &params(), &FitConfig::default());

        assert_eq!(out.status, FitStatus::Success);
        assert_eq!(out.b_instrument, Some(MagInstrument::HighCadence));
        assert_close(out.n_p, number_density(1.0, 30.0, 25.0), 0.01, "n_p");
        assert_close(out.vth_p_perp, 30.0, 0.01, "vth_perp");
        assert_close(out.vth_p_par, 25.0, 0.01, "vth_par");
        assert_close(out.vp_x, 10.0, 0.01, "vp_x");
        assert_close(out.vp_y, -5.0, 0.01, "vp_y");
        assert_close(out.vp_z, 2.0, 0.01, "vp_z");
        assert_close(out.tp_perp, vth2temp(30.0, PROTON_MASS), 0.02, "Tp_perp");
        assert!((out.bx - 1.5).abs() < 1e-12 && (out.bz - 5.0).abs() < 1e-12);
        assert!(out.sigma_b.abs() < 1e-12);
        assert_eq!(out.time, start());
    }

    #[test]
    fn no_field_still_yields_density_and_velocity() {
        // Field along z so the spacecraft frame is already field aligned.
        let truth = SyntheticDistribution {
            field: Vector3::new(0.0, 0.0, 4.0),
            ..truth()
        };
        let out = fit_distribution(&dist(&truth), &fit_1d(), None, None, &params(), &FitConfig::default());

        assert_eq!(out.status, FitStatus::NoMagneticField);
        assert!(out.b_instrument.is_none());
        assert!(out.bx.is_nan() && out.by.is_nan() && out.bz.is_nan() && out.sigma_b.is_nan());
        assert!(out.tp_perp.is_nan() && out.tp_par.is_nan());
        assert_close(out.n_p, number_density(1.0, 30.0, 25.0), 0.01, "n_p");
        assert_close(out.vp_x, 10.0, 0.01, "vp_x");
    }

    #[test]
    fn falls_back_to_low_cadence_field() {
        let truth = truth();
        let empty = MagSeries::default();
        let low = field_series(truth.field);
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&empty), Some(&low), &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::Success);
        assert_eq!(out.b_instrument, Some(MagInstrument::LowCadence));
    }

    #[test]
    fn aberration_offsets_shift_x_and_y_only() {
        let truth = truth();
        let mag = field_series(truth.field);
        let p = DistributionParams {
            ion_instrument: 2,
            helios_vr: 7.0,
            helios_v: -3.0,
        };
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&mag), None, &p, &FitConfig::default());
        assert_eq!(out.ion_instrument, 2);
        assert_close(out.vp_x, 17.0, 0.01, "vp_x");
        assert_close(out.vp_y, -8.0, 0.01, "vp_y");
        assert_close(out.vp_z, 2.0, 0.01, "vp_z");
    }

    #[test]
    fn ambiguous_1d_fit_rejects_everything() {
        let truth = truth();
        let mag = field_series(truth.field);
        let fit = Fit1dSummary { status: 9, ..fit_1d() };
        let out = fit_distribution(&dist(&truth), &fit, Some(&mag), None, &params(), &FitConfig::default());
        assert_eq!(out.status.code(), 9);
        assert_all_missing(&out);
        assert_eq!(out.ion_instrument, 1);
    }

    #[test]
    fn negative_counts_are_ambiguous() {
        let truth = truth();
        let mut d = dist(&truth);
        d.samples[3].counts = -1;
        let out = fit_distribution(&d, &fit_1d(), None, None, &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::AmbiguousDistribution);
    }

    #[test]
    fn truncation_below_seven_points() {
        let truth = truth();
        let fit = Fit1dSummary {
            v_max: Some(1.0),
            ..fit_1d()
        };
        let out = fit_distribution(&dist(&truth), &fit, None, None, &params(), &FitConfig::default());
        assert_eq!(out.status.code(), 5);
        assert_all_missing(&out);

        let empty_1d = Fit1dSummary { v_max: None, ..fit_1d() };
        let out = fit_distribution(&dist(&truth), &empty_1d, None, None, &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::InsufficientPoints);
    }

    #[test]
    fn too_few_azimuth_bins() {
        let truth = truth();
        let mut d = dist(&truth);
        d.samples.retain(|s| s.az < 2);
        assert!(d.samples.len() >= 7);
        let out = fit_distribution(&d, &fit_1d(), None, None, &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::InsufficientAngularBins);
    }

    #[test]
    fn proton_peak_below_measured_range() {
        let truth = truth();
        let fit = Fit1dSummary {
            v_peak: Some(0.5),
            ..fit_1d()
        };
        let out = fit_distribution(&dist(&truth), &fit, None, None, &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::ProtonPeakMissing);
    }

    #[test]
    fn solver_failure_is_status_six() {
        let truth = truth();
        let mag = field_series(truth.field);
        let config = FitConfig {
            solver: LmOptions {
                max_iterations: 1,
                ..LmOptions::default()
            },
            ..FitConfig::default()
        };
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&mag), None, &params(), &config);
        assert_eq!(out.status, FitStatus::LeastSquaresFailed);
        assert_all_missing(&out);
    }

    #[test]
    fn amplitude_gate_only_applies_with_field() {
        let truth = SyntheticDistribution {
            field: Vector3::new(0.0, 0.0, 4.0),
            ..truth()
        };
        let config = FitConfig {
            amplitude_ratio_max: 0.5,
            ..FitConfig::default()
        };
        let mag = field_series(truth.field);
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&mag), None, &params(), &config);
        assert_eq!(out.status, FitStatus::UnrealisticDensity);
        assert_all_missing(&out);

        let out = fit_distribution(&dist(&truth), &fit_1d(), None, None, &params(), &config);
        assert_eq!(out.status, FitStatus::NoMagneticField);
    }

    #[test]
    fn narrow_thermal_speed_reuses_code_twelve() {
        let truth = truth();
        let mag = field_series(truth.field);
        let config = FitConfig {
            min_thermal_speed: 26.0,
            ..FitConfig::default()
        };
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&mag), None, &params(), &config);
        assert_eq!(out.status.code(), 12);
    }

    #[test]
    fn bulk_velocity_outside_sampled_axis_range() {
        // Only the vx >= 0 half of velocity space is sampled, but the
        // distribution is centred at vx = -5.
        let truth = SyntheticDistribution {
            bulk: Vector3::new(-5.0, 3.0, 1.0),
            field: Vector3::new(0.0, 0.0, 4.0),
            ..truth()
        };
        let mut d = dist(&truth);
        d.samples.retain(|s| s.velocity.x >= 0.0);
        let mag = field_series(truth.field);
        let out = fit_distribution(&d, &fit_1d(), Some(&mag), None, &params(), &FitConfig::default());
        assert_eq!(out.status.code(), 4);
        assert_all_missing(&out);
    }

    #[test]
    fn bulk_speed_below_slowest_sample() {
        let truth = SyntheticDistribution {
            bulk: Vector3::new(3.0, -2.0, 1.0),
            field: Vector3::new(0.0, 0.0, 4.0),
            ..truth()
        };
        let d = truth.generate(start(), &InstrumentGrid::full_sphere(20.0, 150.0, 14, 16, 9), None);
        let mag = field_series(truth.field);
        let out = fit_distribution(&d, &fit_1d(), Some(&mag), None, &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::BulkVelocityOutOfBounds);
    }

    #[test]
    fn field_outside_measurement_window_is_ignored() {
        let truth = SyntheticDistribution {
            field: Vector3::new(0.0, 0.0, 4.0),
            ..truth()
        };
        let late = MagSeries::new(vec![MagSample {
            time: start() + Duration::hours(1),
            b: truth.field,
        }]);
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&late), Some(&late), &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::NoMagneticField);
    }

    #[test]
    fn density_formula_units() {
        // 1e-10 s^3/m^6 with 40 km/s thermal speeds.
        let n = number_density(1e-10, 40.0, 40.0);
        let expected = 1e-10 * PI.powf(1.5) * 6.4e13 * 1e-6;
        assert!(((n - expected) / expected).abs() < 1e-12);
    }

    #[test]
    fn low_amplitude_is_unrealistic_density() {
        let truth = truth();
        let mag = field_series(truth.field);
        let config = FitConfig {
            amplitude_ratio_min: 50.0,
            amplitude_ratio_max: 100.0,
            ..FitConfig::default()
        };
        let out = fit_distribution(&dist(&truth), &fit_1d(), Some(&mag), None, &params(), &config);
        assert_eq!(out.status, FitStatus::UnrealisticDensity);
        assert_all_missing(&out);
    }

    #[test]
    fn peak_gate_needs_a_peak_estimate() {
        // Slowest sample at 20 km/s, above the ~3.7 km/s bulk speed.
        let truth = SyntheticDistribution {
            bulk: Vector3::new(3.0, -2.0, 1.0),
            field: Vector3::new(0.0, 0.0, 4.0),
            ..truth()
        };
        let d = truth.generate(start(), &InstrumentGrid::full_sphere(20.0, 150.0, 14, 16, 9), None);
        let mag = field_series(truth.field);

        let with_peak = Fit1dSummary {
            v_peak: Some(truth.bulk.norm()),
            ..fit_1d()
        };
        let out = fit_distribution(&d, &with_peak, Some(&mag), None, &params(), &FitConfig::default());
        assert_eq!(out.status, FitStatus::ProtonPeakMissing);

        // Without a peak estimate the gate is skipped and the fit runs.
        let without_peak = Fit1dSummary {
            v_peak: None,
            ..fit_1d()
        };
        let out = fit_distribution(&d, &without_peak, Some(&mag), None, &params(), &FitConfig::default());
        assert_ne!(out.status, FitStatus::ProtonPeakMissing);
        assert_eq!(out.status, FitStatus::BulkVelocityOutOfBounds);
    }
}
