//! Bi-Maxwellian velocity distribution.
//!
//! ```text
//! f(v) = A exp(-((vx-ux)/w⊥)² - ((vy-uy)/w⊥)² - ((vz-uz)/w∥)²)
//! ```
//!
//! The `z` axis is the parallel direction, so the model is only physically
//! meaningful once velocities have been rotated into the field-aligned frame.

use nalgebra::{Vector3, Vector6};

use crate::domain::BiMaxwellianParams;

/// Evaluate the distribution at `v`.
pub fn bi_maxwellian_3d(v: &Vector3<f64>, p: &BiMaxwellianParams) -> f64 {
    p.amplitude * (-exponent(v, p)).exp()
}

/// Partial derivatives of `f` with respect to
/// `(A, w⊥, w∥, ux, uy, uz)` at `v`.
pub fn bi_maxwellian_gradient(v: &Vector3<f64>, p: &BiMaxwellianParams) -> Vector6<f64> {
    let d = v - p.bulk;
    let e = (-exponent(v, p)).exp();
    let f = p.amplitude * e;

    let wp2 = p.vth_perp * p.vth_perp;
    let wz2 = p.vth_par * p.vth_par;

    Vector6::new(
        e,
        f * 2.0 * (d.x * d.x + d.y * d.y) / (wp2 * p.vth_perp),
        f * 2.0 * d.z * d.z / (wz2 * p.vth_par),
        f * 2.0 * d.x / wp2,
        f * 2.0 * d.y / wp2,
        f * 2.0 * d.z / wz2,
    )
}

fn exponent(v: &Vector3<f64>, p: &BiMaxwellianParams) -> f64 {
    let d = v - p.bulk;
    let x = d.x / p.vth_perp;
    let y = d.y / p.vth_perp;
    let z = d.z / p.vth_par;
    x * x + y * y + z * z
}
