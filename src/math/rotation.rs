//! Field-aligned frame rotation.

use std::f64::consts::PI;

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Rotation matrix `R` such that `R * b` points along `+z` with length `|b|`.
///
/// The transpose of `R` maps field-aligned vectors back into the original
/// frame. `b` must be non-zero; a zero vector yields the identity.
pub fn field_aligned_rotation(b: &Vector3<f64>) -> Matrix3<f64> {
    let zhat = Vector3::z();
    match Rotation3::rotation_between(b, &zhat) {
        Some(rot) => rot.into_inner(),
        // `b` is anti-parallel to z: any half turn about an axis in the xy-plane works.
        None => Rotation3::from_axis_angle(&Vector3::x_axis(), PI).into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_aligned(b: Vector3<f64>) {
        let r = field_aligned_rotation(&b);
        let out = r * b;
        let scale = b.norm();
        assert!(out.x.abs() < 1e-10 * scale, "x not zero for {b:?}: {out:?}");
        assert!(out.y.abs() < 1e-10 * scale, "y not zero for {b:?}: {out:?}");
        assert!((out.z - scale).abs() < 1e-10 * scale, "z != |b| for {b:?}: {out:?}");

        // Orthonormal: R^T R = I.
        let eye = r.transpose() * r;
        assert!((eye - Matrix3::identity()).abs().max() < 1e-12);
    }

    #[test]
    fn aligns_generic_vectors() {
        for b in [
            Vector3::new(3.0, -4.0, 12.0),
            Vector3::new(-1.0, 2.0, -0.5),
            Vector3::new(1e-3, 0.0, 0.0),
            Vector3::new(0.0, 250.0, 0.0),
        ] {
            assert_aligned(b);
        }
    }

    #[test]
    fn parallel_and_antiparallel_vectors() {
        assert_aligned(Vector3::new(0.0, 0.0, 7.0));
        assert_aligned(Vector3::new(0.0, 0.0, -7.0));
        let r = field_aligned_rotation(&Vector3::new(0.0, 0.0, 2.0));
        assert!((r - Matrix3::identity()).abs().max() < 1e-12);
    }

    #[test]
    fn transpose_undoes_rotation() {
        let b = Vector3::new(5.0, 1.0, -3.0);
        let r = field_aligned_rotation(&b);
        let v = Vector3::new(400.0, -30.0, 12.0);
        let back = r.transpose() * (r * v);
        assert!((back - v).norm() < 1e-9);
    }
}
