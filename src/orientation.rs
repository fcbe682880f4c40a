//! Orientation matrices and the rotation solvers used to build them.
//!
//! An orientation matrix is `A = U · B`: the fixed reciprocal metric B of the
//! target cell followed by a crystal rotation U. A Miller triple `h` is then
//! observed at `q = A · h`.

use nalgebra::{Rotation3, Unit};

use crate::lattice::UnitCell;
use crate::{Matrix3, Vector3};

/// Below this norm a vector is treated as degenerate.
const DEGENERATE_NORM: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationMatrix {
    rotation: Matrix3,
    matrix: Matrix3,
}

impl OrientationMatrix {
    pub fn new(rotation: Matrix3, b: &Matrix3) -> Self {
        Self {
            rotation,
            matrix: rotation * b,
        }
    }

    /// The full matrix A, mapping Miller indices to reciprocal coordinates.
    pub fn matrix(&self) -> &Matrix3 {
        &self.matrix
    }

    /// The crystal rotation U.
    pub fn rotation(&self) -> &Matrix3 {
        &self.rotation
    }

    /// Reciprocal position of a Miller vector.
    pub fn predict(&self, miller: &Vector3) -> Vector3 {
        self.matrix * miller
    }

    /// Fractional Miller indices of a reciprocal coordinate.
    pub fn fractional_miller(&self, q: &Vector3) -> Option<Vector3> {
        self.matrix.try_inverse().map(|inv| inv * q)
    }

    /// Real-space cell described by this matrix.
    pub fn unit_cell(&self) -> Option<UnitCell> {
        UnitCell::from_orientation(&self.matrix)
    }
}

/// Angle between two vectors in radians; `None` if either is degenerate.
pub fn angle_between(a: &Vector3, b: &Vector3) -> Option<f64> {
    if a.norm() < DEGENERATE_NORM || b.norm() < DEGENERATE_NORM {
        return None;
    }
    Some(a.cross(b).norm().atan2(a.dot(b)))
}

/// Rotation taking the direction of `from` onto the direction of `to`.
fn align_axis(from: &Vector3, to: &Vector3) -> Option<Rotation3<f64>> {
    if from.norm() < DEGENERATE_NORM || to.norm() < DEGENERATE_NORM {
        return None;
    }
    if let Some(r) = Rotation3::rotation_between(from, to) {
        return Some(r);
    }
    // Antiparallel: half-turn about any axis perpendicular to `from`.
    let helper = if from.x.abs() < 0.9 * from.norm() {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let axis = Unit::try_new(from.cross(&helper), DEGENERATE_NORM)?;
    Some(Rotation3::from_axis_angle(&axis, std::f64::consts::PI))
}

/// Solve for the rotation U that maps theoretical vectors `t1`, `t2` onto
/// observed vectors `v1`, `v2`.
///
/// `t1` is aligned exactly with `v1`; the remaining freedom (a twist about
/// `v1`) is chosen to bring `t2` as close as possible to `v2`. Returns the
/// rotation and the residual angle (radians) between `U·t2` and `v2`, or
/// `None` when the vectors are degenerate or collinear.
pub fn align_pair(
    t1: &Vector3,
    t2: &Vector3,
    v1: &Vector3,
    v2: &Vector3,
) -> Option<(Matrix3, f64)> {
    let first = align_axis(t1, v1)?;
    let axis = v1.try_normalize(DEGENERATE_NORM)?;

    let p = first * t2;
    let p_perp = p - axis * p.dot(&axis);
    let q_perp = v2 - axis * v2.dot(&axis);
    if p_perp.norm() < DEGENERATE_NORM || q_perp.norm() < DEGENERATE_NORM {
        return None;
    }
    let twist = axis.dot(&p_perp.cross(&q_perp)).atan2(p_perp.dot(&q_perp));
    let second = Rotation3::from_axis_angle(&Unit::new_unchecked(axis), twist);

    let u = (second * first).into_inner();
    let residual = angle_between(&(u * t2), v2)?;
    Some((u, residual))
}

/// Least-squares rotation taking theoretical directions onto observed ones.
///
/// Solves Wahba's problem by SVD of the cross-covariance H = Σ v̂ t̂ᵀ.
/// The result is a proper rotation with `observed ≈ R * theoretical`.
pub fn fit_rotation(theoretical: &[Vector3], observed: &[Vector3]) -> Option<Matrix3> {
    let mut h = Matrix3::zeros();
    let mut count = 0;
    for (t, v) in theoretical.iter().zip(observed.iter()) {
        let (Some(t), Some(v)) = (
            t.try_normalize(DEGENERATE_NORM),
            v.try_normalize(DEGENERATE_NORM),
        ) else {
            continue;
        };
        h += v * t.transpose();
        count += 1;
    }
    if count < 2 {
        return None;
    }
    let svd = h.svd(true, true);
    let (mut u, v_t) = (svd.u?, svd.v_t?);
    if (u * v_t).determinant() < 0.0 {
        // Reflection: flip the axis of the smallest singular value.
        let smallest = svd.singular_values.imin();
        let mut column = u.column_mut(smallest);
        column *= -1.0;
    }
    Some(u * v_t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation() -> Matrix3 {
        Rotation3::from_euler_angles(0.4, -0.7, 1.9).into_inner()
    }

    #[test]
    fn test_align_pair_recovers_rotation() {
        let r = rotation();
        let t1 = Vector3::new(0.02, 0.0, 0.0);
        let t2 = Vector3::new(0.01, 0.015, -0.004);
        let (u, residual) = align_pair(&t1, &t2, &(r * t1), &(r * t2)).unwrap();
        assert!(residual < 1e-9);
        assert!((u - r).norm() < 1e-9);
    }

    #[test]
    fn test_align_pair_antiparallel() {
        let t1 = Vector3::new(1.0, 0.0, 0.0);
        let t2 = Vector3::new(0.0, 1.0, 0.0);
        let v1 = Vector3::new(-1.0, 0.0, 0.0);
        let v2 = Vector3::new(0.0, 0.0, 1.0);
        let (u, residual) = align_pair(&t1, &t2, &v1, &v2).unwrap();
        assert!(residual < 1e-9);
        assert!((u * t1 - v1).norm() < 1e-9);
        assert!((u.determinant() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_align_pair_degenerate() {
        let t = Vector3::new(1.0, 0.0, 0.0);
        assert!(align_pair(&t, &(t * 2.0), &t, &Vector3::y()).is_none());
        assert!(align_pair(&Vector3::zeros(), &t, &t, &Vector3::y()).is_none());
    }

    #[test]
    fn test_align_pair_reports_residual() {
        // Theoretical pair at 90°, observed pair at 80°: residual is 10°.
        let t1 = Vector3::x();
        let t2 = Vector3::y();
        let v1 = Vector3::x();
        let ang = 80f64.to_radians();
        let v2 = Vector3::new(ang.cos(), ang.sin(), 0.0);
        let (_, residual) = align_pair(&t1, &t2, &v1, &v2).unwrap();
        assert!((residual.to_degrees() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rotation() {
        let r = rotation();
        let theoretical: Vec<Vector3> = vec![
            Vector3::new(1.0, 0.2, 0.0),
            Vector3::new(-0.3, 1.0, 0.5),
            Vector3::new(0.1, -0.4, 1.0),
            Vector3::new(0.7, 0.7, 0.1),
        ];
        let observed: Vec<Vector3> = theoretical.iter().map(|t| r * t * 0.01).collect();
        let fit = fit_rotation(&theoretical, &observed).unwrap();
        assert!((fit - r).norm() < 1e-9);
        assert!(fit_rotation(&theoretical[..1], &observed[..1]).is_none());
    }

    #[test]
    fn test_fractional_miller() {
        let cell = UnitCell::new([50.0, 60.0, 70.0, 90.0, 90.0, 90.0]).unwrap();
        let o = OrientationMatrix::new(rotation(), &cell.reciprocal_matrix());
        let h = Vector3::new(3.0, -2.0, 5.0);
        let back = o.fractional_miller(&o.predict(&h)).unwrap();
        assert!((back - h).norm() < 1e-9);
        let derived = o.unit_cell().unwrap();
        assert!((derived.b - 60.0).abs() < 1e-9);
    }
}
