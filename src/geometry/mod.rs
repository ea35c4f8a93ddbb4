//! Planar projective geometry used by perspective calibration.
//!
//! This module provides [`Homography`], a 3×3 projective transform fitted from
//! exactly four point correspondences, and the collinearity test used to reject
//! corner configurations that cannot define one.
//!
//! The fit follows the usual direct linear transform recipe: both point sets are
//! Hartley-normalized (centroid at the origin, mean distance `sqrt(2)`), the
//! 8×8 system with `h33 = 1` is solved by LU decomposition, and the result is
//! denormalized. With four correspondences the system is square, so the fitted
//! transform reproduces every control point exactly up to rounding.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Number of correspondences a homography is fitted from.
pub const CORRESPONDENCE_COUNT: usize = 4;

/// Normalized cross-product magnitude below which three points are treated as collinear.
const COLLINEAR_EPS: f64 = 1e-9;

/// Mean distance from the centroid below which a point set is treated as coincident.
const COINCIDENT_EPS: f64 = 1e-12;

/// Smallest homogeneous weight accepted when projecting a point.
const MIN_WEIGHT: f64 = 1e-15;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("{0} points coincide")]
    CoincidentPoints(&'static str),
    #[error("{set} points {indices:?} are collinear")]
    CollinearPoints {
        set: &'static str,
        indices: [usize; 3],
    },
    #[error("Correspondence system is singular")]
    SingularSystem,
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
}

/// A 2D projective transform `p' ~ H * [x, y, 1]^T`.
///
/// The matrix is scaled so that `H[(2, 2)] == 1` whenever that entry is not
/// vanishingly small.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point2;
/// use plot_digitizer::geometry::Homography;
///
/// let src = [
///     Point2::new(0.0, 0.0),
///     Point2::new(2.0, 0.0),
///     Point2::new(2.0, 2.0),
///     Point2::new(0.0, 2.0),
/// ];
/// let dst = [
///     Point2::new(10.0, 10.0),
///     Point2::new(14.0, 10.0),
///     Point2::new(14.0, 14.0),
///     Point2::new(10.0, 14.0),
/// ];
/// let h = Homography::from_correspondences(&src, &dst).unwrap();
/// let p = h.apply(1.0, 1.0);
/// assert!((p.x - 12.0).abs() < 1e-9);
/// assert!((p.y - 12.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    /// Fits the homography mapping each `src[i]` onto `dst[i]`.
    ///
    /// No winding order is imposed; only the index correspondence matters.
    ///
    /// # Errors
    ///
    /// * [`GeometryError::CoincidentPoints`] if all points of either set collapse onto one spot.
    /// * [`GeometryError::CollinearPoints`] if any three points of either set are collinear.
    /// * [`GeometryError::SingularSystem`] if the linear system has no unique solution.
    /// * [`GeometryError::NumericalError`] if the solved transform is not finite or not invertible.
    pub fn from_correspondences(
        src: &[Point2<f64>; CORRESPONDENCE_COUNT],
        dst: &[Point2<f64>; CORRESPONDENCE_COUNT],
    ) -> Result<Self, GeometryError> {
        let (t_src, src_n) = normalize_points(src, "source")?;
        let (t_dst, dst_n) = normalize_points(dst, "destination")?;

        if let Some(indices) = collinear_triple(&src_n) {
            return Err(GeometryError::CollinearPoints {
                set: "source",
                indices,
            });
        }
        if let Some(indices) = collinear_triple(&dst_n) {
            return Err(GeometryError::CollinearPoints {
                set: "destination",
                indices,
            });
        }

        // Two rows per correspondence:
        //   [ x  y  1  0  0  0  -u*x  -u*y ] h = u
        //   [ 0  0  0  x  y  1  -v*x  -v*y ] h = v
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
            let (x, y) = (s.x, s.y);
            let (u, v) = (d.x, d.y);
            let r = 2 * i;

            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -u * x;
            a[(r, 7)] = -u * y;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -v * x;
            a[(r + 1, 7)] = -v * y;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b).ok_or(GeometryError::SingularSystem)?;
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

        if !h_norm.iter().all(|v| v.is_finite()) {
            return Err(GeometryError::NumericalError(
                "solved transform has non-finite entries".to_string(),
            ));
        }
        if h_norm.determinant().abs() < COLLINEAR_EPS {
            return Err(GeometryError::NumericalError(
                "solved transform is not invertible".to_string(),
            ));
        }

        // Denormalize: H = T_dst^-1 * H_norm * T_src
        let t_dst_inv = t_dst.try_inverse().ok_or_else(|| {
            GeometryError::NumericalError("destination normalization is singular".to_string())
        })?;
        let mut matrix = t_dst_inv * h_norm * t_src;

        let scale = matrix[(2, 2)];
        if scale.abs() > MIN_WEIGHT {
            matrix /= scale;
        }

        Ok(Self { matrix })
    }

    /// The underlying 3×3 matrix.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Applies the transform to `(x, y)`.
    ///
    /// Points on the transform's line at infinity (homogeneous weight ~ 0)
    /// have no finite image and come back as `(NaN, NaN)`.
    pub fn apply(&self, x: f64, y: f64) -> Point2<f64> {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        if p.z.abs() < MIN_WEIGHT {
            return Point2::new(f64::NAN, f64::NAN);
        }
        Point2::new(p.x / p.z, p.y / p.z)
    }

    /// The inverse transform, if the matrix is invertible.
    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().map(|m| {
            let scale = m[(2, 2)];
            if scale.abs() > MIN_WEIGHT {
                Self { matrix: m / scale }
            } else {
                Self { matrix: m }
            }
        })
    }
}

/// Returns `true` if `a`, `b`, `c` lie on one line, within `eps` on the cross product.
pub fn are_collinear(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>, eps: f64) -> bool {
    let ab = b - a;
    let ac = c - a;
    (ab.x * ac.y - ab.y * ac.x).abs() < eps
}

/// First triple of indices whose points are collinear, if any.
fn collinear_triple(points: &[Point2<f64>; CORRESPONDENCE_COUNT]) -> Option<[usize; 3]> {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.into_iter().find(|&[i, j, k]| {
        are_collinear(&points[i], &points[j], &points[k], COLLINEAR_EPS)
    })
}

/// Hartley normalization: translate the centroid to the origin and scale so the
/// mean distance from it is `sqrt(2)`.
fn normalize_points(
    points: &[Point2<f64>; CORRESPONDENCE_COUNT],
    set: &'static str,
) -> Result<(Matrix3<f64>, [Point2<f64>; CORRESPONDENCE_COUNT]), GeometryError> {
    if !points.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
        return Err(GeometryError::NumericalError(format!(
            "{set} points must be finite"
        )));
    }

    let n = CORRESPONDENCE_COUNT as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist < COINCIDENT_EPS {
        return Err(GeometryError::CoincidentPoints(set));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points.map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)));

    Ok((t, normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn trapezoid() -> [Point2<f64>; 4] {
        [
            Point2::new(50.0, 50.0),
            Point2::new(450.0, 50.0),
            Point2::new(400.0, 450.0),
            Point2::new(100.0, 450.0),
        ]
    }

    fn unit_square_10() -> [Point2<f64>; 4] {
        [
            Point2::new(0.0, 10.0),
            Point2::new(10.0, 10.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 0.0),
        ]
    }

    #[test]
    fn test_fit_reproduces_corners() {
        let src = trapezoid();
        let dst = unit_square_10();
        let h = Homography::from_correspondences(&src, &dst).unwrap();

        for (s, d) in src.iter().zip(dst.iter()) {
            let p = h.apply(s.x, s.y);
            assert_abs_diff_eq!(p.x, d.x, epsilon = 1e-9);
            assert_abs_diff_eq!(p.y, d.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fit_affine_case_is_affine() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(100.0, 0.0),
            Point2::new(100.0, 50.0),
            Point2::new(0.0, 50.0),
        ];
        let dst = src.map(|p| Point2::new(2.0 * p.x + 3.0, -p.y + 7.0));
        let h = Homography::from_correspondences(&src, &dst).unwrap();

        assert_abs_diff_eq!(h.matrix()[(2, 0)], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(h.matrix()[(2, 1)], 0.0, epsilon = 1e-12);

        let p = h.apply(25.0, 10.0);
        assert_abs_diff_eq!(p.x, 53.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.y, -3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_diagonal_intersection_maps_to_center() {
        // The diagonals of a quadrilateral meet at the image of the square's center.
        let src = trapezoid();
        let h = Homography::from_correspondences(&src, &unit_square_10()).unwrap();

        // TL(50,50)-BR(400,450) and TR(450,50)-BL(100,450) cross at x = 250.
        let slope = 400.0 / 350.0;
        let y = 50.0 + slope * (250.0 - 50.0);
        let p = h.apply(250.0, y);
        assert_abs_diff_eq!(p.x, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.y, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_inverse_round_trip() {
        let h = Homography::from_correspondences(&trapezoid(), &unit_square_10()).unwrap();
        let inv = h.inverse().unwrap();
        let p = h.apply(210.0, 320.0);
        let back = inv.apply(p.x, p.y);
        assert_abs_diff_eq!(back.x, 210.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back.y, 320.0, epsilon = 1e-9);
    }

    #[test]
    fn test_collinear_source_rejected() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(20.0, 20.0),
            Point2::new(0.0, 30.0),
        ];
        let err = Homography::from_correspondences(&src, &unit_square_10()).unwrap_err();
        assert_eq!(
            err,
            GeometryError::CollinearPoints {
                set: "source",
                indices: [0, 1, 2]
            }
        );
    }

    #[test]
    fn test_all_points_on_a_line_rejected() {
        let src = [
            Point2::new(0.0, 5.0),
            Point2::new(1.0, 5.0),
            Point2::new(2.0, 5.0),
            Point2::new(3.0, 5.0),
        ];
        assert!(matches!(
            Homography::from_correspondences(&src, &unit_square_10()),
            Err(GeometryError::CollinearPoints { .. })
        ));
    }

    #[test]
    fn test_collinear_destination_rejected() {
        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(5.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(0.0, 10.0),
        ];
        assert!(matches!(
            Homography::from_correspondences(&trapezoid(), &dst),
            Err(GeometryError::CollinearPoints {
                set: "destination",
                ..
            })
        ));
    }

    #[test]
    fn test_coincident_points_rejected() {
        let src = [Point2::new(3.0, 3.0); 4];
        assert_eq!(
            Homography::from_correspondences(&src, &unit_square_10()).unwrap_err(),
            GeometryError::CoincidentPoints("source")
        );
    }

    #[test]
    fn test_point_at_infinity_is_nan() {
        let h = Homography {
            matrix: Matrix3::new(
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                1.0, 0.0, 0.0,
            ),
        };
        let p = h.apply(0.0, 4.0);
        assert!(p.x.is_nan() && p.y.is_nan());
    }

    #[test]
    fn test_are_collinear() {
        let a = Point2::new(0.0, 0.0);
        let b = Point2::new(1.0, 2.0);
        assert!(are_collinear(&a, &b, &Point2::new(2.0, 4.0), 1e-12));
        assert!(!are_collinear(&a, &b, &Point2::new(2.0, 4.1), 1e-12));
    }
}
