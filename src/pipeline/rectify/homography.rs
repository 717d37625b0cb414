//! Projective transform estimation via normalized DLT.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use thiserror::Error;

const EPS: f64 = 1e-12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("too few correspondences: need {needed}, got {got}")]
    TooFewPoints { needed: usize, got: usize },
    #[error("source and target point counts differ ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("degenerate transform: {0}")]
    Degenerate(String),
}

/// Invertible 3×3 projective map with its inverse cached.
#[derive(Clone, Debug, PartialEq)]
pub struct Homography {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(m: Matrix3<f64>) -> Option<Self> {
        let inverse = m.try_inverse()?;
        if !m.iter().chain(inverse.iter()).all(|v| v.is_finite()) {
            return None;
        }
        Some(Self {
            forward: m,
            inverse,
        })
    }

    /// Least-squares transform with `dst ≈ H(src)` from four or more correspondences.
    ///
    /// `min_conditioning` bounds the ratio of smallest to largest singular value of
    /// the transform in normalized coordinates; below it the fit is rejected.
    pub fn estimate(
        src: &[[f64; 2]],
        dst: &[[f64; 2]],
        min_conditioning: f64,
    ) -> Result<Self, HomographyError> {
        if src.len() != dst.len() {
            return Err(HomographyError::LengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        let n = src.len();
        if n < 4 {
            return Err(HomographyError::TooFewPoints { needed: 4, got: n });
        }

        let (t_src, src_n) = normalize_points(src);
        let (t_dst, dst_n) = normalize_points(dst);

        let mut a = DMatrix::<f64>::zeros(2 * n, 9);
        for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
            let (sx, sy) = (s[0], s[1]);
            let (dx, dy) = (d[0], d[1]);

            a[(2 * i, 3)] = -sx;
            a[(2 * i, 4)] = -sy;
            a[(2 * i, 5)] = -1.0;
            a[(2 * i, 6)] = dy * sx;
            a[(2 * i, 7)] = dy * sy;
            a[(2 * i, 8)] = dy;

            a[(2 * i + 1, 0)] = sx;
            a[(2 * i + 1, 1)] = sy;
            a[(2 * i + 1, 2)] = 1.0;
            a[(2 * i + 1, 6)] = -dx * sx;
            a[(2 * i + 1, 7)] = -dx * sy;
            a[(2 * i + 1, 8)] = -dx;
        }

        // Null vector of A is the eigenvector of AᵀA with the smallest eigenvalue.
        let eig = SymmetricEigen::new(a.transpose() * &a);
        let min_idx = eig
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|x, y| x.1.total_cmp(y.1))
            .map(|(idx, _)| idx)
            .ok_or_else(|| HomographyError::Degenerate("empty eigen decomposition".into()))?;
        let h = eig.eigenvectors.column(min_idx);
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let singular = h_norm.singular_values();
        let max_sv = singular.max();
        let min_sv = singular.min();
        if !(max_sv > EPS) || min_sv / max_sv < min_conditioning {
            return Err(HomographyError::Degenerate(format!(
                "singular value ratio {:.3e} below {min_conditioning:.1e}",
                if max_sv > EPS { min_sv / max_sv } else { 0.0 }
            )));
        }

        let t_dst_inv = t_dst
            .try_inverse()
            .ok_or_else(|| {
                HomographyError::Degenerate("target normalization not invertible".into())
            })?;
        let mut forward = t_dst_inv * h_norm * t_src;
        let scale = if forward[(2, 2)].abs() > EPS {
            forward[(2, 2)]
        } else {
            forward.norm()
        };
        forward /= scale;

        Self::from_matrix(forward)
            .ok_or_else(|| HomographyError::Degenerate("transform not invertible".into()))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.forward
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &Homography) -> Homography {
        Homography {
            forward: next.forward * self.forward,
            inverse: self.inverse * next.inverse,
        }
    }

    /// Maps a point; `None` when it lands on the line at infinity.
    pub fn apply(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        project(&self.forward, x, y)
    }

    pub fn apply_inverse(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        project(&self.inverse, x, y)
    }

    /// Homogeneous scale of the inverse image of `(x, y)`; its sign tells which
    /// side of the vanishing line the source point lies on.
    pub fn inverse_weight(&self, x: f64, y: f64) -> f64 {
        (self.inverse * Vector3::new(x, y, 1.0))[2]
    }
}

fn project(m: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let v = m * Vector3::new(x, y, 1.0);
    let w = v[2];
    if !w.is_finite() || w.abs() <= EPS {
        return None;
    }
    let p = [v[0] / w, v[1] / w];
    (p[0].is_finite() && p[1].is_finite()).then_some(p)
}

/// Translate the centroid to the origin and scale the mean distance to √2.
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > EPS {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    (t, normalized)
}

/// Ratio of minor to major standard deviation of a point cloud: 0 for collinear
/// points, 1 for an isotropic spread.
pub fn point_spread(pts: &[[f64; 2]]) -> f64 {
    if pts.len() < 2 {
        return 0.0;
    }
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in pts {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let half_trace = (sxx + syy) / (2.0 * n);
    let det = (sxx * syy - sxy * sxy) / (n * n);
    let disc = (half_trace * half_trace - det).max(0.0).sqrt();
    let major = half_trace + disc;
    let minor = (half_trace - disc).max(0.0);
    if major <= EPS {
        0.0
    } else {
        (minor / major).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[rustfmt::skip]
    fn sample_transform() -> Matrix3<f64> {
        Matrix3::new(
            2.1, 0.15, 40.0,
            -0.1, 1.9, 25.0,
            0.0004, -0.0002, 1.0,
        )
    }

    #[test]
    fn recovers_exact_transform_from_four_points() {
        let truth = Homography::from_matrix(sample_transform()).unwrap();
        let src = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];
        let dst: Vec<[f64; 2]> = src.iter().map(|p| truth.apply(p[0], p[1]).unwrap()).collect();

        let est = Homography::estimate(&src, &dst, 1e-9).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let p = est.apply(s[0], s[1]).unwrap();
            assert_relative_eq!(p[0], d[0], epsilon = 1e-6);
            assert_relative_eq!(p[1], d[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn forward_then_inverse_is_identity() {
        let h = Homography::from_matrix(sample_transform()).unwrap();
        let q = h.apply(37.0, 81.0).unwrap();
        let back = h.apply_inverse(q[0], q[1]).unwrap();
        assert_relative_eq!(back[0], 37.0, epsilon = 1e-9);
        assert_relative_eq!(back[1], 81.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_too_few_points() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        assert_eq!(
            Homography::estimate(&pts, &pts, 1e-9),
            Err(HomographyError::TooFewPoints { needed: 4, got: 3 })
        );
    }

    #[test]
    fn rejects_collinear_source() {
        let src = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        let dst = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [5.0, 5.0]];
        assert!(matches!(
            Homography::estimate(&src, &dst, 1e-6),
            Err(HomographyError::Degenerate(_))
        ));
        assert!(point_spread(&src) < 1e-9);
    }

    #[test]
    fn spread_of_square_is_one() {
        let square = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert_relative_eq!(point_spread(&square), 1.0, epsilon = 1e-12);
    }
}
