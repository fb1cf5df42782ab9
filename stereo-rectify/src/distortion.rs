//! Plumb-bob lens distortion with the optional rational extension.
//!
//! Coefficients follow the OpenCV ordering `[k1, k2, p1, p2, k3, k4, k5,
//! k6]`. The forward model maps undistorted normalized image coordinates to
//! distorted ones; the inverse has no closed form and is solved by a damped
//! fixed-point iteration.

use serde::{Deserialize, Serialize};

use crate::{RectifyError, Result};

/// Lens distortion coefficients (radial + tangential + rational terms).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

/// Iteration bound for the fixed-point inversion. OpenCV's default is five
/// iterations with no convergence test; the larger bound with an early exit
/// below keeps strongly-distorted edges accurate.
const UNDISTORT_MAX_ITER: usize = 20;
const UNDISTORT_EPS: f64 = 1e-12;

impl Distortion {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build from a coefficient vector of length 0, 4, 5 or 8.
    ///
    /// Missing trailing terms are zero. Other lengths are rejected since the
    /// coefficient ordering would be ambiguous.
    pub fn from_slice(coeffs: &[f64]) -> Result<Self> {
        if ![0, 4, 5, 8].contains(&coeffs.len()) {
            return Err(RectifyError::InvalidCalibration {
                reason: format!(
                    "distortion vector has {} coefficients (expected 0, 4, 5 or 8)",
                    coeffs.len()
                ),
            });
        }
        let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            k1: c(0),
            k2: c(1),
            p1: c(2),
            p2: c(3),
            k3: c(4),
            k4: c(5),
            k5: c(6),
            k6: c(7),
        })
    }

    pub fn is_linear(&self) -> bool {
        *self == Self::default()
    }

    /// Forward model: undistorted normalized coordinates to distorted ones.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let kr = (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6);
        let a1 = 2.0 * x * y;
        let xd = x * kr + self.p1 * a1 + self.p2 * (r2 + 2.0 * x * x);
        let yd = y * kr + self.p1 * (r2 + 2.0 * y * y) + self.p2 * a1;
        (xd, yd)
    }

    /// Inverse model: distorted normalized coordinates to undistorted ones.
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        if self.is_linear() {
            return (xd, yd);
        }
        let mut x = xd;
        let mut y = yd;
        for _ in 0..UNDISTORT_MAX_ITER {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let icdist = (1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6)
                / (1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6);
            let delta_x = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let delta_y = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let x_next = (xd - delta_x) * icdist;
            let y_next = (yd - delta_y) * icdist;
            let step2 = (x_next - x) * (x_next - x) + (y_next - y) * (y_next - y);
            x = x_next;
            y = y_next;
            if step2 < UNDISTORT_EPS * UNDISTORT_EPS {
                break;
            }
        }
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn roundtrip(d: &Distortion, tol: f64) {
        // sample well inside the unit image circle
        for &x in &[-0.4, -0.1, 0.0, 0.2, 0.45] {
            for &y in &[-0.35, 0.0, 0.1, 0.4] {
                let (xd, yd) = d.distort(x, y);
                let (xu, yu) = d.undistort(xd, yd);
                assert_relative_eq!(xu, x, epsilon = tol);
                assert_relative_eq!(yu, y, epsilon = tol);
            }
        }
    }

    #[test]
    fn zero_distortion_is_identity() {
        let d = Distortion::zero();
        let (xd, yd) = d.distort(0.25, -0.125);
        assert_eq!((xd, yd), (0.25, -0.125));
        assert!(d.is_linear());
    }

    #[test]
    fn radial_tangential_roundtrip() {
        let d = Distortion::from_slice(&[-0.28, 0.07, 1.8e-4, -2.1e-4, 0.0]).unwrap();
        roundtrip(&d, 1e-9);
    }

    #[test]
    fn rational_roundtrip() {
        let d =
            Distortion::from_slice(&[0.4, -0.2, 1e-3, -1e-3, 0.05, 0.7, -0.1, 0.02]).unwrap();
        roundtrip(&d, 1e-8);
    }

    #[test]
    fn four_term_vector_zero_fills() {
        let d = Distortion::from_slice(&[0.1, -0.05, 0.001, 0.002]).unwrap();
        assert_eq!(d.k3, 0.0);
        assert_eq!(d.k6, 0.0);
    }

    #[test]
    fn bad_length_is_rejected() {
        assert!(Distortion::from_slice(&[0.1, 0.2, 0.3]).is_err());
    }
}
