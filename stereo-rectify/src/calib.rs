use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::distortion::Distortion;
use crate::{RectifyError, Result};

/// Canonical in-memory calibration of a two-camera rig.
///
/// Produced by the format loaders in [`crate::load`] and consumed by
/// [`crate::StereoRectifier`]. The record is never mutated in place;
/// rescaling goes through [`StereoCalibration::scaled_to`] which returns a
/// new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibration {
    /// 3x3 camera matrix of the left camera.
    pub left_intrinsics: Matrix3<f64>,
    /// 3x3 camera matrix of the right camera.
    pub right_intrinsics: Matrix3<f64>,
    pub left_distortion: Distortion,
    pub right_distortion: Distortion,
    /// Rotation of the right camera frame relative to the left.
    pub rotation: Matrix3<f64>,
    /// Position of the right camera origin in the left camera frame.
    pub translation: Vector3<f64>,
    /// Shared (width, height) in pixels.
    pub image_size: (u32, u32),
}

const ORTHONORMAL_EPS: f64 = 1e-5;

impl StereoCalibration {
    /// Check the calibration invariants.
    ///
    /// Image size must be positive, the rotation orthonormal with
    /// determinant near +1, and the focal lengths strictly positive.
    pub fn validate(&self) -> Result<()> {
        let (w, h) = self.image_size;
        if w == 0 || h == 0 {
            return Err(RectifyError::InvalidCalibration {
                reason: format!("image size {w}x{h} is not positive"),
            });
        }
        let rtr = self.rotation.transpose() * self.rotation;
        if (rtr - Matrix3::identity()).abs().max() > ORTHONORMAL_EPS {
            return Err(RectifyError::InvalidCalibration {
                reason: "rotation matrix is not orthonormal".to_string(),
            });
        }
        let det = self.rotation.determinant();
        if (det - 1.0).abs() > ORTHONORMAL_EPS {
            return Err(RectifyError::InvalidCalibration {
                reason: format!("rotation matrix determinant {det} is not +1"),
            });
        }
        for (name, k) in [
            ("left", &self.left_intrinsics),
            ("right", &self.right_intrinsics),
        ] {
            if k[(0, 0)] <= 0.0 || k[(1, 1)] <= 0.0 || k[(2, 2)] <= 0.0 {
                return Err(RectifyError::InvalidCalibration {
                    reason: format!("{name} camera matrix diagonal is not strictly positive"),
                });
            }
        }
        Ok(())
    }

    /// Horizontal scale factor implied by resizing to `target` width.
    pub fn scale_for(&self, target: Option<(u32, u32)>) -> f64 {
        match target {
            Some((tw, _)) => tw as f64 / self.image_size.0 as f64,
            None => 1.0,
        }
    }

    /// Return a new calibration consistent with imaging at `target` size.
    ///
    /// The horizontal scale is set by the width ratio; the remaining
    /// vertical extent is removed by a symmetric crop. A target which would
    /// require vertical padding instead of cropping is rejected with
    /// [`RectifyError::UnsupportedCrop`]. With `target == None` the record
    /// passes through numerically unchanged.
    pub fn scaled_to(&self, target: Option<(u32, u32)>) -> Result<StereoCalibration> {
        let (tw, th) = match target {
            Some(size) => size,
            None => return Ok(self.clone()),
        };
        let (w, h) = self.image_size;
        let scale = tw as f64 / w as f64;
        let h_crop = ((h as f64 * scale - th as f64) / 2.0).round();
        if h_crop < 0.0 {
            return Err(RectifyError::UnsupportedCrop {
                original_width: w,
                original_height: h,
                target_width: tw,
                target_height: th,
            });
        }
        let mut cal = self.clone();
        for k in [&mut cal.left_intrinsics, &mut cal.right_intrinsics] {
            let mut rows = k.fixed_view_mut::<2, 3>(0, 0);
            rows *= scale;
            k[(1, 2)] -= h_crop;
        }
        cal.image_size = (tw, th);
        Ok(cal)
    }

    /// Copy with skew and any other off-triangular intrinsics entries
    /// zeroed, keeping only focal lengths and principal points.
    pub fn with_triangular_intrinsics(&self) -> StereoCalibration {
        let tri = |k: &Matrix3<f64>| {
            Matrix3::new(
                k[(0, 0)],
                0.0,
                k[(0, 2)],
                0.0,
                k[(1, 1)],
                k[(1, 2)],
                0.0,
                0.0,
                1.0,
            )
        };
        let mut cal = self.clone();
        cal.left_intrinsics = tri(&self.left_intrinsics);
        cal.right_intrinsics = tri(&self.right_intrinsics);
        cal
    }
}

/// Build a camera matrix from focal lengths and principal point.
pub(crate) fn camera_matrix(fx: f64, fy: f64, cx: f64, cy: f64) -> Matrix3<f64> {
    Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
}

/// Test rig used across the crate's unit tests: zero distortion, identical
/// cameras, purely horizontal baseline.
#[cfg(test)]
pub(crate) fn synthetic_rig() -> StereoCalibration {
    StereoCalibration {
        left_intrinsics: camera_matrix(1000.0, 1000.0, 640.0, 512.0),
        right_intrinsics: camera_matrix(1000.0, 1000.0, 640.0, 512.0),
        left_distortion: Distortion::zero(),
        right_distortion: Distortion::zero(),
        rotation: Matrix3::identity(),
        translation: Vector3::new(-50.0, 0.0, 0.0),
        image_size: (1280, 1024),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn validate_accepts_synthetic_rig() {
        synthetic_rig().validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_rotation() {
        let mut cal = synthetic_rig();
        cal.rotation[(0, 0)] = 2.0;
        assert!(matches!(
            cal.validate(),
            Err(RectifyError::InvalidCalibration { .. })
        ));
    }

    #[test]
    fn validate_rejects_reflection() {
        let mut cal = synthetic_rig();
        // orthonormal but determinant -1
        cal.rotation = Matrix3::new(-1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        assert!(cal.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_size_and_negative_focal() {
        let mut cal = synthetic_rig();
        cal.image_size = (0, 1024);
        assert!(cal.validate().is_err());

        let mut cal = synthetic_rig();
        cal.left_intrinsics[(0, 0)] = -1000.0;
        assert!(cal.validate().is_err());
    }

    #[test]
    fn scale_pass_through_is_identity() {
        let cal = synthetic_rig();
        assert_eq!(cal.scaled_to(None).unwrap(), cal);
        // same target size: scale 1, zero crop
        assert_eq!(cal.scaled_to(Some(cal.image_size)).unwrap(), cal);
    }

    #[test]
    fn scale_halves_intrinsics() {
        let cal = synthetic_rig();
        let scaled = cal.scaled_to(Some((640, 512))).unwrap();
        assert_relative_eq!(scaled.left_intrinsics[(0, 0)], 500.0);
        assert_relative_eq!(scaled.left_intrinsics[(1, 1)], 500.0);
        assert_relative_eq!(scaled.left_intrinsics[(0, 2)], 320.0);
        assert_relative_eq!(scaled.left_intrinsics[(1, 2)], 256.0);
        assert_eq!(scaled.image_size, (640, 512));
        // input untouched
        assert_relative_eq!(cal.left_intrinsics[(0, 0)], 1000.0);
    }

    #[test]
    fn scale_applies_vertical_crop() {
        let cal = synthetic_rig();
        // width unchanged, 24 rows removed: symmetric crop of 12
        let scaled = cal.scaled_to(Some((1280, 1000))).unwrap();
        assert_relative_eq!(scaled.left_intrinsics[(1, 2)], 500.0);
        assert_relative_eq!(scaled.right_intrinsics[(1, 2)], 500.0);
        assert_relative_eq!(scaled.left_intrinsics[(0, 0)], 1000.0);
    }

    #[test]
    fn triangular_intrinsics_drops_skew() {
        let mut cal = synthetic_rig();
        cal.left_intrinsics[(0, 1)] = 2.5;
        cal.right_intrinsics[(1, 0)] = -0.5;
        let tri = cal.with_triangular_intrinsics();
        assert_eq!(tri.left_intrinsics[(0, 1)], 0.0);
        assert_eq!(tri.right_intrinsics[(1, 0)], 0.0);
        // focal lengths and principal points survive
        assert_relative_eq!(tri.left_intrinsics[(0, 0)], 1000.0);
        assert_relative_eq!(tri.left_intrinsics[(0, 2)], 640.0);
        assert_relative_eq!(tri.right_intrinsics[(1, 2)], 512.0);
        // input untouched
        assert_eq!(cal.left_intrinsics[(0, 1)], 2.5);
    }

    #[test]
    fn negative_crop_is_rejected() {
        let cal = synthetic_rig();
        let err = cal.scaled_to(Some((1280, 1100))).unwrap_err();
        assert!(matches!(err, RectifyError::UnsupportedCrop { .. }));
    }
}
