//! Construct-once stereo rectifier.
//!
//! [`StereoRectifier`] is built from a calibration record plus a
//! [`RectifyConfig`] and afterwards only exposes `&self` methods; the
//! coordinate maps are immutable, so one rectifier can be shared across
//! threads. A resolution change means constructing a new rectifier, never
//! mutating an existing one.

use std::path::Path;
use std::str::FromStr;

use image::{ImageBuffer, Pixel};
use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::calib::StereoCalibration;
use crate::rectify::{build_map, stereo_rectify, RectifyTransforms};
use crate::remap::{remap, translate, Interpolation, PixelMap};
use crate::{load, RectifyError, Result};

/// Rectification strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RectifyMode {
    /// Full geometric rectification through dense coordinate maps.
    #[default]
    Conventional,
    /// Translation-only correction for already-near-aligned rigs. Does not
    /// correct lens distortion or rotational misalignment.
    Pseudo,
}

impl FromStr for RectifyMode {
    type Err = RectifyError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "conventional" => Ok(RectifyMode::Conventional),
            "pseudo" => Ok(RectifyMode::Pseudo),
            other => Err(RectifyError::UnsupportedMode {
                mode: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RectifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RectifyMode::Conventional => write!(f, "conventional"),
            RectifyMode::Pseudo => write!(f, "pseudo"),
        }
    }
}

/// Configuration for [`StereoRectifier::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RectifyConfig {
    /// Optional resize/crop target; `None` keeps the calibrated size.
    pub target_size: Option<(u32, u32)>,
    pub mode: RectifyMode,
    pub interpolation: Interpolation,
    /// Zero out skew-bearing intrinsics entries before rectification.
    pub triangular_intrinsics: bool,
}

/// Rectified rig parameters for downstream consumers (e.g. triangulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectifiedCalibration {
    pub left_intrinsics: Matrix3<f64>,
    pub right_intrinsics: Matrix3<f64>,
    /// 4x4 transform with identity rotation; the translation column is the
    /// rectified baseline (conventional mode) or the raw rig translation
    /// (pseudo mode).
    pub extrinsics: Matrix4<f64>,
    /// baseline times focal length, at the (possibly rescaled) image size
    pub bf: f64,
    /// `bf` with the resize scale undone
    pub bf_orig: f64,
    pub image_size: (u32, u32),
}

#[derive(Debug)]
pub struct ConventionalRectifier {
    transforms: RectifyTransforms,
    left_map: PixelMap,
    right_map: PixelMap,
    image_size: (u32, u32),
    scale: f64,
    interpolation: Interpolation,
}

#[derive(Debug)]
pub struct PseudoRectifier {
    calibration: StereoCalibration,
    offset: (f64, f64),
    scale: f64,
    interpolation: Interpolation,
}

/// Stereo rectifier; one variant per strategy, fixed at construction.
#[derive(Debug)]
pub enum StereoRectifier {
    Conventional(ConventionalRectifier),
    Pseudo(PseudoRectifier),
}

impl StereoRectifier {
    /// Load a calibration file (format chosen by extension) and construct.
    pub fn from_calibration_file(path: impl AsRef<Path>, config: RectifyConfig) -> Result<Self> {
        let cal = load::load_calibration(path.as_ref())?;
        Self::new(cal, config)
    }

    pub fn new(cal: StereoCalibration, config: RectifyConfig) -> Result<Self> {
        cal.validate()?;
        let scale = cal.scale_for(config.target_size);
        if let Some(target) = config.target_size {
            tracing::debug!(scale, ?target, "rescaling calibration");
        }
        let cal = cal.scaled_to(config.target_size)?;
        let cal = if config.triangular_intrinsics {
            cal.with_triangular_intrinsics()
        } else {
            cal
        };

        match config.mode {
            RectifyMode::Conventional => {
                let transforms = stereo_rectify(&cal)?;
                let left_map = build_map(
                    &cal.left_intrinsics,
                    &cal.left_distortion,
                    &transforms.r1,
                    &transforms.p1,
                    cal.image_size,
                )?;
                let right_map = build_map(
                    &cal.right_intrinsics,
                    &cal.right_distortion,
                    &transforms.r2,
                    &transforms.p2,
                    cal.image_size,
                )?;
                Ok(StereoRectifier::Conventional(ConventionalRectifier {
                    transforms,
                    left_map,
                    right_map,
                    image_size: cal.image_size,
                    scale,
                    interpolation: config.interpolation,
                }))
            }
            RectifyMode::Pseudo => {
                tracing::warn!(
                    "pseudo rectification in use: only a translational \
                     misalignment is corrected and epipolar alignment is not \
                     guaranteed"
                );
                let offset = (
                    cal.left_intrinsics[(0, 2)] - cal.right_intrinsics[(0, 2)],
                    cal.left_intrinsics[(1, 2)] - cal.right_intrinsics[(1, 2)],
                );
                Ok(StereoRectifier::Pseudo(PseudoRectifier {
                    offset,
                    calibration: cal,
                    scale,
                    interpolation: config.interpolation,
                }))
            }
        }
    }

    pub fn mode(&self) -> RectifyMode {
        match self {
            StereoRectifier::Conventional(_) => RectifyMode::Conventional,
            StereoRectifier::Pseudo(_) => RectifyMode::Pseudo,
        }
    }

    /// Output image size (also the required input size).
    pub fn image_size(&self) -> (u32, u32) {
        match self {
            StereoRectifier::Conventional(c) => c.image_size,
            StereoRectifier::Pseudo(p) => p.calibration.image_size,
        }
    }

    /// Rectify one frame pair.
    ///
    /// Input images must match [`Self::image_size`]; a mismatch is a caller
    /// contract violation and fails fast rather than resampling wrongly.
    pub fn rectify<P>(
        &self,
        left: &ImageBuffer<P, Vec<P::Subpixel>>,
        right: &ImageBuffer<P, Vec<P::Subpixel>>,
    ) -> Result<(
        ImageBuffer<P, Vec<P::Subpixel>>,
        ImageBuffer<P, Vec<P::Subpixel>>,
    )>
    where
        P: Pixel,
    {
        let expected = self.image_size();
        for img in [left, right] {
            let actual = img.dimensions();
            if actual != expected {
                return Err(RectifyError::ImageSizeMismatch { expected, actual });
            }
        }
        match self {
            StereoRectifier::Conventional(c) => Ok((
                remap(left, &c.left_map, c.interpolation),
                remap(right, &c.right_map, c.interpolation),
            )),
            StereoRectifier::Pseudo(p) => {
                let (dx, dy) = p.offset;
                Ok((left.clone(), translate(right, dx, dy, p.interpolation)))
            }
        }
    }

    /// Derive the rectified calibration summary.
    pub fn rectified_calibration(&self) -> RectifiedCalibration {
        match self {
            StereoRectifier::Conventional(c) => {
                let p1 = &c.transforms.p1;
                let p2 = &c.transforms.p2;
                // recover the metric baseline from the encoded -b*f term
                let t = Vector3::new(-p2[(0, 3)], -p2[(1, 3)], -p2[(2, 3)]) / p2[(0, 0)];
                let mut extrinsics = Matrix4::identity();
                extrinsics.fixed_view_mut::<3, 1>(0, 3).copy_from(&t);
                let bf = t.norm() * p1[(0, 0)];
                RectifiedCalibration {
                    left_intrinsics: p1.fixed_view::<3, 3>(0, 0).into_owned(),
                    right_intrinsics: p2.fixed_view::<3, 3>(0, 0).into_owned(),
                    extrinsics,
                    bf,
                    bf_orig: bf / c.scale,
                    image_size: c.image_size,
                }
            }
            StereoRectifier::Pseudo(p) => {
                let cal = &p.calibration;
                let mut extrinsics = Matrix4::identity();
                extrinsics
                    .fixed_view_mut::<3, 1>(0, 3)
                    .copy_from(&cal.translation);
                let bf = cal.translation.norm() * cal.left_intrinsics[(0, 0)];
                RectifiedCalibration {
                    left_intrinsics: cal.left_intrinsics,
                    right_intrinsics: cal.right_intrinsics,
                    extrinsics,
                    bf,
                    bf_orig: bf / p.scale,
                    image_size: cal.image_size,
                }
            }
        }
    }
}
