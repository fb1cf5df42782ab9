//! Stereo image rectification from two-camera rig calibration.
//!
//! Given the intrinsic and extrinsic calibration of a stereo rig, this crate
//! computes rectifying rotations, projection matrices and dense per-pixel
//! coordinate maps which bring a left/right image pair into a common,
//! row-aligned epipolar geometry. A degraded "pseudo" mode is available for
//! already-near-aligned rigs where only a translational correction is
//! applied.

#![deny(rust_2018_idioms)]

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RectifyError {
    #[error("unsupported calibration format: {extension:?}")]
    UnsupportedFormat { extension: String },
    #[error(
        "unsupported crop: resizing {original_width}x{original_height} to \
         {target_width}x{target_height} requires growing the image vertically; \
         only symmetric vertical cropping is implemented"
    )]
    UnsupportedCrop {
        original_width: u32,
        original_height: u32,
        target_width: u32,
        target_height: u32,
    },
    #[error("unsupported rectification mode {mode:?} (expected \"conventional\" or \"pseudo\")")]
    UnsupportedMode { mode: String },
    #[error("invalid calibration: {reason}")]
    InvalidCalibration { reason: String },
    #[error("missing calibration field: {field}")]
    MissingCalibrationField { field: String },
    #[error("image size mismatch: expected {}x{}, got {}x{}", expected.0, expected.1, actual.0, actual.1)]
    ImageSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("serde_json error: {source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("serde_yaml error: {source}")]
    SerdeYaml {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("malformed number in calibration file: {source}")]
    ParseFloat {
        #[from]
        source: std::num::ParseFloatError,
    },
}

pub type Result<M> = std::result::Result<M, RectifyError>;

mod calib;
pub use crate::calib::StereoCalibration;

pub mod distortion;
pub use crate::distortion::Distortion;

mod rectify;
pub use crate::rectify::{stereo_rectify, RectifyTransforms};

mod remap;
pub use crate::remap::{remap, translate, Interpolation, PixelMap};

mod rectifier;
pub use crate::rectifier::{RectifiedCalibration, RectifyConfig, RectifyMode, StereoRectifier};

pub mod load;
