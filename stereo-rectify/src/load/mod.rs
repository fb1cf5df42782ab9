//! Calibration file loaders.
//!
//! Three on-disk formats are supported, distinguished by file extension:
//!
//! * `.json` with per-camera `f`/`c`/`k` intrinsics and an axis-angle
//!   relative pose,
//! * `.ini` with `[StereoLeft]`/`[StereoRight]` sections of scalar keys,
//! * `.yaml`/`.yml` in the OpenCV matrix-storage dialect (`M1`, `M2`,
//!   `D1`, `D2`, `R`, `T`).
//!
//! All loaders normalize into [`StereoCalibration`] and validate it.

use std::path::Path;

use crate::calib::StereoCalibration;
use crate::{RectifyError, Result};

mod ini;
mod json;
mod yaml;

/// Load and validate a stereo calibration, dispatching on the extension.
pub fn load_calibration(path: &Path) -> Result<StereoCalibration> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let buf = std::fs::read_to_string(path)?;
    let cal = match extension.as_str() {
        "json" => json::parse(&buf)?,
        "ini" => ini::parse(&buf)?,
        "yaml" | "yml" => yaml::parse(&buf)?,
        _ => return Err(RectifyError::UnsupportedFormat { extension }),
    };
    cal.validate()?;
    Ok(cal)
}
