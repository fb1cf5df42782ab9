//! JSON calibration files.
//!
//! Layout: `data.intrinsics` is a two-element array (left, right) of
//! `{f: [fx, fy], c: [cx, cy], k: [..]}`; `data.extrinsics` holds the
//! translation `T` and an axis-angle rotation `om`.

use nalgebra::{Rotation3, Vector3};
use serde::Deserialize;

use crate::calib::{camera_matrix, StereoCalibration};
use crate::distortion::Distortion;
use crate::{RectifyError, Result};

#[derive(Debug, Deserialize)]
struct CalibFile {
    data: CalibData,
}

#[derive(Debug, Deserialize)]
struct CalibData {
    width: u32,
    height: u32,
    intrinsics: Vec<CameraIntrinsics>,
    extrinsics: Extrinsics,
}

#[derive(Debug, Deserialize)]
struct CameraIntrinsics {
    f: [f64; 2],
    c: [f64; 2],
    #[serde(default)]
    k: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct Extrinsics {
    #[serde(rename = "T")]
    t: [f64; 3],
    om: [f64; 3],
}

pub(super) fn parse(buf: &str) -> Result<StereoCalibration> {
    let file: CalibFile = serde_json::from_str(buf)?;
    let data = file.data;
    if data.intrinsics.len() != 2 {
        return Err(RectifyError::InvalidCalibration {
            reason: format!(
                "expected 2 cameras in \"intrinsics\", found {}",
                data.intrinsics.len()
            ),
        });
    }
    let kmat = |cam: &CameraIntrinsics| camera_matrix(cam.f[0], cam.f[1], cam.c[0], cam.c[1]);
    let rotation = Rotation3::new(Vector3::from(data.extrinsics.om)).into_inner();
    Ok(StereoCalibration {
        left_intrinsics: kmat(&data.intrinsics[0]),
        right_intrinsics: kmat(&data.intrinsics[1]),
        left_distortion: Distortion::from_slice(&data.intrinsics[0].k)?,
        right_distortion: Distortion::from_slice(&data.intrinsics[1].k)?,
        rotation,
        translation: Vector3::from(data.extrinsics.t),
        image_size: (data.width, data.height),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) const SAMPLE: &str = r#"{
        "data": {
            "width": 1280,
            "height": 1024,
            "intrinsics": [
                {"f": [1035.0, 1036.5], "c": [636.0, 510.5],
                 "k": [-0.02, 0.01, 0.0001, -0.0002, 0.0]},
                {"f": [1034.0, 1035.0], "c": [641.5, 513.0],
                 "k": [-0.018, 0.009, 0.0, 0.0, 0.0]}
            ],
            "extrinsics": {
                "T": [-4.35, 0.02, -0.05],
                "om": [0.001, -0.002, 0.0005]
            }
        }
    }"#;

    #[test]
    fn sample_parses() {
        let cal = parse(SAMPLE).unwrap();
        cal.validate().unwrap();
        assert_eq!(cal.image_size, (1280, 1024));
        assert_relative_eq!(cal.left_intrinsics[(0, 0)], 1035.0);
        assert_relative_eq!(cal.left_intrinsics[(1, 2)], 510.5);
        assert_relative_eq!(cal.right_intrinsics[(0, 2)], 641.5);
        assert_relative_eq!(cal.left_distortion.k1, -0.02);
        assert_relative_eq!(cal.translation.x, -4.35);
        // small axis-angle vector: rotation close to, but not exactly, identity
        assert_relative_eq!(cal.rotation.determinant(), 1.0, epsilon = 1e-12);
        assert!(cal.rotation[(0, 1)] != 0.0);
    }

    #[test]
    fn one_camera_is_rejected() {
        let buf = r#"{"data": {"width": 64, "height": 48, "intrinsics": [
            {"f": [10.0, 10.0], "c": [32.0, 24.0], "k": []}
        ], "extrinsics": {"T": [-1.0, 0.0, 0.0], "om": [0.0, 0.0, 0.0]}}}"#;
        assert!(matches!(
            parse(buf),
            Err(RectifyError::InvalidCalibration { .. })
        ));
    }

    #[test]
    fn missing_key_is_a_serde_error() {
        let buf = r#"{"data": {"width": 64, "height": 48}}"#;
        assert!(matches!(parse(buf), Err(RectifyError::SerdeJson { .. })));
    }
}
