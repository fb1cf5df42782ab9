//! INI calibration files.
//!
//! `[StereoLeft]` and `[StereoRight]` sections carry per-camera scalars
//! (`fc_x`, `fc_y`, `cc_x`, `cc_y`, `kc_0`..`kc_7`, `res_x`, `res_y`); the
//! right section additionally carries the rig pose as `R_0`..`R_8`
//! (row-major rotation) and `T_0`..`T_2`.

use std::collections::HashMap;

use nalgebra::{Matrix3, Vector3};

use crate::calib::{camera_matrix, StereoCalibration};
use crate::distortion::Distortion;
use crate::{RectifyError, Result};

struct Sections(HashMap<String, HashMap<String, String>>);

impl Sections {
    fn scan(buf: &str) -> Sections {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current = String::new();
        for line in buf.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = name.trim().to_string();
                sections.entry(current.clone()).or_default();
            } else if let Some((key, value)) = line.split_once('=') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Sections(sections)
    }

    fn float(&self, section: &str, key: &str) -> Result<f64> {
        let raw = self
            .0
            .get(section)
            .and_then(|s| s.get(key))
            .ok_or_else(|| RectifyError::MissingCalibrationField {
                field: format!("[{section}] {key}"),
            })?;
        Ok(raw.parse::<f64>()?)
    }

    fn camera(&self, section: &str) -> Result<(Matrix3<f64>, Distortion)> {
        let k = camera_matrix(
            self.float(section, "fc_x")?,
            self.float(section, "fc_y")?,
            self.float(section, "cc_x")?,
            self.float(section, "cc_y")?,
        );
        let mut kc = [0.0; 8];
        for (i, c) in kc.iter_mut().enumerate() {
            *c = self.float(section, &format!("kc_{i}"))?;
        }
        Ok((k, Distortion::from_slice(&kc)?))
    }
}

pub(super) fn parse(buf: &str) -> Result<StereoCalibration> {
    let sections = Sections::scan(buf);

    let (left_intrinsics, left_distortion) = sections.camera("StereoLeft")?;
    let (right_intrinsics, right_distortion) = sections.camera("StereoRight")?;

    let mut r = [0.0; 9];
    for (i, v) in r.iter_mut().enumerate() {
        *v = sections.float("StereoRight", &format!("R_{i}"))?;
    }
    let mut t = [0.0; 3];
    for (i, v) in t.iter_mut().enumerate() {
        *v = sections.float("StereoRight", &format!("T_{i}"))?;
    }

    let width = sections.float("StereoLeft", "res_x")?;
    let height = sections.float("StereoLeft", "res_y")?;

    Ok(StereoCalibration {
        left_intrinsics,
        right_intrinsics,
        left_distortion,
        right_distortion,
        rotation: Matrix3::from_row_slice(&r),
        translation: Vector3::from(t),
        image_size: (width.round() as u32, height.round() as u32),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) const SAMPLE: &str = "\
; stereo endoscope, factory calibration
[StereoLeft]
fc_x = 1035.0
fc_y = 1036.5
cc_x = 636.0
cc_y = 510.5
kc_0 = -0.02
kc_1 = 0.01
kc_2 = 0.0001
kc_3 = -0.0002
kc_4 = 0.0
kc_5 = 0.0
kc_6 = 0.0
kc_7 = 0.0
res_x = 1280
res_y = 1024

[StereoRight]
fc_x = 1034.0
fc_y = 1035.0
cc_x = 641.5
cc_y = 513.0
kc_0 = -0.018
kc_1 = 0.009
kc_2 = 0.0
kc_3 = 0.0
kc_4 = 0.0
kc_5 = 0.0
kc_6 = 0.0
kc_7 = 0.0
res_x = 1280
res_y = 1024
R_0 = 1.0
R_1 = 0.0
R_2 = 0.0
R_3 = 0.0
R_4 = 1.0
R_5 = 0.0
R_6 = 0.0
R_7 = 0.0
R_8 = 1.0
T_0 = -4.35
T_1 = 0.02
T_2 = -0.05
";

    #[test]
    fn sample_parses() {
        let cal = parse(SAMPLE).unwrap();
        cal.validate().unwrap();
        assert_eq!(cal.image_size, (1280, 1024));
        assert_relative_eq!(cal.left_intrinsics[(0, 0)], 1035.0);
        assert_relative_eq!(cal.right_intrinsics[(1, 2)], 513.0);
        assert_relative_eq!(cal.left_distortion.k1, -0.02);
        assert_relative_eq!(cal.right_distortion.k2, 0.009);
        assert_eq!(cal.rotation, Matrix3::identity());
        assert_relative_eq!(cal.translation.z, -0.05);
    }

    #[test]
    fn missing_key_names_the_field() {
        let truncated = SAMPLE.replace("fc_y = 1036.5\n", "");
        let err = parse(&truncated).unwrap_err();
        match err {
            RectifyError::MissingCalibrationField { field } => {
                assert_eq!(field, "[StereoLeft] fc_y");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_number_is_reported() {
        let bad = SAMPLE.replace("fc_x = 1035.0", "fc_x = not-a-number");
        assert!(matches!(
            parse(&bad),
            Err(RectifyError::ParseFloat { .. })
        ));
    }
}
