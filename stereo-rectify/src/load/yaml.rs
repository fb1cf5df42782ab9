//! YAML calibration files in the OpenCV matrix-storage dialect.
//!
//! The dialect is not plain YAML: it opens with a `%YAML:1.0` directive and
//! tags matrices with `!!opencv-matrix`. Both are stripped before handing
//! the document to a regular YAML parser; matrices then deserialize as
//! `{rows, cols, dt, data}` mappings.

use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;

use crate::calib::StereoCalibration;
use crate::distortion::Distortion;
use crate::{RectifyError, Result};

#[derive(Debug, Deserialize)]
struct CalibFile {
    #[serde(rename = "Camera.width")]
    width: u32,
    #[serde(rename = "Camera.height")]
    height: u32,
    #[serde(rename = "M1")]
    m1: StoredMatrix,
    #[serde(rename = "M2")]
    m2: StoredMatrix,
    #[serde(rename = "D1")]
    d1: StoredMatrix,
    #[serde(rename = "D2")]
    d2: StoredMatrix,
    #[serde(rename = "R")]
    r: StoredMatrix,
    #[serde(rename = "T")]
    t: StoredMatrix,
}

#[derive(Debug, Deserialize)]
struct StoredMatrix {
    rows: usize,
    cols: usize,
    #[serde(default)]
    #[allow(dead_code)]
    dt: Option<String>,
    data: Vec<f64>,
}

impl StoredMatrix {
    fn check(&self, name: &str, rows: usize, cols: usize) -> Result<()> {
        if self.rows != rows || self.cols != cols || self.data.len() != rows * cols {
            return Err(RectifyError::InvalidCalibration {
                reason: format!(
                    "matrix {name} has shape {}x{} with {} values (expected {rows}x{cols})",
                    self.rows,
                    self.cols,
                    self.data.len()
                ),
            });
        }
        Ok(())
    }

    fn matrix3(&self, name: &str) -> Result<Matrix3<f64>> {
        self.check(name, 3, 3)?;
        Ok(Matrix3::from_row_slice(&self.data))
    }

    /// Coefficient rows and columns are used interchangeably on disk.
    fn vector(&self, name: &str, len: usize) -> Result<&[f64]> {
        if self.rows.min(self.cols) != 1 || self.data.len() != len {
            return Err(RectifyError::InvalidCalibration {
                reason: format!(
                    "matrix {name} has shape {}x{} with {} values (expected a \
                     {len}-element vector)",
                    self.rows,
                    self.cols,
                    self.data.len()
                ),
            });
        }
        Ok(&self.data)
    }
}

/// Drop `%`-directives and OpenCV matrix tags so the document parses as
/// standard YAML.
fn sanitize(buf: &str) -> String {
    buf.lines()
        .filter(|line| !line.trim_start().starts_with('%'))
        .map(|line| line.replace("!!opencv-matrix", ""))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(super) fn parse(buf: &str) -> Result<StereoCalibration> {
    let file: CalibFile = serde_yaml::from_str(&sanitize(buf))?;
    let t = file.t.vector("T", 3)?;
    Ok(StereoCalibration {
        left_intrinsics: file.m1.matrix3("M1")?,
        right_intrinsics: file.m2.matrix3("M2")?,
        left_distortion: Distortion::from_slice(file.d1.vector("D1", file.d1.data.len())?)?,
        right_distortion: Distortion::from_slice(file.d2.vector("D2", file.d2.data.len())?)?,
        rotation: file.r.matrix3("R")?,
        translation: Vector3::new(t[0], t[1], t[2]),
        image_size: (file.width, file.height),
    })
}
