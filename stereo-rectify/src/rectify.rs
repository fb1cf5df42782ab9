//! Stereo rectification geometry.
//!
//! Implements the Bouguet-style algorithm: the relative rotation between the
//! cameras is split into two half-rotations applied symmetrically, then both
//! cameras receive a common rotation bringing the new x-axis onto the
//! baseline so that epipolar lines become horizontal scanlines. The derived
//! projection matrices share one orientation and one focal length, with the
//! zero-disparity principal-point convention and the alpha = 0 (no padding)
//! field-of-view choice.

use nalgebra::{Matrix3, Matrix3x4, Rotation3, Vector3};

use crate::calib::StereoCalibration;
use crate::distortion::Distortion;
use crate::remap::PixelMap;
use crate::{RectifyError, Result};

/// Rectifying rotations and projection matrices for a stereo rig.
///
/// `p2[(0, 3)]` encodes `-baseline * focal_length` after rectification (for
/// a horizontal-baseline rig).
#[derive(Debug, Clone, PartialEq)]
pub struct RectifyTransforms {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
}

/// Map a distorted pixel to normalized, undistorted camera coordinates.
fn undistort_pixel(k: &Matrix3<f64>, d: &Distortion, u: f64, v: f64) -> (f64, f64) {
    let xd = (u - k[(0, 2)]) / k[(0, 0)];
    let yd = (v - k[(1, 2)]) / k[(1, 1)];
    d.undistort(xd, yd)
}

/// Undistort, rotate and reproject one pixel through `(r, fx..cy)`.
fn remap_pixel(
    k: &Matrix3<f64>,
    d: &Distortion,
    r: &Matrix3<f64>,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    u: f64,
    v: f64,
) -> (f64, f64) {
    let (x, y) = undistort_pixel(k, d, u, v);
    let w = r * Vector3::new(x, y, 1.0);
    (fx * w.x / w.z + cx, fy * w.y / w.z + cy)
}

struct InnerRect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

/// Largest axis-aligned rectangle whose every pixel has a valid source,
/// estimated from a 9x9 grid pushed through undistortion and rectification.
fn inner_rectangle(
    k: &Matrix3<f64>,
    d: &Distortion,
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
    image_size: (u32, u32),
) -> InnerRect {
    const N: usize = 9;
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let (fx, fy, cx, cy) = (p[(0, 0)], p[(1, 1)], p[(0, 2)], p[(1, 2)]);

    let mut ix0 = f64::NEG_INFINITY;
    let mut ix1 = f64::INFINITY;
    let mut iy0 = f64::NEG_INFINITY;
    let mut iy1 = f64::INFINITY;
    for yi in 0..N {
        for xi in 0..N {
            let u = xi as f64 * w / (N - 1) as f64;
            let v = yi as f64 * h / (N - 1) as f64;
            let (pu, pv) = remap_pixel(k, d, r, fx, fy, cx, cy, u, v);
            if xi == 0 {
                ix0 = ix0.max(pu);
            }
            if xi == N - 1 {
                ix1 = ix1.min(pu);
            }
            if yi == 0 {
                iy0 = iy0.max(pv);
            }
            if yi == N - 1 {
                iy1 = iy1.min(pv);
            }
        }
    }
    InnerRect {
        x0: ix0,
        y0: iy0,
        x1: ix1,
        y1: iy1,
    }
}

/// Smallest focal multiplier for which both inner rectangles cover the
/// output image. Axes whose ratio degenerates (zero denominator giving a
/// non-finite value) are skipped rather than poisoning the rest.
fn coverage_scale(ratios: [f64; 8]) -> Option<f64> {
    let s = ratios
        .into_iter()
        .filter(|r| r.is_finite())
        .fold(f64::MIN, f64::max);
    (s > 0.0).then_some(s)
}

/// Compute rectifying rotations and projection matrices for `cal`.
///
/// The zero-disparity convention is used (both principal points averaged)
/// and the common focal length is scaled so that every output pixel is
/// covered by the source image (alpha = 0: maximal crop, no invalid border).
pub fn stereo_rectify(cal: &StereoCalibration) -> Result<RectifyTransforms> {
    let nt = cal.translation.norm();
    if nt == 0.0 {
        return Err(RectifyError::InvalidCalibration {
            reason: "stereo baseline has zero length".to_string(),
        });
    }

    // Split the relative rotation in half; each camera rotates toward the
    // other by the same amount so both end up with one orientation.
    let om = Rotation3::from_matrix_unchecked(cal.rotation).scaled_axis();
    let r_half = Rotation3::new(om * -0.5);
    let t = r_half * cal.translation;

    // Dominant baseline axis: 0 for horizontal rigs, 1 for vertical ones.
    let idx = if t.x.abs() > t.y.abs() { 0 } else { 1 };
    let c = t[idx];

    // Global rotation bringing the new x-axis (or y-axis) onto the baseline.
    let mut uu = Vector3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };
    let mut ww = t.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / nt).acos() / nw;
    }
    let wr = Rotation3::new(ww);

    let r1 = wr * r_half.inverse();
    let r2 = wr * r_half;
    let t_rect = r2 * cal.translation;

    let (w, h) = cal.image_size;
    let (nx, ny) = (w as f64, h as f64);

    // Common focal length: the smaller cross-axis focal of the two cameras,
    // shrunk for barrel distortion (negative k1).
    let j = 1 - idx;
    let mut fc_new = f64::MAX;
    for (k, d) in [
        (&cal.left_intrinsics, &cal.left_distortion),
        (&cal.right_intrinsics, &cal.right_distortion),
    ] {
        let mut fc = k[(j, j)];
        if d.k1 < 0.0 {
            fc *= 1.0 + d.k1 * (nx * nx + ny * ny) / (4.0 * fc * fc);
        }
        fc_new = fc_new.min(fc);
    }

    // Principal points placing the undistorted image corners symmetrically.
    let mut cc = [(0.0f64, 0.0f64); 2];
    for (cam, (k, d, r)) in [
        (&cal.left_intrinsics, &cal.left_distortion, &r1),
        (&cal.right_intrinsics, &cal.right_distortion, &r2),
    ]
    .into_iter()
    .enumerate()
    {
        let mut sum_u = 0.0;
        let mut sum_v = 0.0;
        for i in 0..4 {
            let u = (i % 2) as f64 * (nx - 1.0);
            let v = (i / 2) as f64 * (ny - 1.0);
            let (pu, pv) = remap_pixel(k, d, r.matrix(), fc_new, fc_new, 0.0, 0.0, u, v);
            sum_u += pu;
            sum_v += pv;
        }
        cc[cam] = (
            (nx - 1.0) / 2.0 - sum_u / 4.0,
            (ny - 1.0) / 2.0 - sum_v / 4.0,
        );
    }
    // zero-disparity convention: identical principal points on both sides
    let cc_x = (cc[0].0 + cc[1].0) * 0.5;
    let cc_y = (cc[0].1 + cc[1].1) * 0.5;

    let mut p1 = Matrix3x4::zeros();
    p1[(0, 0)] = fc_new;
    p1[(1, 1)] = fc_new;
    p1[(0, 2)] = cc_x;
    p1[(1, 2)] = cc_y;
    p1[(2, 2)] = 1.0;
    let mut p2 = p1;
    p2[(idx, 3)] = t_rect[idx] * fc_new;

    // alpha = 0: grow the focal length until the inner valid rectangles of
    // both cameras cover the full output image.
    let inner1 = inner_rectangle(
        &cal.left_intrinsics,
        &cal.left_distortion,
        &r1.into_inner(),
        &p1,
        cal.image_size,
    );
    let inner2 = inner_rectangle(
        &cal.right_intrinsics,
        &cal.right_distortion,
        &r2.into_inner(),
        &p2,
        cal.image_size,
    );
    let ratios = [
        cc_x / (cc_x - inner1.x0),
        cc_y / (cc_y - inner1.y0),
        (nx - cc_x) / (inner1.x1 - cc_x),
        (ny - cc_y) / (inner1.y1 - cc_y),
        cc_x / (cc_x - inner2.x0),
        cc_y / (cc_y - inner2.y0),
        (nx - cc_x) / (inner2.x1 - cc_x),
        (ny - cc_y) / (inner2.y1 - cc_y),
    ];
    if let Some(s) = coverage_scale(ratios) {
        for p in [&mut p1, &mut p2] {
            p[(0, 0)] = fc_new * s;
            p[(1, 1)] = fc_new * s;
        }
        p2[(idx, 3)] *= s;
    }

    Ok(RectifyTransforms {
        r1: r1.into_inner(),
        r2: r2.into_inner(),
        p1,
        p2,
    })
}

/// Build the dense destination-to-source coordinate map for one camera.
///
/// For every destination pixel the inverse of `(P R)` yields a ray in the
/// source camera; forward lens distortion and the source camera matrix then
/// give the sub-pixel source coordinate.
pub(crate) fn build_map(
    k: &Matrix3<f64>,
    d: &Distortion,
    r: &Matrix3<f64>,
    p: &Matrix3x4<f64>,
    image_size: (u32, u32),
) -> Result<PixelMap> {
    let a = p.fixed_view::<3, 3>(0, 0).into_owned();
    let ir = (a * r)
        .try_inverse()
        .ok_or_else(|| RectifyError::InvalidCalibration {
            reason: "rectified projection matrix is singular".to_string(),
        })?;
    let (fx, fy, cx, cy) = (k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)]);

    let (w, h) = image_size;
    let npix = w as usize * h as usize;
    let mut map_x = Vec::with_capacity(npix);
    let mut map_y = Vec::with_capacity(npix);
    for v in 0..h {
        for u in 0..w {
            let ray = ir * Vector3::new(u as f64, v as f64, 1.0);
            let (xd, yd) = d.distort(ray.x / ray.z, ray.y / ray.z);
            map_x.push((fx * xd + cx) as f32);
            map_y.push((fy * yd + cy) as f32);
        }
    }
    Ok(PixelMap {
        width: w,
        height: h,
        map_x,
        map_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::synthetic_rig;
    use approx::assert_relative_eq;

    fn rotated_rig() -> StereoCalibration {
        let mut cal = synthetic_rig();
        cal.rotation = Rotation3::from_euler_angles(0.01, -0.02, 0.005).into_inner();
        cal.translation = Vector3::new(-50.0, 0.4, -1.2);
        cal
    }

    #[test]
    fn aligned_rig_yields_identity_rotations() {
        let t = stereo_rectify(&synthetic_rig()).unwrap();
        assert_relative_eq!(t.r1, Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(t.r2, Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(t.p1[(0, 0)], 1000.0, epsilon = 1e-9);
        assert_relative_eq!(t.p1[(0, 2)], 640.0, epsilon = 1e-9);
        assert_relative_eq!(t.p1[(1, 2)], 512.0, epsilon = 1e-9);
        assert_relative_eq!(t.p2[(0, 3)], -50_000.0, epsilon = 1e-6);
        assert_relative_eq!(t.p1, {
            let mut p = t.p2;
            p[(0, 3)] = 0.0;
            p
        });
    }

    #[test]
    fn rotations_stay_orthonormal_and_share_orientation() {
        let cal = rotated_rig();
        let t = stereo_rectify(&cal).unwrap();
        for r in [&t.r1, &t.r2] {
            assert_relative_eq!(r.transpose() * *r, Matrix3::identity(), epsilon = 1e-10);
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-10);
        }
        // both cameras end up with the same orientation: R1 = R2 * R
        assert_relative_eq!(t.r1, t.r2 * cal.rotation, epsilon = 1e-10);
    }

    #[test]
    fn rectified_baseline_is_along_x() {
        let cal = rotated_rig();
        let t = stereo_rectify(&cal).unwrap();
        let r2 = Rotation3::from_matrix_unchecked(t.r2);
        let t_rect = r2 * cal.translation;
        assert_relative_eq!(t_rect.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t_rect.z, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t_rect.norm(), cal.translation.norm(), epsilon = 1e-9);
    }

    #[test]
    fn coverage_scale_skips_degenerate_axes() {
        let mut ratios = [1.0; 8];
        ratios[2] = 1.2;
        assert_eq!(coverage_scale(ratios), Some(1.2));
        ratios[5] = f64::INFINITY;
        assert_eq!(coverage_scale(ratios), Some(1.2));
        ratios[6] = f64::NAN;
        assert_eq!(coverage_scale(ratios), Some(1.2));
        assert_eq!(coverage_scale([f64::INFINITY; 8]), None);
    }

    #[test]
    fn zero_baseline_is_rejected() {
        let mut cal = synthetic_rig();
        cal.translation = Vector3::zeros();
        assert!(stereo_rectify(&cal).is_err());
    }

    #[test]
    fn aligned_rig_maps_are_identity() {
        let cal = synthetic_rig();
        let t = stereo_rectify(&cal).unwrap();
        let map = build_map(
            &cal.left_intrinsics,
            &cal.left_distortion,
            &t.r1,
            &t.p1,
            cal.image_size,
        )
        .unwrap();
        let (w, _) = cal.image_size;
        for &(u, v) in &[(0u32, 0u32), (17, 3), (1279, 1023), (640, 512)] {
            let i = (v * w + u) as usize;
            assert_relative_eq!(map.map_x[i], u as f32, epsilon = 1e-3);
            assert_relative_eq!(map.map_y[i], v as f32, epsilon = 1e-3);
        }
    }

    #[test]
    fn horizontal_baseline_map_has_no_row_shift() {
        // pure horizontal baseline, zero distortion, but different principal
        // points: the right map must shift columns only.
        let mut cal = synthetic_rig();
        cal.right_intrinsics[(0, 2)] = 620.0;
        let t = stereo_rectify(&cal).unwrap();
        let map = build_map(
            &cal.right_intrinsics,
            &cal.right_distortion,
            &t.r2,
            &t.p2,
            cal.image_size,
        )
        .unwrap();
        let (w, h) = cal.image_size;
        for v in (0..h).step_by(97) {
            for u in (0..w).step_by(101) {
                let i = (v * w + u) as usize;
                assert_relative_eq!(map.map_y[i], v as f32, epsilon = 1e-3);
            }
        }
    }
}
