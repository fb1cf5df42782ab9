//! Image resampling through dense coordinate maps.
//!
//! A [`PixelMap`] stores, for every destination pixel, the sub-pixel source
//! coordinate it should be sampled from. Sources outside the input image
//! fill with zero (black). Interpolation is either nearest-neighbor, for
//! label or disparity-like data whose values must never be blended, or a
//! Catmull-Rom bicubic kernel for photometric images.

use image::{ImageBuffer, Pixel, Primitive};
use num_traits::ToPrimitive;

/// Dense destination-to-source coordinate map, row-major, one entry per
/// output pixel. Immutable once built.
#[derive(Debug, Clone)]
pub struct PixelMap {
    pub width: u32,
    pub height: u32,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl PixelMap {
    #[inline]
    pub fn source(&self, u: u32, v: u32) -> (f32, f32) {
        let i = (v * self.width + u) as usize;
        (self.map_x[i], self.map_y[i])
    }
}

/// Resampling policy applied by [`remap`] and [`translate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Pure pixel lookup; never blends values.
    #[default]
    Nearest,
    /// Bicubic (Catmull-Rom, a = -0.75) kernel.
    Cubic,
}

/// Resample `src` through `map`, producing an image of the map's shape.
pub fn remap<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    map: &PixelMap,
    interpolation: Interpolation,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let mut dst = ImageBuffer::new(map.width, map.height);
    for v in 0..map.height {
        for u in 0..map.width {
            let (sx, sy) = map.source(u, v);
            write_sample(src, sx, sy, interpolation, dst.get_pixel_mut(u, v));
        }
    }
    dst
}

/// Rigidly translate `src` by `(dx, dy)` pixels, zero-filling the borders.
pub fn translate<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    dx: f64,
    dy: f64,
    interpolation: Interpolation,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let (w, h) = src.dimensions();
    let mut dst = ImageBuffer::new(w, h);
    for v in 0..h {
        for u in 0..w {
            let sx = (u as f64 - dx) as f32;
            let sy = (v as f64 - dy) as f32;
            write_sample(src, sx, sy, interpolation, dst.get_pixel_mut(u, v));
        }
    }
    dst
}

/// Sample `src` at `(sx, sy)` into `out`. Out-of-bounds sources leave `out`
/// untouched (the destination buffer starts out zeroed).
fn write_sample<P>(
    src: &ImageBuffer<P, Vec<P::Subpixel>>,
    sx: f32,
    sy: f32,
    interpolation: Interpolation,
    out: &mut P,
) where
    P: Pixel,
{
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    if !(0.0..=(w - 1) as f32).contains(&sx) || !(0.0..=(h - 1) as f32).contains(&sy) {
        return;
    }
    match interpolation {
        Interpolation::Nearest => {
            let xi = sx.round() as u32;
            let yi = sy.round() as u32;
            *out = *src.get_pixel(xi.min(w - 1), yi.min(h - 1));
        }
        Interpolation::Cubic => bicubic(src, sx, sy, out),
    }
}

/// Catmull-Rom weight, a = -0.75 (the coefficient of OpenCV's INTER_CUBIC).
fn cubic_weight(t: f32) -> f32 {
    const A: f32 = -0.75;
    let t = t.abs();
    if t <= 1.0 {
        ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0
    } else if t < 2.0 {
        ((A * t - 5.0 * A) * t + 8.0 * A) * t - 4.0 * A
    } else {
        0.0
    }
}

fn bicubic<P>(src: &ImageBuffer<P, Vec<P::Subpixel>>, sx: f32, sy: f32, out: &mut P)
where
    P: Pixel,
{
    let (w, h) = src.dimensions();
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;

    let lo = P::Subpixel::DEFAULT_MIN_VALUE.to_f32().unwrap_or(f32::MIN);
    let hi = P::Subpixel::DEFAULT_MAX_VALUE.to_f32().unwrap_or(f32::MAX);

    let nch = P::CHANNEL_COUNT as usize;
    let mut acc = [0.0f32; 4];
    debug_assert!(nch <= acc.len());

    for j in -1i64..=2 {
        let wy = cubic_weight(j as f32 - fy);
        if wy == 0.0 {
            continue;
        }
        let yy = y0 as i64 + j;
        if yy < 0 || yy >= h as i64 {
            continue; // constant zero border contributes nothing
        }
        for i in -1i64..=2 {
            let wx = cubic_weight(i as f32 - fx);
            if wx == 0.0 {
                continue;
            }
            let xx = x0 as i64 + i;
            if xx < 0 || xx >= w as i64 {
                continue;
            }
            let pix = src.get_pixel(xx as u32, yy as u32);
            let channels = pix.channels();
            for (c, a) in acc.iter_mut().take(nch).enumerate() {
                *a += wx * wy * channels[c].to_f32().unwrap_or(0.0);
            }
        }
    }

    let channels = out.channels_mut();
    for c in 0..nch {
        let v = acc[c].clamp(lo, hi);
        if let Some(s) = num_traits::cast(v) {
            channels[c] = s;
        }
    }
}
