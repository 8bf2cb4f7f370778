//! Pixel conversions from float cutouts to 8-bit images.
//!
//! Array row 0 is the bottom of the sky image, so every conversion flips
//! vertically on the way out.

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{ArrayView2, ArrayView3};

/// Cutouts whose finite range is narrower than this are not stretched.
pub const DEGENERATE_EPSILON: f32 = 1e-10;
/// Central interval, in percent, that the asinh stretch normalizes against.
pub const STRETCH_PERCENT: f32 = 95.0;
/// Softening parameter of the asinh curve.
const ASINH_A: f32 = 0.1;
const PLACEHOLDER_SIDE: u32 = 100;
const PLACEHOLDER_GRAY: u8 = 128;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StretchError {
    #[error("cutout has no finite samples")]
    NoFiniteSamples,
    #[error("percentile interval [{vmin}, {vmax}] is empty")]
    EmptyInterval { vmin: f32, vmax: f32 },
}

/// Outcome of rendering a single-band cutout.
#[derive(Debug, Clone)]
pub enum SingleBand {
    Stretched(GrayImage),
    /// Linear min-max fallback after the asinh stretch failed.
    Linear(GrayImage),
    /// All-NaN or flat input, replaced by [`degenerate_placeholder`].
    Degenerate(GrayImage),
}

impl SingleBand {
    pub fn into_image(self) -> GrayImage {
        match self {
            Self::Stretched(image) | Self::Linear(image) | Self::Degenerate(image) => image,
        }
    }
}

/// Flat mid-gray square shown instead of an unstretchable cutout.
pub fn degenerate_placeholder() -> GrayImage {
    GrayImage::from_pixel(PLACEHOLDER_SIDE, PLACEHOLDER_SIDE, Luma([PLACEHOLDER_GRAY]))
}

/// Renders one band with an asinh stretch on a reversed gray scale, so faint
/// signal is light and bright signal is dark.
pub fn render_single_band(cutout: ArrayView2<'_, f32>) -> SingleBand {
    let finite = finite_sorted(cutout);
    let (Some(&min), Some(&max)) = (finite.first(), finite.last()) else {
        return SingleBand::Degenerate(degenerate_placeholder());
    };
    if max - min < DEGENERATE_EPSILON {
        return SingleBand::Degenerate(degenerate_placeholder());
    }

    match asinh_stretch(cutout, &finite) {
        Ok(image) => SingleBand::Stretched(image),
        Err(err) => {
            tracing::warn!(error = %err, "asinh stretch failed, using linear scaling");
            SingleBand::Linear(linear_stretch(cutout, min, max))
        }
    }
}

/// `finite` must be the sorted finite samples of `cutout`.
pub fn asinh_stretch(
    cutout: ArrayView2<'_, f32>,
    finite: &[f32],
) -> Result<GrayImage, StretchError> {
    let tail = (100.0 - STRETCH_PERCENT) / 2.0;
    let vmin = percentile(finite, tail).ok_or(StretchError::NoFiniteSamples)?;
    let vmax = percentile(finite, 100.0 - tail).ok_or(StretchError::NoFiniteSamples)?;
    let width = vmax - vmin;
    if !(width.is_finite() && width > 0.0) {
        return Err(StretchError::EmptyInterval { vmin, vmax });
    }

    let norm = (1.0 / ASINH_A).asinh();
    Ok(to_reversed_gray(cutout, |value| {
        let x = ((sanitize(value) - vmin) / width).clamp(0.0, 1.0);
        (x / ASINH_A).asinh() / norm
    }))
}

/// Plain min-max scaling. Equal bounds are replaced by 0 and 1.
pub fn linear_stretch(cutout: ArrayView2<'_, f32>, min: f32, max: f32) -> GrayImage {
    let (vmin, vmax) = if min == max { (0.0, 1.0) } else { (min, max) };
    to_reversed_gray(cutout, |value| {
        ((sanitize(value) - vmin) / (vmax - vmin)).clamp(0.0, 1.0)
    })
}

/// Converts `(bands, height, width)` unit-interval floats to RGB.
pub fn render_multi_band(cutout: ArrayView3<'_, f32>) -> Option<RgbImage> {
    let (bands, height, width) = cutout.dim();
    if bands != 3 || height == 0 || width == 0 {
        return None;
    }
    Some(RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let row = height - 1 - y as usize;
        let col = x as usize;
        Rgb([
            to_byte(cutout[[0, row, col]]),
            to_byte(cutout[[1, row, col]]),
            to_byte(cutout[[2, row, col]]),
        ])
    }))
}

/// Linear-interpolated percentile of sorted samples, `q` in 0..=100.
pub fn percentile(sorted: &[f32], q: f32) -> Option<f32> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f32;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

fn finite_sorted(cutout: ArrayView2<'_, f32>) -> Vec<f32> {
    let mut values: Vec<f32> = cutout.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(f32::total_cmp);
    values
}

/// NaN maps to 0, infinities to the unit bounds.
fn sanitize(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else if value == f32::INFINITY {
        1.0
    } else if value == f32::NEG_INFINITY {
        0.0
    } else {
        value
    }
}

fn to_reversed_gray(cutout: ArrayView2<'_, f32>, level: impl Fn(f32) -> f32) -> GrayImage {
    let (height, width) = cutout.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let value = cutout[[height - 1 - y as usize, x as usize]];
        let level = level(value).clamp(0.0, 1.0);
        Luma([(255.0 * (1.0 - level)).round() as u8])
    })
}

fn to_byte(value: f32) -> u8 {
    // NaN saturates to 0.
    (value * 255.0).clamp(0.0, 255.0) as u8
}
