// convert.rs — Pixel type conversions between Image<T> types.
//
// The thermal pipeline moves between three representations:
//   u16 raw sensor values    → f32 for warping and filtering
//   u16 raw sensor values    → u8 grayscale for features and snapshots
//   f32 filter responses     → u8 for visual inspection
//
// The Pixel trait's to_f32/from_f32 do RAW conversion (u16 3000 → 3000.0).
// The range-mapping functions here stretch a chosen interval onto 0..255.

use crate::image::{Image, Pixel};

/// Convert any image to f32, preserving raw values.
pub fn to_f32<T: Pixel>(src: &Image<T>) -> Image<f32> {
    src.map(Pixel::to_f32)
}

/// Map raw values linearly from `[lo, hi]` onto `[0, 255]`.
///
/// Values outside the interval saturate. A degenerate interval (`hi <= lo`)
/// yields a black image rather than dividing by zero.
pub fn raw_to_gray(src: &Image<u16>, lo: f32, hi: f32) -> Image<u8> {
    if hi <= lo {
        return Image::new(src.width(), src.height());
    }
    let scale = 255.0 / (hi - lo);
    src.map(|v| u8::from_f32((v as f32 - lo) * scale))
}

/// Stretch an f32 image so its minimum maps to 0 and its maximum to 255.
///
/// NaN pixels become 0. A constant image maps to all zeros.
pub fn normalize_to_u8(src: &Image<f32>) -> Image<u8> {
    let (lo, hi) = src
        .as_slice()
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !(hi > lo) {
        return Image::new(src.width(), src.height());
    }
    let scale = 255.0 / (hi - lo);
    src.map(|v| {
        if v.is_finite() {
            u8::from_f32((v - lo) * scale)
        } else {
            0
        }
    })
}

/// Generic conversion between any two Pixel types via f32 as intermediate.
///
/// The compiler generates a specialised copy for each (S, D) pair in use,
/// so this costs nothing over a hand-written u16→u8 or f32→u16 loop.
pub fn convert_image<S: Pixel, D: Pixel>(src: &Image<S>) -> Image<D> {
    src.map(|v| D::from_f32(v.to_f32()))
}
