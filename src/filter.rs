// filter.rs — Non-linear filters and the tracking preprocessing chain.
//
//   median_blur_3x3()  salt-and-pepper suppression for the 8-bit frame
//   unsharp_mask()     out = amount·src + (1 − amount)·gauss(src)
//   dilate_3x3()       grey dilation (3×3 maximum)
//   local_maxima()     pixels equal to their dilation and strictly positive
//   preprocess()       median → CLAHE → unsharp, run before FAST
//
// Borders replicate the edge pixel, as in convolution.rs.

use serde::{Deserialize, Serialize};

use crate::convolution::gaussian_blur;
use crate::histeq::{clahe, ClaheConfig};
use crate::image::{Image, Pixel};

/// 3×3 median filter.
pub fn median_blur_3x3(src: &Image<u8>) -> Image<u8> {
    Image::from_fn(src.width(), src.height(), |x, y| {
        let mut window = [0u8; 9];
        let mut i = 0;
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                window[i] = src.get_clamped(x as isize + dx, y as isize + dy);
                i += 1;
            }
        }
        window.sort_unstable();
        window[4]
    })
}

/// Sharpen by subtracting a Gaussian-blurred copy:
/// `amount · src + (1 − amount) · blur(src, sigma)`.
pub fn unsharp_mask(src: &Image<u8>, sigma: f32, amount: f32) -> Image<u8> {
    let blurred = gaussian_blur(src, sigma);
    src.zip_map(&blurred, |s, b| u8::from_f32(amount * s as f32 + (1.0 - amount) * b))
}

/// Grey dilation with a 3×3 square structuring element.
pub fn dilate_3x3(src: &Image<f32>) -> Image<f32> {
    Image::from_fn(src.width(), src.height(), |x, y| {
        let mut m = f32::NEG_INFINITY;
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                m = m.max(src.get_clamped(x as isize + dx, y as isize + dy));
            }
        }
        m
    })
}

/// Pixels that equal the maximum of their 3×3 neighbourhood and are
/// strictly positive, in raster order.
///
/// A plateau of equal values yields every pixel of the plateau.
pub fn local_maxima(src: &Image<f32>) -> Vec<(usize, usize)> {
    let dilated = dilate_3x3(src);
    src.pixels()
        .filter(|&(x, y, v)| v > 0.0 && v == dilated.get(x, y))
        .map(|(x, y, _)| (x, y))
        .collect()
}

/// Parameters of the preprocessing chain run before feature detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Apply the 3×3 median filter.
    pub median: bool,
    pub clahe: ClaheConfig,
    /// Gaussian sigma of the unsharp mask.
    pub sharpen_sigma: f32,
    /// Weight of the original image in the unsharp mask; 1.0 disables it.
    pub sharpen_amount: f32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            median: true,
            clahe: ClaheConfig::default(),
            sharpen_sigma: 7.0,
            sharpen_amount: 1.5,
        }
    }
}

/// Median → CLAHE → unsharp mask.
pub fn preprocess(gray: &Image<u8>, config: &PreprocessConfig) -> Image<u8> {
    let denoised = if config.median {
        median_blur_3x3(gray)
    } else {
        gray.clone()
    };
    let equalized = clahe(&denoised, &config.clahe);
    if (config.sharpen_amount - 1.0).abs() < f32::EPSILON {
        equalized
    } else {
        unsharp_mask(&equalized, config.sharpen_sigma, config.sharpen_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_removes_impulse() {
        let mut img = Image::filled(5, 5, 10u8);
        img.set(2, 2, 255);
        let out = median_blur_3x3(&img);
        assert_eq!(out.get(2, 2), 10);
    }

    #[test]
    fn test_median_keeps_edges() {
        let img = Image::from_fn(6, 6, |x, _| if x < 3 { 0u8 } else { 200 });
        let out = median_blur_3x3(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn test_unsharp_increases_edge_contrast() {
        let img = Image::from_fn(30, 5, |x, _| if x < 15 { 80u8 } else { 160 });
        let out = unsharp_mask(&img, 3.0, 1.5);
        assert!(out.get(14, 2) < 80);
        assert!(out.get(15, 2) > 160);
        // Far from the edge the blur equals the image.
        assert_eq!(out.get(0, 2), 80);
    }

    #[test]
    fn test_dilate() {
        let mut img = Image::<f32>::new(5, 5);
        img.set(2, 2, 3.0);
        let d = dilate_3x3(&img);
        assert_eq!(d.get(1, 1), 3.0);
        assert_eq!(d.get(3, 3), 3.0);
        assert_eq!(d.get(0, 0), 0.0);
    }

    #[test]
    fn test_local_maxima_single_peak() {
        let mut img = Image::<f32>::new(12, 12);
        img.set(5, 5, 2.5);
        assert_eq!(local_maxima(&img), vec![(5, 5)]);
    }

    #[test]
    fn test_local_maxima_ignores_non_positive() {
        let mut img = Image::filled(6, 6, -1.0f32);
        img.set(1, 1, 0.0);
        assert!(local_maxima(&img).is_empty());
    }

    #[test]
    fn test_local_maxima_two_peaks() {
        let img = Image::from_fn(10, 3, |x, _| match x {
            2 => 1.0,
            7 => 4.0,
            _ => 0.0,
        });
        let peaks = local_maxima(&img);
        assert_eq!(peaks, vec![(2, 0), (7, 0), (2, 1), (7, 1), (2, 2), (7, 2)]);
    }

    #[test]
    fn test_preprocess_keeps_shape() {
        let img = Image::from_fn(64, 48, |x, y| ((x * 3 + y * 5) % 200) as u8);
        let out = preprocess(&img, &PreprocessConfig::default());
        assert_eq!(out.dimensions(), (64, 48));
    }
}
