// image.rs — Runtime-sized image container, generic over pixel type.
//
// Every buffer in this crate is an `Image<T>`:
//
//   Image<u16>  raw sensor values straight from the thermal camera
//   Image<u8>   8-bit grayscale used for feature extraction and snapshots
//   Image<f32>  rectified detail views, Laplacian responses, averages
//
// Layout is row-major and contiguous (no row padding): pixel (x, y) lives
// at index `y * width + x`. x is the column, y is the row.
//
// Out-of-range pixel access panics. Code that may legitimately sample
// outside the frame (POI temperature lookups, border checks) asks
// `contains()` first and handles the miss itself.

use std::fmt;

// ---------------------------------------------------------------------------
// Pixel Trait
// ---------------------------------------------------------------------------

/// Trait for types that can serve as pixel values in an Image.
///
/// `to_f32`/`from_f32` are raw conversions: u8 42 becomes 42.0, not 0.165.
/// Normalised conversions live in `convert`.
pub trait Pixel: Copy + Default + Send + Sync + PartialOrd + 'static {
    /// Convert this pixel value to f32.
    fn to_f32(self) -> f32;

    /// Construct a pixel from an f32 value, clamping and rounding for
    /// integer types.
    fn from_f32(v: f32) -> Self;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 255.0).round() as u8
    }
}

impl Pixel for u16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v.clamp(0.0, 65535.0).round() as u16
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D image with runtime dimensions, generic over pixel type `T`.
#[derive(Clone, PartialEq)]
pub struct Image<T: Pixel> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Pixel> Image<T> {
    /// Create a zero-initialized image.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, T::default())
    }

    /// Create an image with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Image {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Create an image from a row-major pixel vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image { data, width, height }
    }

    /// Create an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image { data, width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`, convenient for shape comparisons.
    #[inline]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if the integer pixel coordinate lies inside the image.
    #[inline]
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Get the pixel value at (x, y).
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    /// Get the pixel at (x, y) with coordinates clamped to the image edge.
    /// This is the replicate-border rule used by every filter in the crate.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> T {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.width + cx]
    }

    /// Set the pixel at (x, y).
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        let idx = y * self.width + x;
        self.data[idx] = value;
    }

    /// Borrow a single row as a slice.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    /// Iterate over all pixels as `(x, y, value)` tuples.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let w = self.width;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| (i % w, i / w, v))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Apply `f` to every pixel, producing a new image of the same shape.
    pub fn map<U: Pixel>(&self, f: impl Fn(T) -> U) -> Image<U> {
        Image {
            data: self.data.iter().map(|&v| f(v)).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Combine two images of identical shape pixel by pixel.
    ///
    /// # Panics
    /// Panics if the shapes differ.
    pub fn zip_map<U: Pixel, V: Pixel>(&self, other: &Image<U>, f: impl Fn(T, U) -> V) -> Image<V> {
        assert_eq!(
            self.dimensions(),
            other.dimensions(),
            "zip_map shape mismatch"
        );
        Image {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Smallest and largest pixel values with their locations:
    /// `((min, x, y), (max, x, y))`. `None` for an empty image.
    pub fn min_max_loc(&self) -> Option<((T, usize, usize), (T, usize, usize))> {
        let first = *self.data.first()?;
        let mut lo = (first, 0usize);
        let mut hi = (first, 0usize);
        for (i, &v) in self.data.iter().enumerate() {
            if v < lo.0 {
                lo = (v, i);
            }
            if v > hi.0 {
                hi = (v, i);
            }
        }
        let w = self.width;
        Some(((lo.0, lo.1 % w, lo.1 / w), (hi.0, hi.1 % w, hi.1 / w)))
    }

    /// Smallest and largest pixel values.
    pub fn min_max(&self) -> Option<(T, T)> {
        self.min_max_loc().map(|(lo, hi)| (lo.0, hi.0))
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl Image<f32> {
    /// Largest value, ignoring NaN. 0.0 for an empty or all-NaN image.
    pub fn max_value(&self) -> f32 {
        let m = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if m == f32::NEG_INFINITY {
            0.0
        } else {
            m
        }
    }

    /// `self - other`, element-wise.
    pub fn sub(&self, other: &Image<f32>) -> Image<f32> {
        self.zip_map(other, |a, b| a - b)
    }
}

impl<T: Pixel + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Image<{}> {{ {}×{} }}",
            std::any::type_name::<T>(),
            self.width,
            self.height,
        )?;
        for y in 0..self.height.min(8) {
            let shown: Vec<String> = self
                .row(y)
                .iter()
                .take(16)
                .map(|v| format!("{v:?}"))
                .collect();
            let tail = if self.width > 16 { ", ..." } else { "" };
            writeln!(f, "  row {y}: [{}{tail}]", shown.join(", "))?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

impl<T: Pixel> std::ops::Index<(usize, usize)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &T {
        self.bounds_check(x, y);
        &self.data[y * self.width + x]
    }
}

impl<T: Pixel> std::ops::IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut T {
        self.bounds_check(x, y);
        let idx = y * self.width + x;
        &mut self.data[idx]
    }
}

// ---------------------------------------------------------------------------
// Bilinear Interpolation
// ---------------------------------------------------------------------------

/// Bilinear interpolation for sub-pixel access on an f32 image.
///
/// Returns `None` when (x, y) falls outside `[0, width-1] × [0, height-1]`,
/// which is how the perspective warp recognises samples that land off the
/// source frame. At the right/bottom edge the missing neighbour is the edge
/// pixel itself.
pub fn interpolate_bilinear(img: &Image<f32>, x: f32, y: f32) -> Option<f32> {
    if img.is_empty() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    let max_x = (img.width() - 1) as f32;
    let max_y = (img.height() - 1) as f32;
    if x < 0.0 || y < 0.0 || x > max_x || y > max_y {
        return None;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);

    let p00 = img.get(x0, y0);
    let p10 = img.get(x1, y0);
    let p01 = img.get(x0, y1);
    let p11 = img.get(x1, y1);
    let top = p00 + fx * (p10 - p00);
    let bottom = p01 + fx * (p11 - p01);
    Some(top + fy * (bottom - top))
}
