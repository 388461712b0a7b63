// rolling.rs — Fixed-window rolling mean and variance.
//
// RollingStat tracks a scalar stream (a POI's x+y over the last 20 frames).
// RollingImageStat does the same independently for every pixel of an image
// stream (the rectified detail view, the thresholded Laplacian).
//
// Variance is the unbiased sample variance over the samples currently in
// the window, Σ(v − mean)² / (n − 1); with fewer than two samples it is 0.

use std::collections::VecDeque;

use crate::image::Image;

/// Rolling mean/variance over the last `window` scalar samples.
#[derive(Debug, Clone)]
pub struct RollingStat {
    window: usize,
    samples: VecDeque<f64>,
}

impl RollingStat {
    /// # Panics
    /// Panics if `window` is 0.
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "rolling window must hold at least one sample");
        RollingStat {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Samples currently in the window.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn variance(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Per-pixel rolling mean/variance over the last `window` images.
///
/// Keeps running sums of v and v² in f64 so each push costs one pass over
/// the image regardless of the window length.
#[derive(Debug, Clone)]
pub struct RollingImageStat {
    window: usize,
    frames: VecDeque<Image<f32>>,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    shape: (usize, usize),
}

impl RollingImageStat {
    /// # Panics
    /// Panics if `window` is 0.
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "rolling window must hold at least one image");
        RollingImageStat {
            window,
            frames: VecDeque::new(),
            sum: Vec::new(),
            sum_sq: Vec::new(),
            shape: (0, 0),
        }
    }

    /// Add an image. A shape change restarts the accumulation.
    pub fn push(&mut self, image: &Image<f32>) {
        if self.frames.is_empty() || image.dimensions() != self.shape {
            self.reset(image.dimensions());
        }
        if self.frames.len() == self.window {
            if let Some(old) = self.frames.pop_front() {
                for ((s, q), &v) in self.sum.iter_mut().zip(&mut self.sum_sq).zip(old.as_slice()) {
                    *s -= v as f64;
                    *q -= (v as f64) * (v as f64);
                }
            }
        }
        for ((s, q), &v) in self.sum.iter_mut().zip(&mut self.sum_sq).zip(image.as_slice()) {
            *s += v as f64;
            *q += (v as f64) * (v as f64);
        }
        self.frames.push_back(image.clone());
    }

    pub fn count(&self) -> usize {
        self.frames.len()
    }

    /// Per-pixel mean. `None` before the first push.
    pub fn mean(&self) -> Option<Image<f32>> {
        let n = self.frames.len();
        if n == 0 {
            return None;
        }
        let (w, h) = self.shape;
        Some(Image::from_vec(
            w,
            h,
            self.sum.iter().map(|&s| (s / n as f64) as f32).collect(),
        ))
    }

    /// Per-pixel sample variance. `None` before the first push.
    pub fn variance(&self) -> Option<Image<f32>> {
        let n = self.frames.len();
        if n == 0 {
            return None;
        }
        let (w, h) = self.shape;
        let data = self
            .sum
            .iter()
            .zip(&self.sum_sq)
            .map(|(&s, &q)| {
                if n < 2 {
                    0.0
                } else {
                    // Running sums can drift slightly below zero.
                    ((q - s * s / n as f64) / (n - 1) as f64).max(0.0) as f32
                }
            })
            .collect();
        Some(Image::from_vec(w, h, data))
    }

    pub fn stddev(&self) -> Option<Image<f32>> {
        self.variance().map(|v| v.map(f32::sqrt))
    }

    fn reset(&mut self, shape: (usize, usize)) {
        self.frames.clear();
        self.shape = shape;
        self.sum = vec![0.0; shape.0 * shape.1];
        self.sum_sq = vec![0.0; shape.0 * shape.1];
    }
}
