// ema.rs — Exponential moving averages over image streams.
//
//   avg ← α·avg + (1 − α)·new
//
// The average starts as a zero image of the first frame's shape, so early
// values are biased towards zero and converge at rate αⁿ. Every
// accumulator in a bank is initialized from the same first frame, which
// keeps the pairwise differences between timescales shape-compatible.

use crate::image::Image;

/// Default smoothing factors: fast, medium, slow.
pub const DEFAULT_ALPHAS: [f32; 3] = [0.9, 0.99, 0.997];

/// One exponential moving average.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f32,
    avg: Option<Image<f32>>,
}

impl Ema {
    /// # Panics
    /// Panics unless `0 ≤ alpha < 1`.
    pub fn new(alpha: f32) -> Self {
        assert!((0.0..1.0).contains(&alpha), "EMA alpha must be in [0, 1), got {alpha}");
        Ema { alpha, avg: None }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Fold in a new frame. A frame of a different shape restarts the
    /// average from zero.
    pub fn update(&mut self, frame: &Image<f32>) -> &Image<f32> {
        let alpha = self.alpha;
        let avg = match self.avg.take() {
            Some(avg) if avg.dimensions() == frame.dimensions() => avg,
            _ => Image::new(frame.width(), frame.height()),
        };
        let next = avg.zip_map(frame, |a, v| alpha * a + (1.0 - alpha) * v);
        self.avg.insert(next)
    }

    pub fn value(&self) -> Option<&Image<f32>> {
        self.avg.as_ref()
    }
}

/// Three EMAs of the same stream at increasing time constants.
#[derive(Debug, Clone)]
pub struct EmaBank {
    emas: [Ema; 3],
}

impl Default for EmaBank {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHAS)
    }
}

impl EmaBank {
    pub fn new(alphas: [f32; 3]) -> Self {
        EmaBank {
            emas: alphas.map(Ema::new),
        }
    }

    pub fn update(&mut self, frame: &Image<f32>) {
        for ema in &mut self.emas {
            ema.update(frame);
        }
    }

    /// Average at timescale `i` (0 = fast, 2 = slow).
    pub fn get(&self, i: usize) -> Option<&Image<f32>> {
        self.emas.get(i).and_then(Ema::value)
    }

    pub fn emas(&self) -> &[Ema; 3] {
        &self.emas
    }

    /// `fast − medium`.
    pub fn fast_minus_medium(&self) -> Option<Image<f32>> {
        Some(self.get(0)?.sub(self.get(1)?))
    }

    /// `medium − slow`.
    pub fn medium_minus_slow(&self) -> Option<Image<f32>> {
        Some(self.get(1)?.sub(self.get(2)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_from_zero() {
        let mut e = Ema::new(0.9);
        let out = e.update(&Image::filled(2, 2, 10.0));
        for (_, _, v) in out.pixels() {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_alpha_zero_tracks_input() {
        let mut e = Ema::new(0.0);
        e.update(&Image::filled(2, 1, 3.0));
        e.update(&Image::filled(2, 1, 8.0));
        assert_eq!(e.value().unwrap().as_slice(), &[8.0, 8.0]);
    }

    #[test]
    fn test_shape_change_restarts() {
        let mut e = Ema::new(0.5);
        e.update(&Image::filled(2, 2, 4.0));
        e.update(&Image::filled(3, 1, 4.0));
        assert_eq!(e.value().unwrap().dimensions(), (3, 1));
        assert_eq!(e.value().unwrap().get(0, 0), 2.0);
    }

    #[test]
    fn test_bank_diffs_shapes() {
        let mut bank = EmaBank::default();
        assert!(bank.fast_minus_medium().is_none());
        bank.update(&Image::filled(4, 3, 1.0));
        let d = bank.fast_minus_medium().unwrap();
        assert_eq!(d.dimensions(), (4, 3));
        // After one frame: 0.1 − 0.01.
        assert!((d.get(0, 0) - 0.09).abs() < 1e-6);
        assert!(bank.medium_minus_slow().unwrap().get(3, 2) > 0.0);
    }

    #[test]
    #[should_panic(expected = "alpha")]
    fn test_alpha_one_rejected() {
        Ema::new(1.0);
    }
}
