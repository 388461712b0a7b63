// descriptor.rs — 256-bit BRIEF binary descriptors.
//
// Reference: Calonder et al., "BRIEF: Binary Robust Independent Elementary
// Features" (ECCV 2010).
//
// Each descriptor bit compares two pixels of a smoothed 31×31 patch around
// the keypoint: bit i = smoothed(p_i) < smoothed(q_i). The 256 point pairs
// are drawn once from an isotropic Gaussian (σ = patch/5) with a fixed seed,
// so the same image always yields the same descriptors. The board does not
// rotate appreciably between frames, so the pattern is not steered.
//
// Keypoints whose patch would leave the frame are dropped: `compute` returns
// the surviving keypoints alongside their descriptors.

use crate::convolution::gaussian_blur;
use crate::fast::Keypoint;
use crate::image::Image;

/// Half-width of the sampling patch.
pub const PATCH_RADIUS: usize = 15;

/// Smoothing applied before the binary tests.
const SMOOTHING_SIGMA: f32 = 2.0;

/// Seed for the sampling pattern.
const PATTERN_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// A 256-bit BRIEF descriptor stored as four 64-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    /// Number of differing bits (0..=256).
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints that survived descriptor computation, with their descriptors
/// at the same indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// BRIEF extractor holding the fixed sampling pattern.
#[derive(Debug, Clone)]
pub struct BriefExtractor {
    pairs: Vec<[(i8, i8); 2]>,
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BriefExtractor {
    pub fn new() -> Self {
        let mut rng = PatternRng(PATTERN_SEED);
        let sigma = (2 * PATCH_RADIUS + 1) as f32 / 5.0;
        let pairs = (0..256)
            .map(|_| [rng.offset(sigma), rng.offset(sigma)])
            .collect();
        BriefExtractor { pairs }
    }

    /// Describe every keypoint whose patch fits inside `image`.
    pub fn compute(&self, image: &Image<u8>, keypoints: &[Keypoint]) -> Features {
        let smoothed = gaussian_blur(image, SMOOTHING_SIGMA);
        let (w, h) = image.dimensions();
        let r = PATCH_RADIUS as f32;

        let mut out = Features::default();
        for kp in keypoints {
            let cx = kp.x.round();
            let cy = kp.y.round();
            if cx < r || cy < r || cx + r >= w as f32 || cy + r >= h as f32 {
                continue;
            }
            let (cx, cy) = (cx as isize, cy as isize);
            let at = |(dx, dy): (i8, i8)| {
                smoothed.get((cx + dx as isize) as usize, (cy + dy as isize) as usize)
            };

            let mut words = [0u64; 4];
            for (i, &[p, q]) in self.pairs.iter().enumerate() {
                if at(p) < at(q) {
                    words[i / 64] |= 1 << (i % 64);
                }
            }
            out.keypoints.push(*kp);
            out.descriptors.push(Descriptor(words));
        }
        out
    }
}

/// xorshift64 plus Box-Muller, enough to scatter the point pairs.
struct PatternRng(u64);

impl PatternRng {
    fn next_unit(&mut self) -> f32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        ((x >> 40) as f32 + 0.5) / (1u64 << 24) as f32
    }

    fn offset(&mut self, sigma: f32) -> (i8, i8) {
        let u1 = self.next_unit();
        let u2 = self.next_unit();
        let mag = sigma * (-2.0 * u1.ln()).sqrt();
        let angle = std::f32::consts::TAU * u2;
        let limit = PATCH_RADIUS as f32;
        let clip = |v: f32| v.round().clamp(-limit, limit) as i8;
        (clip(mag * angle.cos()), clip(mag * angle.sin()))
    }
}
