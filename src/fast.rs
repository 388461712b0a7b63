// fast.rs — FAST-9 keypoint detector for 8-bit thermal frames.
//
// Reference: Rosten & Drummond, "Machine learning for high-speed corner
// detection" (ECCV 2006).
//
// A pixel is a keypoint when at least 9 contiguous pixels on the radius-3
// Bresenham circle around it are all brighter than center + t or all
// darker than center − t. The tracker runs this with t = 18 on the
// CLAHE-enhanced frame and keeps every raw detection (no suppression), so
// the descriptor stage sees the dense set of board corners: component
// edges, pads, silkscreen.
//
// Contiguity wraps around the circle (index 15 neighbours index 0). Each
// classification is packed into a 16-bit mask, duplicated into 32 bits,
// and ANDed with itself shifted until only runs of the required length
// survive.

use crate::image::Image;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
const CIRCLE: [(isize, isize); 16] = [
    (0, -3), (1, -3), (2, -2), (3, -1),
    (3, 0), (3, 1), (2, 2), (1, 3),
    (0, 3), (-1, 3), (-2, 2), (-3, 1),
    (-3, 0), (-3, -1), (-2, -2), (-1, -3),
];

/// Required run length on the circle.
const ARC: u32 = 9;

/// A detected keypoint in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Sum of `|circle - center| - threshold` over the best arc.
    pub response: f32,
}

/// FAST-9 detector.
#[derive(Debug, Clone, Copy)]
pub struct FastDetector {
    /// Intensity difference a circle pixel must exceed to count.
    pub threshold: u8,
    /// Keep only keypoints whose response is the maximum of their 3×3
    /// neighbourhood.
    pub nonmax_suppression: bool,
}

impl Default for FastDetector {
    fn default() -> Self {
        FastDetector {
            threshold: 18,
            nonmax_suppression: false,
        }
    }
}

impl FastDetector {
    pub fn new(threshold: u8, nonmax_suppression: bool) -> Self {
        FastDetector {
            threshold,
            nonmax_suppression,
        }
    }

    /// Detect keypoints, returned in raster order.
    pub fn detect(&self, image: &Image<u8>) -> Vec<Keypoint> {
        let (w, h) = image.dimensions();
        if w <= 6 || h <= 6 {
            return Vec::new();
        }

        let t = self.threshold as i16;
        let mut scores = Image::<f32>::new(w, h);
        let mut found = Vec::new();

        for y in 3..h - 3 {
            for x in 3..w - 3 {
                let center = image.get(x, y) as i16;
                let sample = |i: usize| {
                    let (dx, dy) = CIRCLE[i];
                    image.get((x as isize + dx) as usize, (y as isize + dy) as usize) as i16
                };

                // High-speed rejection: a 9-arc always covers at least two
                // of the four compass points.
                let compass = [sample(0), sample(4), sample(8), sample(12)];
                let brighter = compass.iter().filter(|&&p| p > center + t).count();
                let darker = compass.iter().filter(|&&p| p < center - t).count();
                if brighter < 2 && darker < 2 {
                    continue;
                }

                let mut ring = [0i16; 16];
                for (i, r) in ring.iter_mut().enumerate() {
                    *r = sample(i);
                }
                if let Some(score) = arc_score(center, &ring, t) {
                    scores.set(x, y, score);
                    found.push(Keypoint {
                        x: x as f32,
                        y: y as f32,
                        response: score,
                    });
                }
            }
        }

        if self.nonmax_suppression {
            found.retain(|kp| {
                let (x, y) = (kp.x as isize, kp.y as isize);
                (-1..=1).all(|dy| {
                    (-1..=1).all(|dx| {
                        (dx == 0 && dy == 0) || scores.get_clamped(x + dx, y + dy) <= kp.response
                    })
                })
            });
        }
        found
    }
}

/// Score of the best qualifying arc, or `None` when neither the bright nor
/// the dark classification contains a long enough run.
fn arc_score(center: i16, ring: &[i16; 16], t: i16) -> Option<f32> {
    let mut bright = 0u16;
    let mut dark = 0u16;
    for (i, &p) in ring.iter().enumerate() {
        if p - center > t {
            bright |= 1 << i;
        } else if center - p > t {
            dark |= 1 << i;
        }
    }

    [bright, dark]
        .into_iter()
        .filter(|&mask| has_run(mask))
        .map(|mask| longest_run_score(center, ring, t, mask))
        .reduce(f32::max)
}

fn has_run(mask: u16) -> bool {
    if mask.count_ones() < ARC {
        return false;
    }
    let mut acc = (mask as u32) | ((mask as u32) << 16);
    for _ in 1..ARC {
        acc &= acc >> 1;
    }
    acc != 0
}

fn longest_run_score(center: i16, ring: &[i16; 16], t: i16, mask: u16) -> f32 {
    let doubled = (mask as u32) | ((mask as u32) << 16);
    let (mut best_start, mut best_len) = (0usize, 0usize);
    let mut i = 0usize;
    while i < 16 {
        if doubled & (1 << i) == 0 {
            i += 1;
            continue;
        }
        let start = i;
        while i < 32 && doubled & (1 << i) != 0 {
            i += 1;
        }
        if i - start > best_len {
            best_len = i - start;
            best_start = start;
        }
    }
    (best_start..best_start + best_len.min(16))
        .map(|j| ((ring[j % 16] - center).abs() - t).max(0) as f32)
        .sum()
}
