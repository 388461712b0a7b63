// histeq.rs — Contrast Limited Adaptive Histogram Equalization (CLAHE).
//
// A thermal frame of a running board is mostly flat background with a few
// warm components. Feature detection on the raw grayscale finds almost
// nothing in the flat regions, so the tracker equalizes contrast locally
// before running FAST.
//
// Algorithm (Zuiderveld 1994, Graphics Gems IV):
//   1. Split the image into a fixed grid of tiles (8×8 by default).
//   2. Per tile, build a 256-bin histogram, clip every bin at
//      `clip_limit × area / 256`, and spread the clipped excess evenly
//      over all bins.
//   3. Turn each clipped histogram into a lookup table, lut = cdf · 255 / area.
//   4. Remap every pixel by bilinear interpolation between the LUTs of the
//      four nearest tile centers.
//
// The grid is a tile COUNT, not a tile size: a 160×120 frame with an 8×8
// grid gets 20×15-pixel tiles. Edge tiles are cut short when the image is
// not divisible by the grid.

use serde::{Deserialize, Serialize};

use crate::image::Image;

/// CLAHE parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheConfig {
    /// Clip limit as a multiple of the uniform bin height (area / 256).
    pub clip_limit: f32,
    /// Number of tiles across.
    pub tiles_x: usize,
    /// Number of tiles down.
    pub tiles_y: usize,
}

impl Default for ClaheConfig {
    fn default() -> Self {
        ClaheConfig {
            clip_limit: 18.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

/// Apply CLAHE to an 8-bit image.
pub fn clahe(image: &Image<u8>, config: &ClaheConfig) -> Image<u8> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || config.tiles_x == 0 || config.tiles_y == 0 {
        return image.clone();
    }

    let tiles_x = config.tiles_x.min(w);
    let tiles_y = config.tiles_y.min(h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    // Per-tile lookup tables.
    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = (tx * tile_w).min(w);
            let y0 = (ty * tile_h).min(h);
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let area = (x1 - x0) * (y1 - y0);
            if area == 0 {
                continue;
            }

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &v in &image.row(y)[x0..x1] {
                    hist[v as usize] += 1;
                }
            }
            if config.clip_limit > 0.0 {
                let limit = ((config.clip_limit * area as f32 / 256.0) as u32).max(1);
                clip_histogram(&mut hist, limit);
            }
            luts[ty * tiles_x + tx] = tile_lut(&hist, area);
        }
    }

    let lut = |tx: usize, ty: usize, v: u8| luts[ty * tiles_x + tx][v as usize] as f32;

    Image::from_fn(w, h, |x, y| {
        // Position in tile units relative to tile centers.
        let fx = x as f32 / tile_w as f32 - 0.5;
        let fy = y as f32 / tile_h as f32 - 0.5;
        let tx1 = fx.floor() as isize;
        let ty1 = fy.floor() as isize;
        let ax = fx - tx1 as f32;
        let ay = fy - ty1 as f32;

        let clamp_x = |t: isize| t.clamp(0, tiles_x as isize - 1) as usize;
        let clamp_y = |t: isize| t.clamp(0, tiles_y as isize - 1) as usize;
        let (tx1, tx2) = (clamp_x(tx1), clamp_x(tx1 + 1));
        let (ty1, ty2) = (clamp_y(ty1), clamp_y(ty1 + 1));

        let v = image.get(x, y);
        let top = lut(tx1, ty1, v) * (1.0 - ax) + lut(tx2, ty1, v) * ax;
        let bottom = lut(tx1, ty2, v) * (1.0 - ax) + lut(tx2, ty2, v) * ax;
        (top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8
    })
}

/// Clip bins at `limit` and redistribute the excess: an even share to every
/// bin, the remainder one count at a time at evenly spaced bins.
fn clip_histogram(hist: &mut [u32; 256], limit: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let batch = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

fn tile_lut(hist: &[u32; 256], area: usize) -> [u8; 256] {
    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        sum += count;
        *entry = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
