// heat_sources.rs — Hotspot detection inside the border quadrilateral.
//
// Per frame:
//   1. check the four border corners lie inside the frame
//   2. (optionally) subtract the static compensation image from the raw
//      frame, then warp the border region onto a 100×100 canonical square:
//      the "detail" view, still in raw units
//   3. update the rolling stddev and three EMAs of the detail view
//   4. blur (σ ≈ 6.5) and take the Laplacian; negate it so hotspots are
//      positive peaks
//   5. every strictly positive 3×3 local maximum of the negated Laplacian is
//      a heat source: temperature from the detail view, intensity = peak value
//   6. update three EMAs of the negated Laplacian, three EMAs of its
//      thresholded version max(L − ε, 0), and a long rolling mean of the
//      thresholded version
//   7. derive fast−medium and medium−slow differences
//
// All intermediate views are kept as named images for external renderers.
// State here is touched only by the per-frame `detect` call.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::convert::to_f32;
use crate::convolution::{gaussian_blur, laplacian};
use crate::ema::{EmaBank, DEFAULT_ALPHAS};
use crate::error::{Error, Result};
use crate::filter::local_maxima;
use crate::homography::{perspective_transform, warp_perspective, Point2};
use crate::image::Image;
use crate::rolling::RollingImageStat;
use crate::source::TemperatureScale;

/// Named image keys.
pub mod keys {
    pub const DETAIL: &str = "detail";
    pub const DETAIL_STDDEV: &str = "detail-stddev";
    pub const DETAIL_EMA: [&str; 3] = ["detail-ema-fast", "detail-ema-medium", "detail-ema-slow"];
    pub const DETAIL_FAST_MEDIUM: &str = "detail-fast-medium";
    pub const DETAIL_MEDIUM_SLOW: &str = "detail-medium-slow";
    pub const LAPLACIAN: &str = "laplacian";
    pub const LAPLACIAN_EMA: [&str; 3] =
        ["laplacian-ema-fast", "laplacian-ema-medium", "laplacian-ema-slow"];
    pub const LAPLACIAN_FAST_MEDIUM: &str = "laplacian-fast-medium";
    pub const LAPLACIAN_MEDIUM_SLOW: &str = "laplacian-medium-slow";
    pub const POSITIVE_EMA: [&str; 3] =
        ["positive-ema-fast", "positive-ema-medium", "positive-ema-slow"];
    pub const POSITIVE_MEAN: &str = "positive-rolling-mean";
    pub const HEAT_SOURCES: &str = "heat-sources";
}

/// Detector parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatSourceConfig {
    /// Side of the canonical rectified square.
    pub canonical_size: usize,
    /// Gaussian sigma applied before the Laplacian.
    pub blur_sigma: f32,
    /// EMA smoothing factors, fast to slow.
    pub alphas: [f32; 3],
    /// Offset subtracted from the negated Laplacian before clipping at 0.
    pub threshold_offset: f32,
    /// Window of the detail stddev and of the thresholded rolling mean.
    pub rolling_window: usize,
}

impl Default for HeatSourceConfig {
    fn default() -> Self {
        HeatSourceConfig {
            canonical_size: 100,
            blur_sigma: 6.5,
            alphas: DEFAULT_ALPHAS,
            threshold_offset: 0.025,
            rolling_window: 1000,
        }
    }
}

impl HeatSourceConfig {
    /// Reject values the detector cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.canonical_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "heat_sources.canonical_size must be at least 2, got {}",
                self.canonical_size
            )));
        }
        if !(self.blur_sigma > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "heat_sources.blur_sigma must be positive, got {}",
                self.blur_sigma
            )));
        }
        if let Some(a) = self.alphas.iter().find(|a| !(0.0..1.0).contains(*a)) {
            return Err(Error::InvalidConfig(format!(
                "heat_sources.alphas must lie in [0, 1), got {a}"
            )));
        }
        if !self.threshold_offset.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "heat_sources.threshold_offset must be finite, got {}",
                self.threshold_offset
            )));
        }
        if self.rolling_window == 0 {
            return Err(Error::InvalidConfig("heat_sources.rolling_window must be at least 1".into()));
        }
        Ok(())
    }
}

/// A hotspot in canonical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatSource {
    pub x: u32,
    pub y: u32,
    /// °C of the detail view at the hotspot.
    pub temperature: f32,
    /// Negated Laplacian at the hotspot, this frame.
    pub intensity: f32,
}

/// A derived image with a one-line summary.
#[derive(Debug, Clone)]
pub struct NamedImage {
    pub image: Image<f32>,
    /// e.g. `"max: 3.120"`.
    pub description: String,
}

impl NamedImage {
    fn new(image: Image<f32>) -> Self {
        let description = format!("max: {:.3}", image.max_value());
        NamedImage { image, description }
    }
}

/// Heat sources of one negated-Laplacian image: its strictly positive
/// local maxima, with temperatures read from `detail`.
pub fn find_heat_sources(
    neg_laplacian: &Image<f32>,
    detail: &Image<f32>,
    scale: &TemperatureScale,
) -> Vec<HeatSource> {
    local_maxima(neg_laplacian)
        .into_iter()
        .map(|(x, y)| HeatSource {
            x: x as u32,
            y: y as u32,
            temperature: scale.to_celsius(detail.get(x, y)),
            intensity: neg_laplacian.get(x, y),
        })
        .collect()
}

/// Load a static compensation image from a 16-bit or 8-bit grayscale PNG.
/// Sample values are raw offsets and are taken as stored, without rescaling
/// 8-bit data to the 16-bit range.
pub fn load_compensation(path: impl AsRef<Path>) -> Result<Image<f32>> {
    let path = path.as_ref();
    let offsets = match ::image::open(path)? {
        ::image::DynamicImage::ImageLuma8(img) => {
            let (w, h) = img.dimensions();
            to_f32(&Image::from_vec(w as usize, h as usize, img.into_raw()))
        }
        ::image::DynamicImage::ImageLuma16(img) => {
            let (w, h) = img.dimensions();
            to_f32(&Image::from_vec(w as usize, h as usize, img.into_raw()))
        }
        other => {
            return Err(Error::InvalidConfig(format!(
                "compensation image {} must be 8- or 16-bit grayscale, got {:?}",
                path.display(),
                other.color()
            )))
        }
    };
    debug!(
        "compensation image {} loaded: {}x{}",
        path.display(),
        offsets.width(),
        offsets.height()
    );
    Ok(offsets)
}

/// Multi-timescale hotspot detector.
#[derive(Debug, Clone)]
pub struct HeatSourceDetector {
    config: HeatSourceConfig,
    compensation: Option<Image<f32>>,
    detail_stat: RollingImageStat,
    detail_emas: EmaBank,
    laplacian_emas: EmaBank,
    positive_emas: EmaBank,
    positive_mean: RollingImageStat,
    images: BTreeMap<&'static str, NamedImage>,
    sources: Vec<HeatSource>,
}

impl Default for HeatSourceDetector {
    fn default() -> Self {
        Self::new(HeatSourceConfig::default())
    }
}

impl HeatSourceDetector {
    /// # Panics
    /// Panics on a configuration that [`HeatSourceConfig::validate`] rejects.
    pub fn new(config: HeatSourceConfig) -> Self {
        HeatSourceDetector {
            config,
            compensation: None,
            detail_stat: RollingImageStat::new(config.rolling_window),
            detail_emas: EmaBank::new(config.alphas),
            laplacian_emas: EmaBank::new(config.alphas),
            positive_emas: EmaBank::new(config.alphas),
            positive_mean: RollingImageStat::new(config.rolling_window),
            images: BTreeMap::new(),
            sources: Vec::new(),
        }
    }

    pub fn config(&self) -> &HeatSourceConfig {
        &self.config
    }

    /// Per-pixel offset subtracted from every raw frame before warping.
    pub fn set_compensation(&mut self, compensation: Option<Image<f32>>) {
        self.compensation = compensation;
    }

    pub fn compensation(&self) -> Option<&Image<f32>> {
        self.compensation.as_ref()
    }

    /// Hotspots of the most recent successful `detect`.
    pub fn heat_sources(&self) -> &[HeatSource] {
        &self.sources
    }

    pub fn named_image(&self, key: &str) -> Option<&NamedImage> {
        self.images.get(key)
    }

    /// Keys currently available, sorted.
    pub fn image_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.images.keys().copied()
    }

    /// Process one frame. `Ok(None)` when the border is missing, degenerate
    /// or leaves the frame; accumulated state is then left untouched.
    pub fn detect(
        &mut self,
        raw: &Image<u16>,
        border: &[Point2],
        scale: &TemperatureScale,
    ) -> Result<Option<Vec<HeatSource>>> {
        let Some(detail) = self.rectify(raw, border)? else {
            return Ok(None);
        };

        self.detail_stat.push(&detail);
        self.detail_emas.update(&detail);

        let blurred = gaussian_blur(&detail, self.config.blur_sigma);
        let neg_lap = laplacian(&blurred).map(|v| -v);
        let sources = find_heat_sources(&neg_lap, &detail, scale);
        debug!("{} heat sources", sources.len());

        let eps = self.config.threshold_offset;
        let positive = neg_lap.map(|v| (v - eps).max(0.0));
        self.laplacian_emas.update(&neg_lap);
        self.positive_emas.update(&positive);
        self.positive_mean.push(&positive);

        let mut mask = Image::<f32>::new(neg_lap.width(), neg_lap.height());
        for s in &sources {
            mask.set(s.x as usize, s.y as usize, 1.0);
        }

        self.publish(keys::DETAIL, Some(detail));
        self.publish(keys::LAPLACIAN, Some(neg_lap));
        self.publish(keys::HEAT_SOURCES, Some(mask));
        self.publish(keys::DETAIL_STDDEV, self.detail_stat.stddev());
        self.publish(keys::POSITIVE_MEAN, self.positive_mean.mean());
        for i in 0..3 {
            self.publish(keys::DETAIL_EMA[i], self.detail_emas.get(i).cloned());
            self.publish(keys::LAPLACIAN_EMA[i], self.laplacian_emas.get(i).cloned());
            self.publish(keys::POSITIVE_EMA[i], self.positive_emas.get(i).cloned());
        }
        self.publish(keys::DETAIL_FAST_MEDIUM, self.detail_emas.fast_minus_medium());
        self.publish(keys::DETAIL_MEDIUM_SLOW, self.detail_emas.medium_minus_slow());
        self.publish(keys::LAPLACIAN_FAST_MEDIUM, self.laplacian_emas.fast_minus_medium());
        self.publish(keys::LAPLACIAN_MEDIUM_SLOW, self.laplacian_emas.medium_minus_slow());

        self.sources = sources.clone();
        Ok(Some(sources))
    }

    /// The canonical detail view of `raw`, compensation applied.
    fn rectify(&self, raw: &Image<u16>, border: &[Point2]) -> Result<Option<Image<f32>>> {
        let Ok(quad) = <[Point2; 4]>::try_from(border) else {
            debug!("border has {} points, heat-source detection skipped", border.len());
            return Ok(None);
        };
        let (w, h) = raw.dimensions();
        let inside = |p: &Point2| {
            p.x >= 0.0 && p.y >= 0.0 && p.x <= w as f32 - 1.0 && p.y <= h as f32 - 1.0
        };
        if !quad.iter().all(inside) {
            warn!("heat-source border is outside the image");
            return Ok(None);
        }

        let n = self.config.canonical_size as f32;
        let canonical = [
            Point2::new(0.0, 0.0),
            Point2::new(n, 0.0),
            Point2::new(n, n),
            Point2::new(0.0, n),
        ];
        let Some(transform) = perspective_transform(&quad, &canonical) else {
            warn!("heat-source border is degenerate");
            return Ok(None);
        };

        let mut frame = to_f32(raw);
        if let Some(comp) = &self.compensation {
            if comp.dimensions() != frame.dimensions() {
                return Err(Error::ShapeMismatch {
                    expected: frame.dimensions(),
                    got: comp.dimensions(),
                });
            }
            frame = frame.sub(comp);
        }
        let size = self.config.canonical_size;
        Ok(Some(warp_perspective(&frame, &transform, size, size)))
    }

    fn publish(&mut self, key: &'static str, image: Option<Image<f32>>) {
        if let Some(image) = image {
            self.images.insert(key, NamedImage::new(image));
        }
    }
}
