// frame.rs — One thermal frame and the points of interest placed on it.
//
// A ThermoFrame owns everything the tracker and the detector read or write
// for one image: the raw 16-bit buffer, its 8-bit grayscale rendition, the
// raw→°C scale, the POI list and the heat-source border. Reference and
// current frames are separate values; POIs are never shared between them.

use log::warn;

use crate::convert::raw_to_gray;
use crate::homography::Point2;
use crate::image::Image;
use crate::rolling::RollingStat;
use crate::source::TemperatureScale;

/// Samples used for the position-stability estimate.
pub const STABILITY_WINDOW: usize = 20;

/// A named point of interest.
#[derive(Debug, Clone)]
pub struct Poi {
    pub name: String,
    pub position: Point2,
    /// °C at `position`, NaN when the point lies outside the frame.
    pub temperature: f32,
    /// Rolling standard deviation of `x + y` over recent tracked positions.
    pub stability: f32,
    history: RollingStat,
}

impl Poi {
    pub fn new(name: impl Into<String>, position: Point2) -> Self {
        Poi {
            name: name.into(),
            position,
            temperature: f32::NAN,
            stability: 0.0,
            history: RollingStat::new(STABILITY_WINDOW),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Move to a freshly tracked position and update the stability estimate
    /// over the last `window` positions. A non-finite position stays out of
    /// the history and reports infinite stability.
    pub fn observe(&mut self, position: Point2, window: usize) {
        if self.history.window() != window {
            self.history = RollingStat::new(window.max(1));
        }
        self.position = position;
        if !position.x.is_finite() || !position.y.is_finite() {
            self.stability = f32::INFINITY;
            return;
        }
        self.history.push((position.x + position.y) as f64);
        self.stability = self.history.stddev() as f32;
    }

    /// Positions recorded so far (at most the window length).
    pub fn observations(&self) -> usize {
        self.history.count()
    }
}

/// A raw thermal frame with its POIs and heat-source border.
#[derive(Debug, Clone)]
pub struct ThermoFrame {
    raw: Image<u16>,
    gray: Image<u8>,
    scale: TemperatureScale,
    pub pois: Vec<Poi>,
    /// Four corners of the heat-source region, or empty.
    pub border: Vec<Point2>,
    /// Names the border corners were stored under, same order as `border`.
    /// Empty when the border was not loaded from named points.
    pub border_names: Vec<String>,
}

impl ThermoFrame {
    /// Wrap a raw frame; the grayscale maps raw(15 °C)..raw(120 °C) onto 0..255.
    pub fn new(raw: Image<u16>, scale: TemperatureScale) -> Self {
        let (lo, hi) = scale.gray_range();
        let gray = raw_to_gray(&raw, lo, hi);
        ThermoFrame {
            raw,
            gray,
            scale,
            pois: Vec::new(),
            border: Vec::new(),
            border_names: Vec::new(),
        }
    }

    /// Replace the image content, keeping POIs and border.
    pub fn set_raw(&mut self, raw: Image<u16>, scale: TemperatureScale) {
        *self = ThermoFrame {
            pois: std::mem::take(&mut self.pois),
            border: std::mem::take(&mut self.border),
            border_names: std::mem::take(&mut self.border_names),
            ..ThermoFrame::new(raw, scale)
        };
    }

    pub fn raw(&self) -> &Image<u16> {
        &self.raw
    }

    pub fn gray(&self) -> &Image<u8> {
        &self.gray
    }

    pub fn scale(&self) -> TemperatureScale {
        self.scale
    }

    pub fn width(&self) -> usize {
        self.raw.width()
    }

    pub fn height(&self) -> usize {
        self.raw.height()
    }

    pub fn add_poi(&mut self, name: impl Into<String>, position: Point2) {
        let mut poi = Poi::new(name, position);
        poi.temperature = self.temperature_at(position);
        self.pois.push(poi);
    }

    pub fn poi(&self, name: &str) -> Option<&Poi> {
        self.pois.iter().find(|p| p.name == name)
    }

    /// °C at the pixel nearest to `p`; NaN with a warning outside the frame.
    pub fn temperature_at(&self, p: Point2) -> f32 {
        let (x, y) = p.round();
        if !p.x.is_finite() || !p.y.is_finite() || !self.raw.contains(x, y) {
            warn!("point at ({:.1}, {:.1}) is outside the image", p.x, p.y);
            return f32::NAN;
        }
        self.scale.to_celsius(self.raw.get(x as usize, y as usize) as f32)
    }

    /// Re-sample every POI temperature at its current position.
    pub fn update_temperatures(&mut self) {
        let temps: Vec<f32> = self.pois.iter().map(|p| self.temperature_at(p.position)).collect();
        for (poi, t) in self.pois.iter_mut().zip(temps) {
            poi.temperature = t;
        }
    }

    /// °C of the hottest pixel minus °C of the coldest.
    pub fn contrast(&self) -> f32 {
        match self.raw.min_max() {
            Some((lo, hi)) => self.scale.to_celsius(hi as f32) - self.scale.to_celsius(lo as f32),
            None => 0.0,
        }
    }

    /// True when all four border corners lie inside the frame.
    pub fn border_in_bounds(&self) -> bool {
        self.border.len() == 4
            && self.border.iter().all(|p| {
                p.x.is_finite()
                    && p.y.is_finite()
                    && p.x >= 0.0
                    && p.y >= 0.0
                    && p.x <= (self.width().saturating_sub(1)) as f32
                    && p.y <= (self.height().saturating_sub(1)) as f32
            })
    }

    /// Copy POIs and border from `other`, positions verbatim.
    pub fn copy_layout_from(&mut self, other: &ThermoFrame) {
        self.pois = other.pois.clone();
        self.border = other.border.clone();
        self.border_names = other.border_names.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> ThermoFrame {
        ThermoFrame::new(Image::from_fn(10, 8, |x, y| (10 * x + y) as u16), TemperatureScale::recorded())
    }

    #[test]
    fn test_gray_uses_fixed_range() {
        let scale = TemperatureScale::new(0.0, 0.0, 1000.0, 100.0);
        let raw = Image::from_vec(3, 1, vec![150u16, 1200, 500]);
        let f = ThermoFrame::new(raw, scale);
        // raw(15 °C) = 150 → 0, raw(120 °C) = 1200 → 255.
        assert_eq!(f.gray().as_slice()[0], 0);
        assert_eq!(f.gray().as_slice()[1], 255);
        assert_eq!(f.gray().as_slice()[2], 85);
    }

    #[test]
    fn test_temperature_sampling_rounds() {
        let f = ramp();
        let t = f.temperature_at(Point2::new(2.6, 3.4));
        assert!((t - TemperatureScale::recorded().to_celsius(33.0)).abs() < 1e-4);
    }

    #[test]
    fn test_out_of_bounds_is_nan() {
        let f = ramp();
        assert!(f.temperature_at(Point2::new(-1.0, 2.0)).is_nan());
        assert!(f.temperature_at(Point2::new(9.6, 2.0)).is_nan());
        assert!(f.temperature_at(Point2::new(f32::NAN, 2.0)).is_nan());
    }

    #[test]
    fn test_contrast() {
        let f = ramp();
        let s = TemperatureScale::recorded();
        assert!((f.contrast() - (s.to_celsius(97.0) - s.to_celsius(0.0))).abs() < 1e-4);
    }

    #[test]
    fn test_observe_updates_stability() {
        let mut p = Poi::new("U1", Point2::new(0.0, 0.0));
        p.observe(Point2::new(1.0, 1.0), 20);
        assert_eq!(p.stability, 0.0);
        p.observe(Point2::new(2.0, 2.0), 20);
        // x+y samples 2 and 4 → sample stddev √2.
        assert!((p.stability - 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(p.position, Point2::new(2.0, 2.0));
        assert_eq!(p.observations(), 2);
    }

    #[test]
    fn test_observe_skips_non_finite_positions() {
        let mut p = Poi::new("U1", Point2::new(0.0, 0.0));
        p.observe(Point2::new(1.0, 1.0), 20);
        p.observe(Point2::new(f32::INFINITY, 3.0), 20);
        assert_eq!(p.stability, f32::INFINITY);
        assert_eq!(p.observations(), 1);
        p.observe(Point2::new(1.0, 1.0), 20);
        assert_eq!(p.stability, 0.0);
    }

    #[test]
    fn test_set_raw_keeps_layout() {
        let mut f = ramp();
        f.add_poi("a", Point2::new(1.0, 1.0));
        f.border = vec![Point2::new(0.0, 0.0); 4];
        f.border_names = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        f.set_raw(Image::filled(10, 8, 3), TemperatureScale::recorded());
        assert_eq!(f.pois.len(), 1);
        assert_eq!(f.border.len(), 4);
        assert_eq!(f.border_names[3], "d");
        assert_eq!(f.raw().get(5, 5), 3);
    }

    #[test]
    fn test_border_in_bounds() {
        let mut f = ramp();
        f.border = vec![
            Point2::new(0.0, 0.0),
            Point2::new(9.0, 0.0),
            Point2::new(9.0, 7.0),
            Point2::new(0.0, 7.0),
        ];
        assert!(f.border_in_bounds());
        f.border[2].x = 9.5;
        assert!(!f.border_in_bounds());
        f.border.pop();
        assert!(!f.border_in_bounds());
    }
}
