// source.rs — Where raw thermal frames come from.
//
// Acquisition itself (camera drivers, video decoding) lives outside this
// crate. The pipeline only needs two things from a source: the next raw
// 16-bit frame, and the linear mapping from raw values to °C.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::Image;

/// Lower end of the fixed scale used for recorded video.
pub const RECORD_MIN_C: f32 = 15.0;
/// Upper end of the fixed scale used for recorded video.
pub const RECORD_MAX_C: f32 = 120.0;

/// Linear mapping between raw pixel values and °C, defined by two
/// calibration endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureScale {
    pub raw_lo: f32,
    pub celsius_lo: f32,
    pub raw_hi: f32,
    pub celsius_hi: f32,
}

impl TemperatureScale {
    /// # Panics
    /// Panics if the two raw endpoints coincide.
    pub fn new(raw_lo: f32, celsius_lo: f32, raw_hi: f32, celsius_hi: f32) -> Self {
        assert!(raw_hi != raw_lo, "temperature scale needs two distinct raw endpoints");
        TemperatureScale {
            raw_lo,
            celsius_lo,
            raw_hi,
            celsius_hi,
        }
    }

    /// Scale of recorded video: raw 0..255 spans 15..120 °C.
    pub fn recorded() -> Self {
        Self::new(0.0, RECORD_MIN_C, 255.0, RECORD_MAX_C)
    }

    pub fn to_celsius(&self, raw: f32) -> f32 {
        self.celsius_lo
            + (raw - self.raw_lo) * (self.celsius_hi - self.celsius_lo) / (self.raw_hi - self.raw_lo)
    }

    pub fn to_raw(&self, celsius: f32) -> f32 {
        self.raw_lo
            + (celsius - self.celsius_lo) * (self.raw_hi - self.raw_lo) / (self.celsius_hi - self.celsius_lo)
    }

    /// Raw interval mapped onto the 8-bit grayscale: raw(15 °C)..raw(120 °C).
    pub fn gray_range(&self) -> (f32, f32) {
        (self.to_raw(RECORD_MIN_C), self.to_raw(RECORD_MAX_C))
    }
}

impl Default for TemperatureScale {
    fn default() -> Self {
        Self::recorded()
    }
}

/// A producer of raw thermal frames.
pub trait ImageSource {
    /// Next raw frame, `Error::SourceExhausted` when there are no more.
    fn get_frame(&mut self) -> Result<Image<u16>>;

    /// Raw → °C mapping valid for the frames of this source.
    fn scale(&self) -> TemperatureScale;
}

/// Replays a fixed list of frames.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    frames: VecDeque<Image<u16>>,
    scale: TemperatureScale,
    looping: bool,
}

impl ReplaySource {
    pub fn new(frames: Vec<Image<u16>>, scale: TemperatureScale) -> Self {
        ReplaySource {
            frames: frames.into(),
            scale,
            looping: false,
        }
    }

    /// Start over from the first frame once the list is exhausted.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl ImageSource for ReplaySource {
    fn get_frame(&mut self) -> Result<Image<u16>> {
        let frame = self.frames.pop_front().ok_or(Error::SourceExhausted)?;
        if self.looping {
            self.frames.push_back(frame.clone());
        }
        Ok(frame)
    }

    fn scale(&self) -> TemperatureScale {
        self.scale
    }
}
