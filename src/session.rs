// session.rs — The per-frame pipeline.
//
//   source.get_frame()
//     → current ThermoFrame (layout carried over from the previous frame,
//       or bootstrapped from the reference)
//     → CoordinateTracker::track   (mode chosen by the tracking policy)
//     → HeatSourceDetector::detect (only when a border is set)
//     → snapshots for renderers, CSV writers, web endpoints
//
// A session owns its source, tracker and detector. Several sessions can run
// side by side; nothing here is global.

use std::fmt::Write as _;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::ThermoFrame;
use crate::heat_sources::{load_compensation, HeatSource, HeatSourceConfig, HeatSourceDetector};
use crate::registration::{FastBriefRegistration, RegistrationConfig};
use crate::source::ImageSource;
use crate::tracker::{CoordinateTracker, TrackerConfig, TrackingMode};

/// How often the session asks the tracker to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingPolicy {
    /// Never register; POIs stay where the reference put them.
    #[default]
    Off,
    /// Register synchronously on every frame.
    On,
    /// Register synchronously on the first frame only.
    Once,
    /// Register in the background; frames show the last adopted result.
    Background,
}

impl TrackingPolicy {
    /// Tracker mode for the frame with index `frame` (0-based).
    pub fn mode_for(self, frame: usize) -> TrackingMode {
        match self {
            TrackingPolicy::Off => TrackingMode::Off,
            TrackingPolicy::On => TrackingMode::Sync,
            TrackingPolicy::Once if frame == 0 => TrackingMode::Sync,
            TrackingPolicy::Once => TrackingMode::Off,
            TrackingPolicy::Background => TrackingMode::Async,
        }
    }
}

/// Everything configurable about a session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub policy: TrackingPolicy,
    pub tracker: TrackerConfig,
    pub registration: RegistrationConfig,
    pub heat_sources: HeatSourceConfig,
}

impl SessionConfig {
    /// Parse and validate a JSON configuration; missing fields take their
    /// defaults.
    ///
    /// ```
    /// use thermocam_pcb::session::{SessionConfig, TrackingPolicy};
    ///
    /// let cfg = SessionConfig::from_json_str(r#"{"policy": "background"}"#).unwrap();
    /// assert_eq!(cfg.policy, TrackingPolicy::Background);
    /// assert_eq!(cfg.tracker.min_contrast, 7.0);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stop the pipeline later on.
    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.heat_sources.validate()
    }
}

/// One POI as reported to the outside.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoiReading {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub temperature: f32,
    pub stability: f32,
}

/// POIs of the current frame, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoiSnapshot {
    pub points: Vec<PoiReading>,
}

impl PoiSnapshot {
    pub fn of(frame: &ThermoFrame) -> Self {
        PoiSnapshot {
            points: frame
                .pois
                .iter()
                .map(|p| PoiReading {
                    name: p.name.clone(),
                    x: p.position.x,
                    y: p.position.y,
                    temperature: p.temperature,
                    stability: p.stability,
                })
                .collect(),
        }
    }

    /// One `name=temp` line per POI, temperatures with 2 decimals.
    pub fn temperatures_text(&self) -> String {
        self.points.iter().fold(String::new(), |mut s, p| {
            let _ = writeln!(s, "{}={:.2}", p.name, p.temperature);
            s
        })
    }

    /// One `name=stability` line per POI, 4 decimals.
    pub fn stability_text(&self) -> String {
        self.points.iter().fold(String::new(), |mut s, p| {
            let _ = writeln!(s, "{}={:.4}", p.name, p.stability);
            s
        })
    }
}

/// Heat sources of the most recent frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeatSourceSnapshot {
    pub sources: Vec<HeatSource>,
}

impl HeatSourceSnapshot {
    /// `heat_sources=x,y,intensity;x,y,intensity;...` on a single line.
    pub fn to_text(&self) -> String {
        let items: Vec<String> = self
            .sources
            .iter()
            .map(|h| format!("{},{},{:.2}", h.x, h.y, h.intensity))
            .collect();
        format!("heat_sources={}\n", items.join(";"))
    }
}

/// Source + tracker + detector, stepped one frame at a time.
pub struct Session<S: ImageSource> {
    source: S,
    config: SessionConfig,
    tracker: Option<CoordinateTracker<FastBriefRegistration>>,
    detector: HeatSourceDetector,
    current: Option<ThermoFrame>,
    heat_sources: Vec<HeatSource>,
    frames: usize,
}

impl<S: ImageSource> Session<S> {
    /// # Panics
    /// Panics on a heat-source configuration that
    /// [`SessionConfig::validate`] rejects.
    pub fn new(source: S, config: SessionConfig) -> Self {
        Session {
            source,
            detector: HeatSourceDetector::new(config.heat_sources),
            config,
            tracker: None,
            current: None,
            heat_sources: Vec::new(),
            frames: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Use `reference` (typically loaded with `persist::read_poi_json`) as
    /// the frame POIs were placed on. Replaces any previous reference.
    pub fn set_reference(&mut self, reference: ThermoFrame) -> Result<()> {
        let registration = FastBriefRegistration::new(self.config.registration);
        let tracker = CoordinateTracker::new(reference, registration, self.config.tracker)?;
        info!(
            "reference set: {}x{}, {} POIs",
            tracker.reference().width(),
            tracker.reference().height(),
            tracker.reference().pois.len()
        );
        self.tracker = Some(tracker);
        Ok(())
    }

    /// Take the next source frame as a reference without POIs.
    pub fn reference_from_source(&mut self) -> Result<()> {
        let raw = self.source.get_frame()?;
        let reference = ThermoFrame::new(raw, self.source.scale());
        self.set_reference(reference)
    }

    pub fn reference(&self) -> Option<&ThermoFrame> {
        self.tracker.as_ref().map(|t| t.reference())
    }

    pub fn tracker(&self) -> Option<&CoordinateTracker<FastBriefRegistration>> {
        self.tracker.as_ref()
    }

    pub fn detector(&self) -> &HeatSourceDetector {
        &self.detector
    }

    /// Subtract the offsets stored in a grayscale PNG from every frame
    /// before heat-source detection.
    pub fn load_compensation(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let offsets = load_compensation(path)?;
        self.detector.set_compensation(Some(offsets));
        Ok(())
    }

    /// Mutable access, e.g. to install a compensation image.
    pub fn detector_mut(&mut self) -> &mut HeatSourceDetector {
        &mut self.detector
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// The most recently processed frame.
    pub fn current(&self) -> Option<&ThermoFrame> {
        self.current.as_ref()
    }

    pub fn frames_processed(&self) -> usize {
        self.frames
    }

    /// Fetch and process one frame.
    pub fn step(&mut self) -> Result<&ThermoFrame> {
        let raw = self.source.get_frame()?;
        let scale = self.source.scale();
        let current = match self.current.take() {
            Some(mut frame) => {
                frame.set_raw(raw, scale);
                frame
            }
            None => ThermoFrame::new(raw, scale),
        };
        let current = self.current.insert(current);

        if let Some(tracker) = self.tracker.as_mut() {
            if current.pois.is_empty() {
                current.copy_layout_from(tracker.reference());
            }
            let requested = self.config.policy.mode_for(self.frames);
            let ran = tracker.track(current, requested)?;
            debug!("frame {}: {requested:?} requested, {ran:?} ran", self.frames);
        }
        current.update_temperatures();

        self.heat_sources = if current.border.is_empty() {
            Vec::new()
        } else {
            self.detector
                .detect(current.raw(), &current.border, &current.scale())?
                .unwrap_or_default()
        };

        self.frames += 1;
        Ok(current)
    }

    /// Let a background registration job finish and adopt its result.
    /// Call before dropping the session or switching policies.
    pub fn finish(&mut self) -> Result<()> {
        if let (Some(tracker), Some(current)) = (self.tracker.as_mut(), self.current.as_mut()) {
            tracker.track(current, TrackingMode::Finish)?;
        }
        Ok(())
    }

    pub fn poi_snapshot(&self) -> PoiSnapshot {
        self.current.as_ref().map(PoiSnapshot::of).unwrap_or_default()
    }

    pub fn heat_source_snapshot(&self) -> HeatSourceSnapshot {
        HeatSourceSnapshot {
            sources: self.heat_sources.clone(),
        }
    }
}
