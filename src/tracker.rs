// tracker.rs — Keeps POIs and the heat-source border glued to the board.
//
// The user places POIs once, on a reference frame. When the camera or the
// board moves, the tracker estimates the reference→current homography and
// re-projects every reference POI (and the border) into the current frame.
//
// Modes:
//   Off     leave the current layout alone
//   Copy    overwrite the current layout with the reference layout
//   Sync    wait for and drop any pending job, then register on the
//           calling thread
//   Async   register on a background thread; adopt a finished job's result,
//           start a new job when none is running, never queue
//   Finish  wait for the running job (if any) and adopt its result
//
// Before any of that a contrast guard runs: with less than 7 °C between the
// hottest and coldest pixel there is too little texture to register
// against, so the request is downgraded to Copy (no POIs yet) or Off.
//
// One registration step:
//   1. preprocess the current grayscale (median → CLAHE → unsharp)
//   2. describe it, match against the trained reference, estimate H
//   3. no H: layout untouched
//   4. realign the POI list with the reference if the lengths differ, then
//      move every POI to H·reference_position and update its stability
//   5. move the border through H
//   6. if the first POI's stability exceeds 10 px, tracking has diverged:
//      fall back to the reference positions and border
// Afterwards every POI temperature is re-sampled from the current frame.
//
// A background job works on a private copy of the layout and hands back a
// complete new layout, swapped in as a whole.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::{preprocess, PreprocessConfig};
use crate::frame::{Poi, ThermoFrame, STABILITY_WINDOW};
use crate::homography::{Homography, Point2};
use crate::image::Image;
use crate::registration::FeatureRegistration;

/// Requested tracking behaviour for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Off,
    Copy,
    Sync,
    Async,
    Finish,
}

/// Tracker parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum hottest−coldest spread (°C) for registration to be attempted.
    pub min_contrast: f32,
    /// Samples in each POI's stability window.
    pub stability_window: usize,
    /// First-POI stability above which tracking counts as diverged.
    pub stability_limit: f32,
    pub preprocess: PreprocessConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            min_contrast: 7.0,
            stability_window: STABILITY_WINDOW,
            stability_limit: 10.0,
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Reject values the tracker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stability_window == 0 {
            return Err(Error::InvalidConfig("tracker.stability_window must be at least 1".into()));
        }
        if !self.min_contrast.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "tracker.min_contrast must be finite, got {}",
                self.min_contrast
            )));
        }
        if !(self.stability_limit > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tracker.stability_limit must be positive, got {}",
                self.stability_limit
            )));
        }
        if !(self.preprocess.sharpen_sigma > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "tracker.preprocess.sharpen_sigma must be positive, got {}",
                self.preprocess.sharpen_sigma
            )));
        }
        Ok(())
    }
}

/// POIs plus border: the part of a frame the tracker rewrites.
#[derive(Debug, Clone, Default)]
struct Layout {
    pois: Vec<Poi>,
    border: Vec<Point2>,
}

impl Layout {
    fn of(frame: &ThermoFrame) -> Self {
        Layout {
            pois: frame.pois.clone(),
            border: frame.border.clone(),
        }
    }

    fn install(self, frame: &mut ThermoFrame) {
        frame.pois = self.pois;
        frame.border = self.border;
    }
}

/// Everything a registration step reads. Cheap to clone into a job.
struct Context<R> {
    config: TrackerConfig,
    registration: Arc<R>,
    reference: Arc<ThermoFrame>,
    reference_points: Arc<[Point2]>,
}

impl<R> Clone for Context<R> {
    fn clone(&self) -> Self {
        Context {
            config: self.config,
            registration: Arc::clone(&self.registration),
            reference: Arc::clone(&self.reference),
            reference_points: Arc::clone(&self.reference_points),
        }
    }
}

impl<R: FeatureRegistration> Context<R> {
    /// Homography from the reference onto `gray`, if one can be found.
    fn estimate(&self, gray: &Image<u8>) -> Result<Option<Homography>> {
        let enhanced = preprocess(gray, &self.config.preprocess);
        let features = self.registration.detect_and_describe(&enhanced);
        let matches = self.registration.match_reference(&features.descriptors)?;

        let mut from = Vec::with_capacity(matches.len());
        let mut to = Vec::with_capacity(matches.len());
        for m in &matches {
            if let (Some(r), Some(q)) = (
                self.reference_points.get(m.reference),
                features.keypoints.get(m.query),
            ) {
                from.push(*r);
                to.push(Point2::new(q.x, q.y));
            }
        }
        debug!("{} accepted matches", from.len());
        Ok(self.registration.estimate_homography(&from, &to))
    }

    /// One registration step on `layout`. Returns the new layout, or `None`
    /// when no homography was found and the layout must stay as it is.
    fn register(&self, gray: &Image<u8>, mut layout: Layout) -> Result<Option<Layout>> {
        let Some(h) = self.estimate(gray)? else {
            debug!("no homography; keeping previous positions");
            return Ok(None);
        };
        let reference = &self.reference;

        if layout.pois.len() != reference.pois.len() {
            debug!(
                "POI count {} differs from reference {}; realigning",
                layout.pois.len(),
                reference.pois.len()
            );
            layout.pois = reference.pois.clone();
        }
        for (poi, ref_poi) in layout.pois.iter_mut().zip(&reference.pois) {
            poi.observe(h.apply(ref_poi.position), self.config.stability_window);
        }
        if !reference.border.is_empty() {
            layout.border = reference.border.iter().map(|p| h.apply(*p)).collect();
        }

        if let Some(first) = layout.pois.first() {
            // NaN or infinite stability counts as diverged.
            if !(first.stability <= self.config.stability_limit) {
                info!(
                    "tracking diverged (stability {:.2} > {:.2}); reverting to reference positions",
                    first.stability, self.config.stability_limit
                );
                for (poi, ref_poi) in layout.pois.iter_mut().zip(&reference.pois) {
                    poi.position = ref_poi.position;
                }
                layout.border = reference.border.clone();
            }
        }
        Ok(Some(layout))
    }
}

/// Tracks POIs of a reference frame into later frames.
pub struct CoordinateTracker<R: FeatureRegistration + 'static> {
    ctx: Context<R>,
    job: Option<JoinHandle<Result<Option<Layout>>>>,
    jobs_started: usize,
}

impl<R: FeatureRegistration + 'static> CoordinateTracker<R> {
    /// Train `registration` on `reference` and set up tracking against it.
    pub fn new(mut reference: ThermoFrame, mut registration: R, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let enhanced = preprocess(reference.gray(), &config.preprocess);
        let features = registration.detect_and_describe(&enhanced);
        registration.train(&features.descriptors)?;
        info!(
            "reference trained with {} features, {} POIs",
            features.len(),
            reference.pois.len()
        );

        reference.update_temperatures();
        let reference_points: Arc<[Point2]> = features
            .keypoints
            .iter()
            .map(|k| Point2::new(k.x, k.y))
            .collect();
        Ok(CoordinateTracker {
            ctx: Context {
                config,
                registration: Arc::new(registration),
                reference: Arc::new(reference),
                reference_points,
            },
            job: None,
            jobs_started: 0,
        })
    }

    pub fn reference(&self) -> &ThermoFrame {
        &self.ctx.reference
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.ctx.config
    }

    /// Number of background jobs launched so far.
    pub fn jobs_started(&self) -> usize {
        self.jobs_started
    }

    /// True while a background job is still computing.
    pub fn job_running(&self) -> bool {
        self.job.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// True when a job exists, running or finished but not yet adopted.
    pub fn job_pending(&self) -> bool {
        self.job.is_some()
    }

    /// Mode that will actually run once the contrast guard has had its say.
    pub fn effective_mode(&self, current: &ThermoFrame, requested: TrackingMode) -> TrackingMode {
        if matches!(requested, TrackingMode::Off | TrackingMode::Finish) {
            return requested;
        }
        let contrast = self.ctx.reference.contrast().min(current.contrast());
        if contrast < self.ctx.config.min_contrast {
            let forced = if current.pois.is_empty() {
                TrackingMode::Copy
            } else {
                TrackingMode::Off
            };
            debug!(
                "contrast {contrast:.2} °C below {:.2} °C; {requested:?} forced to {forced:?}",
                self.ctx.config.min_contrast
            );
            return forced;
        }
        requested
    }

    /// Update `current`'s POIs and border. Returns the mode that ran.
    pub fn track(&mut self, current: &mut ThermoFrame, mode: TrackingMode) -> Result<TrackingMode> {
        let mode = self.effective_mode(current, mode);
        match mode {
            TrackingMode::Off => return Ok(mode),
            TrackingMode::Copy => current.copy_layout_from(&self.ctx.reference),
            TrackingMode::Sync => {
                self.discard_job()?;
                self.bootstrap(current);
                let next = self.ctx.register(current.gray(), Layout::of(current))?;
                if let Some(layout) = next {
                    layout.install(current);
                }
            }
            TrackingMode::Async => {
                self.bootstrap(current);
                self.poll_and_adopt(current)?;
                if self.job.is_none() {
                    self.start(current);
                }
            }
            TrackingMode::Finish => self.block_until_done(current)?,
        }
        current.update_temperatures();
        Ok(mode)
    }

    /// Launch a job on a copy of `current`'s layout.
    fn start(&mut self, current: &ThermoFrame) {
        let ctx = self.ctx.clone();
        let gray = current.gray().clone();
        let layout = Layout::of(current);
        self.job = Some(thread::spawn(move || ctx.register(&gray, layout)));
        self.jobs_started += 1;
        debug!("background registration job #{} started", self.jobs_started);
    }

    /// Adopt the result of a finished job. A running job is left alone.
    fn poll_and_adopt(&mut self, current: &mut ThermoFrame) -> Result<()> {
        if self.job.as_ref().is_some_and(|h| h.is_finished()) {
            self.block_until_done(current)?;
        }
        Ok(())
    }

    /// Wait for the job, if any, and adopt its result.
    fn block_until_done(&mut self, current: &mut ThermoFrame) -> Result<()> {
        let Some(handle) = self.job.take() else {
            return Ok(());
        };
        let result = handle.join().map_err(|_| Error::JobPanicked)?;
        if let Some(layout) = result? {
            debug!("background registration result adopted");
            layout.install(current);
        }
        Ok(())
    }

    /// Wait for the job, if any, and drop its result. A layout computed
    /// from an older frame must not overwrite a synchronous result.
    fn discard_job(&mut self) -> Result<()> {
        if let Some(handle) = self.job.take() {
            let _stale = handle.join().map_err(|_| Error::JobPanicked)?;
            debug!("pending background result discarded by synchronous registration");
        }
        Ok(())
    }

    fn bootstrap(&self, current: &mut ThermoFrame) {
        if current.pois.is_empty() && !self.ctx.reference.pois.is_empty() {
            debug!("current frame has no POIs; copying from reference");
            current.copy_layout_from(&self.ctx.reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Descriptor, Features};
    use crate::matcher::Match;
    use crate::source::TemperatureScale;
    use nalgebra::Matrix3;
    use std::sync::Mutex;

    /// Registration that replays a fixed list of homographies.
    struct Scripted {
        script: Mutex<Vec<Option<Homography>>>,
        trained: bool,
    }

    impl Scripted {
        fn new(mut script: Vec<Option<Homography>>) -> Self {
            script.reverse();
            Scripted {
                script: Mutex::new(script),
                trained: false,
            }
        }
    }

    impl FeatureRegistration for Scripted {
        fn detect_and_describe(&self, _image: &Image<u8>) -> Features {
            Features::default()
        }

        fn train(&mut self, _reference: &[Descriptor]) -> Result<()> {
            self.trained = true;
            Ok(())
        }

        fn match_reference(&self, _query: &[Descriptor]) -> Result<Vec<Match>> {
            if self.trained {
                Ok(Vec::new())
            } else {
                Err(Error::RegistrationNotTrained)
            }
        }

        fn estimate_homography(&self, _from: &[Point2], _to: &[Point2]) -> Option<Homography> {
            self.script.lock().unwrap().pop().flatten()
        }
    }

    fn frame(hot: u16) -> ThermoFrame {
        let raw = Image::from_fn(40, 30, |x, y| if x > 20 && y > 10 { hot } else { 10 });
        ThermoFrame::new(raw, TemperatureScale::recorded())
    }

    fn reference() -> ThermoFrame {
        let mut f = frame(200);
        f.add_poi("a", Point2::new(5.0, 5.0));
        f.add_poi("b", Point2::new(25.0, 15.0));
        f.border = vec![
            Point2::new(2.0, 2.0),
            Point2::new(30.0, 2.0),
            Point2::new(30.0, 25.0),
            Point2::new(2.0, 25.0),
        ];
        f
    }

    fn tracker(script: Vec<Option<Homography>>) -> CoordinateTracker<Scripted> {
        CoordinateTracker::new(reference(), Scripted::new(script), TrackerConfig::default()).unwrap()
    }

    #[test]
    fn test_sync_applies_homography() {
        let mut t = tracker(vec![Some(Homography::translation(2.0, 1.0))]);
        let mut cur = frame(200);
        assert_eq!(t.track(&mut cur, TrackingMode::Sync).unwrap(), TrackingMode::Sync);
        assert_eq!(cur.pois[0].position, Point2::new(7.0, 6.0));
        assert_eq!(cur.border[2], Point2::new(32.0, 26.0));
        assert!(!cur.pois[1].temperature.is_nan());
    }

    #[test]
    fn test_copy_mirrors_reference() {
        let mut t = tracker(vec![]);
        let mut cur = frame(200);
        cur.add_poi("stray", Point2::new(1.0, 1.0));
        t.track(&mut cur, TrackingMode::Copy).unwrap();
        assert_eq!(cur.pois.len(), 2);
        assert_eq!(cur.pois[1].name, "b");
    }

    #[test]
    fn test_low_contrast_without_pois_copies() {
        let mut t = tracker(vec![Some(Homography::translation(9.0, 9.0))]);
        let mut cur = frame(20);
        assert_eq!(t.track(&mut cur, TrackingMode::Sync).unwrap(), TrackingMode::Copy);
        assert_eq!(cur.pois[0].position, Point2::new(5.0, 5.0));
    }

    #[test]
    fn test_point_sent_to_infinity_reverts_to_reference() {
        // Third row (1, 0, -5): w = 0 at x = 5, where POI "a" sits.
        let vanishing = Homography(Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -5.0));
        let mut t = tracker(vec![Some(vanishing), Some(Homography::translation(2.0, 1.0))]);
        let mut cur = frame(200);

        t.track(&mut cur, TrackingMode::Sync).unwrap();
        assert_eq!(cur.pois[0].position, Point2::new(5.0, 5.0));
        assert_eq!(cur.border, t.reference().border);
        assert!(cur.border.iter().all(|p| p.x.is_finite() && p.y.is_finite()));

        // The bad frame left no trace in the history.
        t.track(&mut cur, TrackingMode::Sync).unwrap();
        assert_eq!(cur.pois[0].position, Point2::new(7.0, 6.0));
        assert_eq!(cur.pois[0].stability, 0.0);
    }

    #[test]
    fn test_sync_drops_pending_background_result() {
        let mut t = tracker(vec![
            Some(Homography::translation(9.0, 9.0)),
            Some(Homography::translation(1.0, 2.0)),
        ]);
        let mut cur = frame(200);
        cur.copy_layout_from(t.reference());
        t.track(&mut cur, TrackingMode::Async).unwrap();
        assert_eq!(t.jobs_started(), 1);

        t.track(&mut cur, TrackingMode::Sync).unwrap();
        assert!(!t.job_pending());
        assert_eq!(cur.pois[0].position, Point2::new(6.0, 7.0));

        t.track(&mut cur, TrackingMode::Finish).unwrap();
        assert_eq!(cur.pois[0].position, Point2::new(6.0, 7.0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TrackerConfig {
            stability_window: 0,
            ..TrackerConfig::default()
        };
        let result = CoordinateTracker::new(reference(), Scripted::new(vec![]), config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let config = TrackerConfig {
            stability_limit: f32::NAN,
            ..TrackerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_finish_without_job_is_noop() {
        let mut t = tracker(vec![]);
        let mut cur = frame(200);
        assert_eq!(t.track(&mut cur, TrackingMode::Finish).unwrap(), TrackingMode::Finish);
        assert!(cur.pois.is_empty());
    }

    #[test]
    fn test_async_then_finish_adopts() {
        let mut t = tracker(vec![Some(Homography::translation(-1.0, 3.0))]);
        let mut cur = frame(200);
        cur.copy_layout_from(t.reference());
        t.track(&mut cur, TrackingMode::Async).unwrap();
        assert_eq!(t.jobs_started(), 1);
        t.track(&mut cur, TrackingMode::Finish).unwrap();
        assert!(!t.job_pending());
        assert_eq!(cur.pois[1].position, Point2::new(24.0, 18.0));
    }
}
