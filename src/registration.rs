// registration.rs — Feature-based registration against a reference frame.
//
// The tracker talks to its feature pipeline only through the
// FeatureRegistration trait:
//
//   detect_and_describe(image)   keypoints + descriptors, deterministic
//   train(reference)             index the reference descriptors, once
//   match_reference(query)       ratio-filtered matches against the index
//   estimate_homography(p, q)    robust H, or None below 4 correspondences
//
// FastBriefRegistration is the stock implementation: FAST-9 corners, BRIEF
// descriptors, brute-force Hamming 2-NN with the ratio test, and a
// fixed-budget RANSAC. Any other backend can be swapped in without touching
// the tracker.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::descriptor::{BriefExtractor, Descriptor, Features};
use crate::error::Result;
use crate::fast::FastDetector;
use crate::homography::{estimate_homography_ransac, Homography, Point2, RansacConfig};
use crate::image::Image;
use crate::matcher::{ratio_filter, BruteForceMatcher, Match, DEFAULT_RATIO};

/// Feature detection, matching and homography estimation against one
/// trained reference.
///
/// `train` takes `&mut self` and everything after it `&self`: once trained
/// the registration can be shared read-only with a background job.
pub trait FeatureRegistration: Send + Sync {
    /// Keypoints and descriptors of `image`. Keypoints whose descriptor
    /// cannot be computed are dropped.
    fn detect_and_describe(&self, image: &Image<u8>) -> Features;

    /// Index the reference descriptors. Fails if already trained.
    fn train(&mut self, reference: &[Descriptor]) -> Result<()>;

    /// Accepted matches of `query` against the trained reference.
    /// Fails with `Error::RegistrationNotTrained` before `train`.
    fn match_reference(&self, query: &[Descriptor]) -> Result<Vec<Match>>;

    /// Homography mapping `from[i]` onto `to[i]`, or `None` when it cannot
    /// be established.
    fn estimate_homography(&self, from: &[Point2], to: &[Point2]) -> Option<Homography>;
}

/// Parameters of [`FastBriefRegistration`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub fast_threshold: u8,
    pub nonmax_suppression: bool,
    /// Ratio-test threshold.
    pub ratio: f32,
    pub ransac: RansacConfig,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig {
            fast_threshold: 18,
            nonmax_suppression: false,
            ratio: DEFAULT_RATIO,
            ransac: RansacConfig::default(),
        }
    }
}

/// FAST + BRIEF + brute-force matching + RANSAC.
#[derive(Debug, Clone)]
pub struct FastBriefRegistration {
    config: RegistrationConfig,
    detector: FastDetector,
    extractor: BriefExtractor,
    matcher: BruteForceMatcher,
}

impl Default for FastBriefRegistration {
    fn default() -> Self {
        Self::new(RegistrationConfig::default())
    }
}

impl FastBriefRegistration {
    pub fn new(config: RegistrationConfig) -> Self {
        FastBriefRegistration {
            config,
            detector: FastDetector::new(config.fast_threshold, config.nonmax_suppression),
            extractor: BriefExtractor::new(),
            matcher: BruteForceMatcher::new(),
        }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.matcher.is_trained()
    }
}

impl FeatureRegistration for FastBriefRegistration {
    fn detect_and_describe(&self, image: &Image<u8>) -> Features {
        let keypoints = self.detector.detect(image);
        let features = self.extractor.compute(image, &keypoints);
        debug!(
            "{} keypoints detected, {} described",
            keypoints.len(),
            features.len()
        );
        features
    }

    fn train(&mut self, reference: &[Descriptor]) -> Result<()> {
        self.matcher.train(reference)
    }

    fn match_reference(&self, query: &[Descriptor]) -> Result<Vec<Match>> {
        let knn = self.matcher.knn2(query)?;
        Ok(ratio_filter(&knn, self.config.ratio))
    }

    fn estimate_homography(&self, from: &[Point2], to: &[Point2]) -> Option<Homography> {
        if from.len() < 4 {
            debug!("only {} correspondences, no homography", from.len());
            return None;
        }
        let result = estimate_homography_ransac(from, to, &self.config.ransac)?;
        debug!(
            "homography from {}/{} inliers",
            result.num_inliers,
            from.len()
        );
        Some(result.homography)
    }
}
