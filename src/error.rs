// error.rs — Crate-wide error type.
//
// Only conditions that would corrupt state or break a usage contract are
// errors. Geometry that cannot be estimated comes back as `None`, and a
// point sampled outside the frame reads as NaN; neither shows up here.

use thiserror::Error;

/// Errors produced by the tracking, detection and persistence layers.
#[derive(Debug, Error)]
pub enum Error {
    /// `match_reference` was called before `train`.
    #[error("feature registration has not been trained with reference descriptors")]
    RegistrationNotTrained,

    /// `train` was called on an index that already holds reference descriptors.
    #[error("feature registration is already trained; create a new one for a new reference")]
    RegistrationAlreadyTrained,

    #[error("malformed persisted POI state: {0}")]
    MalformedPersistedState(String),

    #[error("heat-source border needs exactly {expected} point names, got {got}")]
    BorderPointCount { expected: usize, got: usize },

    #[error("border point `{0}` not found among the persisted POIs")]
    MissingBorderPoint(String),

    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    /// A configuration value that the pipeline cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("image source has no more frames")]
    SourceExhausted,

    #[error("background tracking job panicked")]
    JobPanicked,
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
