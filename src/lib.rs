// thermocam-pcb: POI tracking and heat-source detection for thermal images
// of circuit boards.
//
// Two pipelines share one frame:
//   tracker       reference→current homography, POIs and border re-projected
//   heat_sources  border region rectified to 100×100, Laplacian hotspots,
//                 multi-timescale averages
// The session module strings them together per frame.

pub mod error;

// Image primitives
pub mod image;
pub mod convert;
pub mod convolution;
pub mod filter;
pub mod histeq;

// Feature registration
pub mod fast;
pub mod descriptor;
pub mod matcher;
pub mod homography;
pub mod registration;

// Accumulators
pub mod rolling;
pub mod ema;

// Frames and pipelines
pub mod source;
pub mod frame;
pub mod tracker;
pub mod heat_sources;
pub mod persist;
pub mod session;

pub use error::{Error, Result};
