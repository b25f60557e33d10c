//! descreg registers series of 2D or 3D microscope images from detected blobs.
//!
//! Blobs are found as difference-of-Gaussian extrema and matched between image
//! pairs with local point descriptors that are invariant to rotation and
//! translation. RANSAC with a trust filter rejects wrong correspondences and a
//! global optimization over all pairs yields one transform per image.
//! Detection and pair matching can run in parallel via the `rayon` feature;
//! loading images from disk needs the `image-io` feature.

mod trace;

pub mod descriptor;
pub mod detect;
pub mod image;
pub mod model;
pub mod pairwise;
pub mod pipeline;
pub mod point;
pub mod ransac;
pub mod spatial;
pub mod tile;
pub mod util;

pub use descriptor::DescriptorConfig;
pub use detect::{detect_peaks, DetectConfig, Detection, DetectionStats, Localization, Peak};
pub use image::{Normalization, Roi, Volume};
pub use model::{Model, ModelKind, ModelSpec};
pub use pairwise::{pairwise_matching, PairMatch, PairwiseConfig};
pub use pipeline::{
    reapply_series, register_pair, register_peaks, register_series, track_brightest_peak,
    ComparisonPair, PairRegistration, PairResult, RegistrationConfig, RegistrationResult,
    RegistrationSession, Topology,
};
pub use point::{Particle, PointMatch};
pub use ransac::RansacConfig;
pub use tile::OptimizerConfig;
pub use util::{CancelToken, DescRegError, DescRegResult, MatchFailure};
