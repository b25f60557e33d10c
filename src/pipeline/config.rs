use crate::detect::DetectConfig;
use crate::image::{Normalization, Roi};
use crate::model::{ModelKind, ModelSpec};
use crate::pairwise::PairwiseConfig;
use crate::pipeline::topology::Topology;
use crate::tile::OptimizerConfig;
use crate::util::{DescRegError, DescRegResult};
use std::path::PathBuf;

/// Maximum number of ROI refinement passes after the first registration.
pub const DEFAULT_MAX_ROI_ITERATIONS: usize = 5;

/// Configuration of a series registration.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationConfig {
    pub detect: DetectConfig,
    pub normalization: Normalization,
    pub model: ModelSpec,
    pub pairwise: PairwiseConfig,
    pub optimizer: OptimizerConfig,
    pub topology: Topology,
    /// Keep only the `n` strongest peaks per image.
    pub brightest_n: Option<usize>,
    /// Region of interest in the pixel space of every image.
    pub roi: Option<Roi>,
    pub max_roi_iterations: usize,
    /// Directory for tab-separated correspondence dumps.
    pub correspondence_dir: Option<PathBuf>,
    /// Keep per-image peak lists in the result.
    pub store_points: bool,
    /// Remember the final models in the session.
    pub store_models: bool,
    /// Detect and match on the rayon pool (requires the `rayon` feature).
    pub parallel: bool,
    /// Worker threads for pair matching; `None` uses all cores.
    pub threads: Option<usize>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            detect: DetectConfig::default(),
            normalization: Normalization::default(),
            model: ModelSpec::new(ModelKind::Rigid, 2),
            pairwise: PairwiseConfig::default(),
            optimizer: OptimizerConfig::default(),
            topology: Topology::default(),
            brightest_n: None,
            roi: None,
            max_roi_iterations: DEFAULT_MAX_ROI_ITERATIONS,
            correspondence_dir: None,
            store_points: false,
            store_models: true,
            parallel: false,
            threads: None,
        }
    }
}

impl RegistrationConfig {
    /// Configuration for `num_dimensions`-dimensional data with `kind` models.
    pub fn new(kind: ModelKind, num_dimensions: usize) -> Self {
        Self {
            model: ModelSpec::new(kind, num_dimensions),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> DescRegResult<()> {
        let d = &self.pairwise.descriptor;
        if d.num_neighbors == 0 {
            return Err(DescRegError::InvalidInput("descriptors need at least one neighbour"));
        }
        if !(d.significance >= 1.0) {
            return Err(DescRegError::InvalidInput("significance must be at least 1"));
        }
        let r = &self.pairwise.ransac;
        if !(r.max_epsilon > 0.0) || !(0.0..=1.0).contains(&r.min_inlier_ratio) {
            return Err(DescRegError::InvalidInput(
                "RANSAC epsilon must be positive and the inlier ratio within [0, 1]",
            ));
        }
        if self.threads == Some(0) {
            return Err(DescRegError::InvalidInput("thread count must be positive"));
        }
        // Surfaces unsupported model combinations before any work is done.
        self.model.create().map(|_| ())
    }
}
