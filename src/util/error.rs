//! Error types for descreg.

use thiserror::Error;

/// Result alias for descreg operations.
pub type DescRegResult<T> = std::result::Result<T, DescRegError>;

/// Errors that abort an operation.
///
/// Per-pair matching problems are not errors; they are reported through
/// [`MatchFailure`] so that a series registration can continue.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DescRegError {
    /// The input data or parameters are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Image dimensions are zero or overflow.
    #[error("invalid dimensions: {width}x{height}x{depth}")]
    InvalidDimensions {
        width: usize,
        height: usize,
        depth: usize,
    },
    /// The backing buffer is shorter than the declared dimensions.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Only 2D and 3D data is supported.
    #[error("unsupported dimensionality: {0}")]
    UnsupportedDimensionality(usize),
    /// Too few correspondences to fit a model.
    #[error("not enough data points: needed {needed}, got {got}")]
    NotEnoughDataPoints { needed: usize, got: usize },
    /// The correspondences do not define the model (collinear, coincident, ...).
    #[error("ill-defined data: {0}")]
    IllDefinedData(&'static str),
    /// The model has no inverse.
    #[error("model is not invertible")]
    NoninvertibleModel,
    /// The requested model combination is not supported.
    #[error("incompatible model: {reason}")]
    IncompatibleModel { reason: String },
    /// The global optimization hit a degenerate configuration.
    #[error("global optimization failed: {reason}")]
    OptimizationFailed { reason: String },
    /// The caller cancelled the run.
    #[error("registration was cancelled")]
    Cancelled,
    /// Loading an image from disk failed.
    #[error("image I/O failed: {reason}")]
    ImageIo { reason: String },
}

/// Recoverable failure of a single pairwise comparison.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MatchFailure {
    /// Too few peaks, descriptors or candidates.
    #[error("insufficient data: {reason}")]
    InsufficientData { reason: String },
    /// RANSAC found no model satisfying the thresholds.
    #[error("no convergence: {reason}")]
    NoConvergence { reason: String },
}

impl MatchFailure {
    /// Human readable reason without the category prefix.
    pub fn reason(&self) -> &str {
        match self {
            MatchFailure::InsufficientData { reason } | MatchFailure::NoConvergence { reason } => {
                reason
            }
        }
    }
}
