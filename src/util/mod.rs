//! Shared utility helpers.

pub mod cancel;
pub mod error;
pub(crate) mod math;

pub use cancel::CancelToken;
pub use error::{DescRegError, DescRegResult, MatchFailure};
