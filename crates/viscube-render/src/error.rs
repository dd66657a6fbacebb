//! Rendering error types.

use thiserror::Error;

/// Errors that can occur during rendering operations.
///
/// Every pass-level failure is recovered locally (the pass or slice is
/// skipped for the frame); nothing here propagates as a host failure.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The main camera matrices cannot be inverted for view-ray
    /// reconstruction.
    #[error("degenerate camera view-projection, cannot reconstruct view rays")]
    DegenerateViewProjection,

    /// Invalid pipeline configuration.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] viscube_core::CoreError),
}

/// A specialized Result type for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
