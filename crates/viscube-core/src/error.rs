//! Error types for viscube-rs.

use thiserror::Error;

/// The main error type for viscube core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The downsample divider is outside the supported range.
    #[error("downsample divider {0} out of range (expected 1..=4)")]
    InvalidDownsampleDivider(u32),

    /// A cube face index outside the configured slice count was requested.
    #[error("face index {index} out of range for {count} slices")]
    FaceIndexOutOfRange { index: usize, count: usize },

    /// Frustum plane extraction hit a degenerate view-projection matrix.
    #[error("degenerate view-projection matrix, cannot extract frustum planes")]
    DegenerateFrustum,
}

/// A specialized Result type for viscube core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
