//! Core abstractions for viscube-rs.
//!
//! This crate provides the GPU-independent pieces of the visibility cube
//! pipeline:
//! - The settings/configuration model ([`VisibilityCubeSettings`])
//! - Empirical guard-angle and depth-bias math ([`bias`])
//! - The fixed cube face orientation table and per-face view matrices ([`faces`])
//! - Frustum plane extraction and sphere culling ([`frustum`])
//!
//! Everything here is pure math over `glam` types and is exercised by the
//! wgpu passes in `viscube-render`.

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Settings structs legitimately have several boolean flags
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]

pub mod bias;
pub mod error;
pub mod faces;
pub mod frustum;
pub mod settings;

pub use bias::{depth_bias, frustum_fov_bias_degrees};
pub use error::{CoreError, Result};
pub use faces::{
    capture_projection, face_forward, face_rotation, face_rotations, face_view_matrix,
    CAPTURE_FAR_PLANE, CAPTURE_NEAR_PLANE, MAX_FACES,
};
pub use frustum::{frustum_planes, BoundingSphere, Frustum, Plane};
pub use settings::{
    choose_atlas_format, AtlasFormat, DepthBits, SliceCount, SliceResolution,
    VisibilityCubeSettings,
};

// Re-export glam types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
