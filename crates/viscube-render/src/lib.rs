//! Rendering backend for viscube-rs.
//!
//! This crate renders an omnidirectional visibility cubemap of tagged
//! occluder geometry around a moving viewer and resolves it into a
//! screen-space occlusion mask:
//! - [`capture::CubeCapturePass`] renders 4 or 6 cube faces into a single
//!   tiled atlas texture, one viewport slice per face
//! - [`resolve::ResolveSsCubePass`] reconstructs per-pixel view rays from
//!   the main camera, samples the atlas, and optionally blurs the result
//! - [`feature::VisibilityCubeFeature`] wires both passes into a fixed-order
//!   frame schedule and owns format detection and shared settings

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod capture;
pub mod error;
pub mod feature;
pub mod occluder;
pub mod resolve;
pub mod targets;
pub mod variant;

pub use capture::CubeCapturePass;
pub use error::{RenderError, RenderResult};
pub use feature::{
    detect_atlas_format, snapshot, FramePass, FrameScheduler, InjectionPoint, SharedSettings,
    VisibilityCubeFeature,
};
pub use occluder::{OccluderDraw, OccluderSet, OccluderSource, OccluderVertex};
pub use resolve::{view_ray_basis, ResolveSsCubePass, ViewRayBasis};
pub use targets::{
    atlas_texture_format, blur_target_size, depth_texture_format, ScopedTarget, TargetDesc,
    TargetPool,
};
pub use variant::ShaderVariant;

use glam::{Mat4, Vec3};
use viscube_core::AtlasFormat;

/// Main camera state consumed by the resolve pass.
#[derive(Debug, Clone, Copy)]
pub struct CameraMatrices {
    /// World-to-view matrix.
    pub view: Mat4,
    /// View-to-clip matrix.
    pub proj: Mat4,
    /// Near clip plane distance.
    pub near: f32,
}

/// The scene color target the resolve pass composites into.
///
/// The texture must carry `COPY_SRC` usage so the pass can snapshot the
/// scene before compositing over it.
#[derive(Clone, Copy)]
pub struct SceneTarget<'a> {
    /// The scene color texture.
    pub texture: &'a wgpu::Texture,
    /// Render-attachment view of the scene color texture.
    pub view: &'a wgpu::TextureView,
    /// Format of the scene color texture.
    pub format: wgpu::TextureFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The atlas produced by the capture pass, consumed read-only by the
/// resolve pass within the same frame.
#[derive(Clone)]
pub struct AtlasBinding {
    /// The atlas color texture. Carries `COPY_SRC` for inspection.
    pub texture: wgpu::Texture,
    /// Sampleable view of the atlas color texture.
    pub view: wgpu::TextureView,
    /// Color format the atlas was captured in.
    pub format: AtlasFormat,
}

/// Per-frame context passed to every scheduled pass.
pub struct FrameContext<'a> {
    /// The wgpu device.
    pub device: &'a wgpu::Device,
    /// The wgpu queue.
    pub queue: &'a wgpu::Queue,
    /// The command encoder recording this frame.
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// The scene color target.
    pub scene: SceneTarget<'a>,
    /// The main camera.
    pub camera: CameraMatrices,
    /// Authoritative viewer world position for this frame, supplied by the
    /// host before rendering begins.
    pub viewer_pos: Vec3,
    /// Pool for frame-scoped temporary targets.
    pub pool: &'a TargetPool,
    /// Atlas published by the capture pass, if it ran this frame.
    pub atlas: Option<AtlasBinding>,
}

impl CameraMatrices {
    /// World-space camera position, recovered from the view matrix.
    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }
}
