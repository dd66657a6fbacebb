//! Frame-scoped temporary render targets.
//!
//! Temporary targets (the cube atlas, the silhouette mask, blur ping-pong
//! buffers, the scene copy) live for exactly one camera's frame. The pool
//! hands out [`ScopedTarget`] guards whose `Drop` releases the allocation
//! claim, so every exit path — including a skipped pass — returns the pool
//! to zero outstanding targets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use viscube_core::{AtlasFormat, DepthBits};

/// Maps the atlas preference format onto a wgpu texture format.
#[must_use]
pub fn atlas_texture_format(format: AtlasFormat) -> wgpu::TextureFormat {
    match format {
        AtlasFormat::RgHalf => wgpu::TextureFormat::Rg16Float,
        AtlasFormat::RgbaHalf => wgpu::TextureFormat::Rgba16Float,
        AtlasFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

/// Maps requested depth precision onto the nearest wgpu depth format.
///
/// There is no 8-bit depth format; that request rounds up to 16 bits.
#[must_use]
pub fn depth_texture_format(bits: DepthBits) -> wgpu::TextureFormat {
    match bits {
        DepthBits::B8 | DepthBits::B16 => wgpu::TextureFormat::Depth16Unorm,
        DepthBits::B24 => wgpu::TextureFormat::Depth24Plus,
        DepthBits::B32 => wgpu::TextureFormat::Depth32Float,
    }
}

/// Dimensions of the blur intermediates for a given source size and
/// downsample divider.
#[must_use]
pub fn blur_target_size(width: u32, height: u32, divider: u32) -> (u32, u32) {
    let divider = divider.max(1);
    ((width / divider).max(1), (height / divider).max(1))
}

/// Descriptor for a temporary render target.
#[derive(Debug, Clone, Copy)]
pub struct TargetDesc {
    /// Debug label applied to the textures.
    pub label: &'static str,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Color format.
    pub format: wgpu::TextureFormat,
    /// Optional depth attachment format.
    pub depth_format: Option<wgpu::TextureFormat>,
    /// Usage flags for the color texture.
    pub usage: wgpu::TextureUsages,
}

impl TargetDesc {
    /// A color-only target usable as attachment and shader input.
    #[must_use]
    pub fn color(label: &'static str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            depth_format: None,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        }
    }

    /// Adds a depth attachment.
    #[must_use]
    pub fn with_depth(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    /// Adds extra usage flags on the color texture.
    #[must_use]
    pub fn with_usage(mut self, usage: wgpu::TextureUsages) -> Self {
        self.usage |= usage;
        self
    }
}

/// Allocator for frame-scoped targets with live-allocation accounting.
#[derive(Debug, Default)]
pub struct TargetPool {
    live: Arc<AtomicUsize>,
}

impl TargetPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a temporary target. The claim is released when the returned
    /// guard is dropped.
    #[must_use]
    pub fn acquire(&self, device: &wgpu::Device, desc: &TargetDesc) -> ScopedTarget {
        let size = wgpu::Extent3d {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth = desc.depth_format.map(|format| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        });

        self.live.fetch_add(1, Ordering::Relaxed);
        let (depth_texture, depth_view) = match depth {
            Some((texture, view)) => (Some(texture), Some(view)),
            None => (None, None),
        };
        ScopedTarget {
            texture,
            view,
            depth_texture,
            depth_view,
            live: Arc::clone(&self.live),
        }
    }

    /// Number of targets currently alive. Zero between frames.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

/// A temporary render target whose pool claim is released on drop.
///
/// Dropping the guard after command recording is safe: wgpu keeps the
/// underlying textures alive until the submitted commands finish.
#[derive(Debug)]
pub struct ScopedTarget {
    /// Color texture.
    pub texture: wgpu::Texture,
    /// Render/sample view of the color texture.
    pub view: wgpu::TextureView,
    /// Depth texture, when requested.
    pub depth_texture: Option<wgpu::Texture>,
    /// Attachment view of the depth texture.
    pub depth_view: Option<wgpu::TextureView>,
    live: Arc<AtomicUsize>,
}

impl Drop for ScopedTarget {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_target_size_halves() {
        assert_eq!(blur_target_size(1920, 1080, 2), (960, 540));
        assert_eq!(blur_target_size(1920, 1080, 1), (1920, 1080));
        assert_eq!(blur_target_size(640, 480, 4), (160, 120));
    }

    #[test]
    fn test_blur_target_size_never_zero() {
        assert_eq!(blur_target_size(2, 2, 4), (1, 1));
        assert_eq!(blur_target_size(0, 0, 1), (1, 1));
    }

    #[test]
    fn test_depth_format_rounding() {
        assert_eq!(
            depth_texture_format(DepthBits::B8),
            wgpu::TextureFormat::Depth16Unorm
        );
        assert_eq!(
            depth_texture_format(DepthBits::B24),
            wgpu::TextureFormat::Depth24Plus
        );
        assert_eq!(
            depth_texture_format(DepthBits::B32),
            wgpu::TextureFormat::Depth32Float
        );
    }
}
