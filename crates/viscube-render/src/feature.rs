//! Feature controller and frame scheduling.
//!
//! [`VisibilityCubeFeature`] owns the shared settings, picks the atlas
//! format the adapter supports, and registers the capture and resolve
//! passes with a [`FrameScheduler`] at fixed injection points.

use std::sync::{Arc, RwLock};

use glam::Vec3;

use viscube_core::{choose_atlas_format, AtlasFormat, VisibilityCubeSettings};

use crate::capture::CubeCapturePass;
use crate::error::RenderResult;
use crate::occluder::OccluderSource;
use crate::resolve::ResolveSsCubePass;
use crate::targets::{atlas_texture_format, TargetPool};
use crate::{CameraMatrices, FrameContext, SceneTarget};

/// Settings handle shared between the host application and the passes.
pub type SharedSettings = Arc<RwLock<VisibilityCubeSettings>>;

/// Reads the current settings, recovering the value even if a writer
/// panicked while holding the lock.
#[must_use]
pub fn snapshot(settings: &SharedSettings) -> VisibilityCubeSettings {
    match settings.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Where in the frame a pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InjectionPoint {
    /// After opaque scene geometry has been rendered.
    AfterOpaques,
    /// After post-processing, just before presentation.
    AfterPostProcessing,
}

/// A pass that participates in the frame schedule.
///
/// `setup` allocates frame-scoped resources and may mark the frame as
/// skipped, `execute` records GPU work, and `cleanup` runs for every pass
/// at the end of the frame regardless of earlier failures.
pub trait FramePass {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()>;
    fn execute(
        &mut self,
        ctx: &mut FrameContext<'_>,
        occluders: &dyn OccluderSource,
    ) -> RenderResult<()>;
    fn cleanup(&mut self, ctx: &mut FrameContext<'_>);
}

/// Runs registered passes in injection-point order.
#[derive(Default)]
pub struct FrameScheduler {
    passes: Vec<(InjectionPoint, Box<dyn FramePass>)>,
}

impl FrameScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pass; passes at the same point keep registration order.
    pub fn register(&mut self, point: InjectionPoint, pass: Box<dyn FramePass>) {
        self.passes.push((point, pass));
        self.passes.sort_by_key(|(p, _)| *p);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs one frame through every registered pass.
    ///
    /// A pass that fails setup or execute is logged and skipped; cleanup
    /// still runs for all passes so scoped targets are released.
    pub fn run_frame(&mut self, ctx: &mut FrameContext<'_>, occluders: &dyn OccluderSource) {
        for (point, pass) in &mut self.passes {
            if let Err(e) = pass.setup(ctx) {
                log::warn!("pass setup failed at {point:?}: {e}");
                continue;
            }
            if let Err(e) = pass.execute(ctx, occluders) {
                log::warn!("pass execute failed at {point:?}: {e}");
            }
        }
        for (_, pass) in &mut self.passes {
            pass.cleanup(ctx);
        }
    }
}

/// Picks the best atlas format the adapter can render to, in preference
/// order `RgHalf`, `RgbaHalf`, `Rgba8`.
#[must_use]
pub fn detect_atlas_format(adapter: &wgpu::Adapter) -> AtlasFormat {
    choose_atlas_format(|format| {
        adapter
            .get_texture_format_features(atlas_texture_format(format))
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
    })
}

/// Owns the two passes and the shared state they communicate through.
pub struct VisibilityCubeFeature {
    settings: SharedSettings,
    scheduler: FrameScheduler,
    pool: TargetPool,
    occluder_layout: wgpu::BindGroupLayout,
    atlas_format: AtlasFormat,
}

impl VisibilityCubeFeature {
    /// Creates the feature, detecting the atlas format from the adapter
    /// when the settings ask for auto-detection.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        adapter: &wgpu::Adapter,
        mut settings: VisibilityCubeSettings,
    ) -> Self {
        if settings.auto_detect_format {
            settings.format = detect_atlas_format(adapter);
        }
        Self::with_format(device, settings.format, settings)
    }

    /// Creates the feature with an explicit atlas format, bypassing
    /// adapter detection.
    #[must_use]
    pub fn with_format(
        device: &wgpu::Device,
        format: AtlasFormat,
        mut settings: VisibilityCubeSettings,
    ) -> Self {
        settings.format = format;
        log::info!("visibility cube atlas format: {format:?}");

        let shared: SharedSettings = Arc::new(RwLock::new(settings));
        let capture = CubeCapturePass::new(device, Arc::clone(&shared), format);
        let occluder_layout = capture.model_bind_group_layout().clone();
        let resolve = ResolveSsCubePass::new(device, Arc::clone(&shared), format);

        let mut scheduler = FrameScheduler::new();
        scheduler.register(InjectionPoint::AfterOpaques, Box::new(capture));
        scheduler.register(InjectionPoint::AfterPostProcessing, Box::new(resolve));

        Self {
            settings: shared,
            scheduler,
            pool: TargetPool::new(),
            occluder_layout,
            atlas_format: format,
        }
    }

    /// Shared settings handle; hosts mutate these between frames.
    #[must_use]
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Atlas format the passes are rendering in.
    #[must_use]
    pub fn atlas_format(&self) -> AtlasFormat {
        self.atlas_format
    }

    #[must_use]
    pub fn float_atlas(&self) -> bool {
        self.atlas_format.is_float()
    }

    /// Bind group layout occluder model uniforms must be created with.
    #[must_use]
    pub fn occluder_layout(&self) -> &wgpu::BindGroupLayout {
        &self.occluder_layout
    }

    /// Pool used for frame-scoped targets; exposed for leak assertions.
    #[must_use]
    pub fn pool(&self) -> &TargetPool {
        &self.pool
    }

    /// Records one frame of capture and resolve work into `encoder`.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        scene: SceneTarget<'_>,
        camera: CameraMatrices,
        viewer_pos: Vec3,
        occluders: &dyn OccluderSource,
    ) {
        let mut ctx = FrameContext {
            device,
            queue,
            encoder,
            scene,
            camera,
            viewer_pos,
            pool: &self.pool,
            atlas: None,
        };
        self.scheduler.run_frame(&mut ctx, occluders);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopPass;

    impl FramePass for NoopPass {
        fn setup(&mut self, _ctx: &mut FrameContext<'_>) -> RenderResult<()> {
            Ok(())
        }

        fn execute(
            &mut self,
            _ctx: &mut FrameContext<'_>,
            _occluders: &dyn OccluderSource,
        ) -> RenderResult<()> {
            Ok(())
        }

        fn cleanup(&mut self, _ctx: &mut FrameContext<'_>) {}
    }

    #[test]
    fn test_snapshot_reads_current_value() {
        let shared: SharedSettings = Arc::new(RwLock::new(VisibilityCubeSettings::default()));
        {
            let mut guard = shared.write().unwrap();
            guard.blur = true;
        }
        assert!(snapshot(&shared).blur);
    }

    #[test]
    fn test_snapshot_survives_poisoned_lock() {
        let shared: SharedSettings = Arc::new(RwLock::new(VisibilityCubeSettings::default()));
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(shared.is_poisoned());
        let _ = snapshot(&shared);
    }

    #[test]
    fn test_injection_points_order() {
        assert!(InjectionPoint::AfterOpaques < InjectionPoint::AfterPostProcessing);
    }

    #[test]
    fn test_scheduler_sorts_by_injection_point() {
        let mut scheduler = FrameScheduler::new();
        scheduler.register(InjectionPoint::AfterPostProcessing, Box::new(NoopPass));
        scheduler.register(InjectionPoint::AfterOpaques, Box::new(NoopPass));
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.passes[0].0, InjectionPoint::AfterOpaques);
        assert_eq!(scheduler.passes[1].0, InjectionPoint::AfterPostProcessing);
    }
}
