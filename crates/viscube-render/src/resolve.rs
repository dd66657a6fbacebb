//! Screen-space resolve pass.
//!
//! Consumes the atlas published by the capture pass, reconstructs per-pixel
//! view rays from the main camera matrices, and composites the occlusion
//! mask into the scene color target, optionally through a two-pass
//! separable blur at reduced resolution.

use bytemuck::Zeroable;
use glam::{Mat4, Vec3, Vec4};
use wgpu::util::DeviceExt;

use viscube_core::AtlasFormat;

use crate::capture::{frame_uniforms, FaceUniforms};
use crate::error::RenderResult;
use crate::feature::{snapshot, FramePass, SharedSettings};
use crate::occluder::{model_bind_group_layout, OccluderSource, OccluderVertex};
use crate::targets::{
    atlas_texture_format, blur_target_size, depth_texture_format, ScopedTarget, TargetDesc,
};
use crate::variant::ShaderVariant;
use crate::{CameraMatrices, FrameContext};

/// View-ray reconstruction basis: the main camera's near-plane corners in
/// translation-stripped world space, plus the far-plane centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewRayBasis {
    /// Top-left near corner.
    pub top_left: Vec3,
    /// Vector from the top-left to the top-right corner.
    pub x_extent: Vec3,
    /// Vector from the top-left to the bottom-left corner.
    pub y_extent: Vec3,
    /// Centre of the far plane.
    pub far_centre: Vec3,
}

/// Computes the view-ray basis by un-projecting the NDC frustum corners
/// through the translation-stripped view-projection inverse.
///
/// Returns `None` when the combined matrix is not invertible.
#[must_use]
pub fn view_ray_basis(view: Mat4, proj: Mat4) -> Option<ViewRayBasis> {
    let mut stripped = view;
    stripped.w_axis = Vec4::new(0.0, 0.0, 0.0, 1.0);

    let view_proj = proj * stripped;
    let inverse = view_proj.inverse();
    if !inverse.is_finite() {
        return None;
    }

    // wgpu NDC: near plane at z = 0, far plane at z = 1.
    let top_left = inverse.project_point3(Vec3::new(-1.0, 1.0, 0.0));
    let top_right = inverse.project_point3(Vec3::new(1.0, 1.0, 0.0));
    let bottom_left = inverse.project_point3(Vec3::new(-1.0, -1.0, 0.0));
    let far_centre = inverse.project_point3(Vec3::new(0.0, 0.0, 1.0));

    Some(ViewRayBasis {
        top_left,
        x_extent: top_right - top_left,
        y_extent: bottom_left - top_left,
        far_centre,
    })
}

/// GPU representation of the resolve uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResolveUniforms {
    /// Main camera projection * view.
    pub view_proj: [[f32; 4]; 4],
    /// Near-plane top-left corner.
    pub top_left: [f32; 4],
    /// Top edge extent.
    pub x_extent: [f32; 4],
    /// Left edge extent.
    pub y_extent: [f32; 4],
    /// Far-plane centre.
    pub far_centre: [f32; 4],
    /// x = 1 / near plane.
    pub projection_params: [f32; 4],
    /// Bias offset vector.
    pub bias: [f32; 4],
    /// xyz = viewer world position, w = capture far plane.
    pub viewer_pos: [f32; 4],
    /// xyz = viewer position minus camera position.
    pub viewer_offset: [f32; 4],
}

/// GPU representation of the blur uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurUniforms {
    /// x = width, y = height, z = 1/width, w = 1/height of the blur source.
    pub src_size: [f32; 4],
    /// x = 1 / downsample divider.
    pub params: [f32; 4],
}

/// Key describing the pipeline set currently built; a change forces a
/// rebuild on the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PipelineKey {
    variant: ShaderVariant,
    scene_format: wgpu::TextureFormat,
    atlas_format: AtlasFormat,
    silhouette_depth: wgpu::TextureFormat,
}

struct ResolvePipelines {
    key: PipelineKey,
    resolve: wgpu::RenderPipeline,
    blur_h: wgpu::RenderPipeline,
    blur_v: wgpu::RenderPipeline,
    blur_final: wgpu::RenderPipeline,
    silhouette: wgpu::RenderPipeline,
}

/// The screen-space resolve pass.
pub struct ResolveSsCubePass {
    settings: SharedSettings,
    atlas_format: AtlasFormat,
    resolve_layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    sil_frame_layout: wgpu::BindGroupLayout,
    sil_face_layout: wgpu::BindGroupLayout,
    model_layout: wgpu::BindGroupLayout,
    resolve_buffer: wgpu::Buffer,
    blur_buffer: wgpu::Buffer,
    sil_frame_buffer: wgpu::Buffer,
    sil_face_buffer: wgpu::Buffer,
    sil_frame_bind_group: wgpu::BindGroup,
    sil_face_bind_group: wgpu::BindGroup,
    sampler: wgpu::Sampler,
    pipelines: Option<ResolvePipelines>,
    silhouette: Option<ScopedTarget>,
    skip_frame: bool,
}

impl ResolveSsCubePass {
    /// Creates the pass; pipelines are built lazily on first execution.
    #[must_use]
    pub fn new(device: &wgpu::Device, settings: SharedSettings, atlas_format: AtlasFormat) -> Self {
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let resolve_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Resolve Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                // Cube atlas
                texture_entry(1),
                // Occluder silhouette mask
                texture_entry(2),
                // Scene color copy
                texture_entry(3),
                sampler_entry(4),
            ],
        });

        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blur Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                // Previous pass output
                texture_entry(1),
                // Scene color copy
                texture_entry(2),
                sampler_entry(3),
            ],
        });

        // The silhouette draw reuses the capture shader's bind group shape.
        let sil_frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Silhouette Frame Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let sil_face_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Silhouette View Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let model_layout = model_bind_group_layout(device);

        let resolve_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Resolve Uniforms"),
            contents: bytemuck::cast_slice(&[ResolveUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let blur_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Blur Uniforms"),
            contents: bytemuck::cast_slice(&[BlurUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let sil_frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Silhouette Frame Uniforms"),
            contents: bytemuck::cast_slice(&[crate::capture::FrameUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let sil_face_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Silhouette View Uniforms"),
            contents: bytemuck::cast_slice(&[FaceUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let sil_frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Silhouette Frame Bind Group"),
            layout: &sil_frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: sil_frame_buffer.as_entire_binding(),
            }],
        });
        let sil_face_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Silhouette View Bind Group"),
            layout: &sil_face_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: sil_face_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Resolve Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            ..Default::default()
        });

        Self {
            settings,
            atlas_format,
            resolve_layout,
            blur_layout,
            sil_frame_layout,
            sil_face_layout,
            model_layout,
            resolve_buffer,
            blur_buffer,
            sil_frame_buffer,
            sil_face_buffer,
            sil_frame_bind_group,
            sil_face_bind_group,
            sampler,
            pipelines: None,
            silhouette: None,
            skip_frame: false,
        }
    }

    fn fullscreen_pipeline(
        device: &wgpu::Device,
        label: &str,
        module: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        fragment_entry: &str,
        target_format: wgpu::TextureFormat,
    ) -> wgpu::RenderPipeline {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some(fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    fn build_pipelines(&self, device: &wgpu::Device, key: PipelineKey) -> ResolvePipelines {
        let resolve_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Resolve Shader"),
            source: wgpu::ShaderSource::Wgsl(
                key.variant
                    .apply(include_str!("shaders/resolve.wgsl"))
                    .into(),
            ),
        });
        let blur_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blur Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blur.wgsl").into()),
        });
        let silhouette_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Silhouette Shader"),
            source: wgpu::ShaderSource::Wgsl(
                key.variant
                    .apply(include_str!("shaders/capture.wgsl"))
                    .into(),
            ),
        });

        let resolve_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Resolve Pipeline Layout"),
                bind_group_layouts: &[&self.resolve_layout],
                push_constant_ranges: &[],
            });
        let blur_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blur Pipeline Layout"),
            bind_group_layouts: &[&self.blur_layout],
            push_constant_ranges: &[],
        });
        let silhouette_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Silhouette Pipeline Layout"),
                bind_group_layouts: &[
                    &self.sil_frame_layout,
                    &self.sil_face_layout,
                    &self.model_layout,
                ],
                push_constant_ranges: &[],
            });

        // With blur enabled the resolve output feeds the blur chain instead
        // of the scene target.
        let resolve_target = if key.variant.sample_scene_color {
            key.scene_format
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };

        let resolve = Self::fullscreen_pipeline(
            device,
            "Resolve Pipeline",
            &resolve_module,
            &resolve_pipeline_layout,
            "fs_resolve",
            resolve_target,
        );
        let blur_h = Self::fullscreen_pipeline(
            device,
            "Blur Horizontal Pipeline",
            &blur_module,
            &blur_pipeline_layout,
            "fs_blur_h",
            wgpu::TextureFormat::Rgba8Unorm,
        );
        let blur_v = Self::fullscreen_pipeline(
            device,
            "Blur Vertical Pipeline",
            &blur_module,
            &blur_pipeline_layout,
            "fs_blur_v",
            wgpu::TextureFormat::Rgba8Unorm,
        );
        let blur_final = Self::fullscreen_pipeline(
            device,
            "Blur Final Pipeline",
            &blur_module,
            &blur_pipeline_layout,
            "fs_final",
            key.scene_format,
        );

        let silhouette = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Silhouette Pipeline"),
            layout: Some(&silhouette_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &silhouette_module,
                entry_point: Some("vs_main"),
                buffers: &[OccluderVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &silhouette_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: atlas_texture_format(key.atlas_format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: key.silhouette_depth,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        ResolvePipelines {
            key,
            resolve,
            blur_h,
            blur_v,
            blur_final,
            silhouette,
        }
    }

    fn draw_fullscreen(
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        target: &wgpu::TextureView,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn blur_bind_group(
        &self,
        device: &wgpu::Device,
        source: &wgpu::TextureView,
        scene_copy: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blur Bind Group"),
            layout: &self.blur_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.blur_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(scene_copy),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn write_resolve_uniforms(
        &self,
        queue: &wgpu::Queue,
        camera: &CameraMatrices,
        basis: &ViewRayBasis,
        settings: &viscube_core::VisibilityCubeSettings,
        viewer_pos: Vec3,
    ) {
        let frame = frame_uniforms(settings, viewer_pos, camera.world_position());
        let vec4 = |v: Vec3| [v.x, v.y, v.z, 0.0];
        let uniforms = ResolveUniforms {
            view_proj: (camera.proj * camera.view).to_cols_array_2d(),
            top_left: vec4(basis.top_left),
            x_extent: vec4(basis.x_extent),
            y_extent: vec4(basis.y_extent),
            far_centre: vec4(basis.far_centre),
            projection_params: [1.0 / camera.near.max(1e-6), 0.0, 0.0, 0.0],
            bias: [
                settings.bias_offset.x,
                settings.bias_offset.y,
                settings.bias_offset.z,
                0.0,
            ],
            viewer_pos: frame.viewer_pos,
            viewer_offset: frame.viewer_offset,
        };
        queue.write_buffer(&self.resolve_buffer, 0, bytemuck::cast_slice(&[uniforms]));
    }
}

impl FramePass for ResolveSsCubePass {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let settings = snapshot(&self.settings);
        if let Err(e) = settings.validate() {
            log::warn!("resolve pass skipped: {e}");
            self.skip_frame = true;
            return Ok(());
        }
        self.skip_frame = false;

        let desc = TargetDesc::color(
            "Occluder Silhouette",
            ctx.scene.width,
            ctx.scene.height,
            atlas_texture_format(self.atlas_format),
        )
        .with_depth(depth_texture_format(settings.depth_bits));
        self.silhouette = Some(ctx.pool.acquire(ctx.device, &desc));
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut FrameContext<'_>,
        occluders: &dyn OccluderSource,
    ) -> RenderResult<()> {
        if self.skip_frame {
            return Ok(());
        }
        let Some(atlas) = ctx.atlas.clone() else {
            // Capture did not run; nothing to resolve.
            return Ok(());
        };
        let Some(silhouette) = self.silhouette.take() else {
            return Ok(());
        };
        let settings = snapshot(&self.settings);

        // Lazy pipeline build, redone when the variant or target formats
        // change (e.g. blur toggled mid-session).
        let key = PipelineKey {
            variant: ShaderVariant::from_settings(&settings, self.atlas_format),
            scene_format: ctx.scene.format,
            atlas_format: self.atlas_format,
            silhouette_depth: depth_texture_format(settings.depth_bits),
        };
        if self.pipelines.as_ref().is_none_or(|p| p.key != key) {
            self.pipelines = Some(self.build_pipelines(ctx.device, key));
        }
        let Some(pipelines) = self.pipelines.as_ref() else {
            return Ok(());
        };

        // Silhouette of the occluders through the main camera, used by the
        // resolve shader to keep occluder pixels lit.
        let frame = frame_uniforms(&settings, ctx.viewer_pos, ctx.camera.world_position());
        ctx.queue
            .write_buffer(&self.sil_frame_buffer, 0, bytemuck::cast_slice(&[frame]));
        ctx.queue.write_buffer(
            &self.sil_face_buffer,
            0,
            bytemuck::cast_slice(&[FaceUniforms {
                view_proj: (ctx.camera.proj * ctx.camera.view).to_cols_array_2d(),
            }]),
        );
        {
            let Some(depth_view) = silhouette.depth_view.as_ref() else {
                return Ok(());
            };
            let mut pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Occluder Silhouette Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &silhouette.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });
            pass.set_pipeline(&pipelines.silhouette);
            pass.set_bind_group(0, &self.sil_frame_bind_group, &[]);
            pass.set_bind_group(1, &self.sil_face_bind_group, &[]);
            for draw in occluders.visible_occluders() {
                pass.set_bind_group(2, &draw.model_bind_group, &[]);
                pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
                pass.set_index_buffer(draw.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..draw.index_count, 0, 0..1);
            }
        }

        let Some(basis) = view_ray_basis(ctx.camera.view, ctx.camera.proj) else {
            // The scheduler logs this and the frame degrades; the guards
            // release the targets on the way out.
            return Err(crate::RenderError::DegenerateViewProjection);
        };
        self.write_resolve_uniforms(ctx.queue, &ctx.camera, &basis, &settings, ctx.viewer_pos);

        // Snapshot the scene color so the composite can read it while
        // writing the real target.
        let scene_copy = ctx.pool.acquire(
            ctx.device,
            &TargetDesc::color(
                "Scene Color Copy",
                ctx.scene.width,
                ctx.scene.height,
                ctx.scene.format,
            )
            .with_usage(wgpu::TextureUsages::COPY_DST),
        );
        ctx.encoder.copy_texture_to_texture(
            ctx.scene.texture.as_image_copy(),
            scene_copy.texture.as_image_copy(),
            wgpu::Extent3d {
                width: ctx.scene.width,
                height: ctx.scene.height,
                depth_or_array_layers: 1,
            },
        );

        let resolve_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Resolve Bind Group"),
            layout: &self.resolve_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.resolve_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&atlas.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&silhouette.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&scene_copy.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        if settings.blur {
            let (blur_w, blur_h) = blur_target_size(
                ctx.scene.width,
                ctx.scene.height,
                settings.downsample_divider,
            );
            let blur_desc =
                TargetDesc::color("Blur Buffer", blur_w, blur_h, wgpu::TextureFormat::Rgba8Unorm);
            let blur1 = ctx.pool.acquire(ctx.device, &blur_desc);
            let blur2 = ctx.pool.acquire(ctx.device, &blur_desc);

            ctx.queue.write_buffer(
                &self.blur_buffer,
                0,
                bytemuck::cast_slice(&[BlurUniforms {
                    src_size: [
                        blur_w as f32,
                        blur_h as f32,
                        1.0 / blur_w as f32,
                        1.0 / blur_h as f32,
                    ],
                    params: [1.0 / settings.downsample_divider as f32, 0.0, 0.0, 0.0],
                }]),
            );

            Self::draw_fullscreen(
                ctx.encoder,
                "Resolve Pass",
                &pipelines.resolve,
                &resolve_bind_group,
                &blur1.view,
            );

            let h_bind = self.blur_bind_group(ctx.device, &blur1.view, &scene_copy.view);
            Self::draw_fullscreen(
                ctx.encoder,
                "Blur Horizontal Pass",
                &pipelines.blur_h,
                &h_bind,
                &blur2.view,
            );

            let v_bind = self.blur_bind_group(ctx.device, &blur2.view, &scene_copy.view);
            Self::draw_fullscreen(
                ctx.encoder,
                "Blur Vertical Pass",
                &pipelines.blur_v,
                &v_bind,
                &blur1.view,
            );

            let final_bind = self.blur_bind_group(ctx.device, &blur1.view, &scene_copy.view);
            Self::draw_fullscreen(
                ctx.encoder,
                "Blur Final Pass",
                &pipelines.blur_final,
                &final_bind,
                ctx.scene.view,
            );
        } else {
            Self::draw_fullscreen(
                ctx.encoder,
                "Resolve Pass",
                &pipelines.resolve,
                &resolve_bind_group,
                ctx.scene.view,
            );
        }

        // Blur buffers and the scene copy drop here; wgpu keeps them alive
        // until the recorded commands finish.
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut FrameContext<'_>) {
        self.silhouette = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The basis corners re-project onto the NDC frustum corners for
        /// any non-degenerate camera.
        #[test]
        fn prop_basis_round_trips_through_view_projection(
            eye in proptest::array::uniform3(-50.0f32..50.0),
            yaw in 0.0f32..std::f32::consts::TAU,
            pitch in -1.2f32..1.2,
            fov_deg in 30.0f32..110.0,
            aspect in 0.5f32..2.5,
        ) {
            let eye = Vec3::from(eye);
            let forward = Vec3::new(
                pitch.cos() * yaw.cos(),
                pitch.sin(),
                pitch.cos() * yaw.sin(),
            );
            let view = Mat4::look_at_rh(eye, eye + forward, Vec3::Y);
            let proj = Mat4::perspective_rh(fov_deg.to_radians(), aspect, 0.1, 1000.0);

            let basis = view_ray_basis(view, proj).unwrap();

            let mut stripped = view;
            stripped.w_axis = Vec4::new(0.0, 0.0, 0.0, 1.0);
            let view_proj = proj * stripped;

            let cases = [
                (basis.top_left, Vec3::new(-1.0, 1.0, 0.0)),
                (basis.top_left + basis.x_extent, Vec3::new(1.0, 1.0, 0.0)),
                (basis.top_left + basis.y_extent, Vec3::new(-1.0, -1.0, 0.0)),
                (basis.far_centre, Vec3::new(0.0, 0.0, 1.0)),
            ];
            for (world, ndc) in cases {
                let back = view_proj.project_point3(world);
                prop_assert!(
                    (back - ndc).length() < 1e-3,
                    "reprojection of {:?} gave {:?}, want {:?}",
                    world, back, ndc
                );
            }
        }
    }

    #[test]
    fn test_basis_identity_camera_is_symmetric() {
        let proj = Mat4::perspective_rh(90.0_f32.to_radians(), 1.0, 0.1, 100.0);
        let basis = view_ray_basis(Mat4::IDENTITY, proj).unwrap();

        // Top-left corner mirrors into the extents exactly.
        assert!((basis.top_left.x + basis.x_extent.x / 2.0).abs() < 1e-4);
        assert!((basis.top_left.y + basis.y_extent.y / 2.0).abs() < 1e-4);
        // Camera looks down -Z; the far centre sits on that axis.
        assert!(basis.far_centre.x.abs() < 1e-3 && basis.far_centre.y.abs() < 1e-3);
        assert!(basis.far_centre.z < 0.0);
    }

    #[test]
    fn test_basis_ignores_camera_translation() {
        let proj = Mat4::perspective_rh(60.0_f32.to_radians(), 1.0, 0.1, 100.0);
        let near = view_ray_basis(Mat4::from_translation(Vec3::ZERO), proj).unwrap();
        let far = view_ray_basis(Mat4::from_translation(Vec3::new(100.0, -5.0, 3.0)), proj)
            .unwrap();
        assert!((near.top_left - far.top_left).length() < 1e-4);
        assert!((near.x_extent - far.x_extent).length() < 1e-4);
    }

    #[test]
    fn test_degenerate_projection_rejected() {
        assert!(view_ray_basis(Mat4::IDENTITY, Mat4::ZERO).is_none());
    }
}
