//! Cube capture pass: renders occluders into a tiled cube atlas.
//!
//! Each frame the pass acquires a fresh atlas target sized
//! `resolution * slice_count` by `resolution`, computes one view matrix per
//! face from the viewer position, and draws occluders into the face's
//! viewport slice. The populated atlas is published on the frame context
//! for the resolve pass and released at camera cleanup.

use bytemuck::Zeroable;
use glam::Mat4;
use wgpu::util::DeviceExt;

use viscube_core::{
    capture_projection, depth_bias, face_view_matrix, frustum_planes, AtlasFormat,
    VisibilityCubeSettings, CAPTURE_FAR_PLANE,
};

use crate::error::RenderResult;
use crate::feature::{snapshot, FramePass, SharedSettings};
use crate::occluder::{model_bind_group_layout, OccluderSource, OccluderVertex};
use crate::targets::{atlas_texture_format, depth_texture_format, ScopedTarget, TargetDesc};
use crate::variant::ShaderVariant;
use crate::{AtlasBinding, FrameContext};

/// Stride of one face slot in the dynamic-offset face uniform buffer.
const FACE_UNIFORM_STRIDE: u64 = 256;

/// GPU representation of per-frame capture uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    /// xyz = viewer world position, w = capture far plane.
    pub viewer_pos: [f32; 4],
    /// xyz = viewer position minus camera position.
    pub viewer_offset: [f32; 4],
    /// x = depth bias, y = capture range, z = extra z offset.
    pub bias: [f32; 4],
}

/// GPU representation of per-face uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FaceUniforms {
    /// Face projection * view matrix.
    pub view_proj: [[f32; 4]; 4],
}

/// Builds the per-frame capture uniforms for a given viewer and camera.
#[must_use]
pub fn frame_uniforms(
    settings: &VisibilityCubeSettings,
    viewer_pos: glam::Vec3,
    camera_pos: glam::Vec3,
) -> FrameUniforms {
    let bias = depth_bias(
        settings.bias_offset.x,
        settings.bias_offset.y,
        settings.resolution.pixels(),
        false,
    );
    let offset = viewer_pos - camera_pos;
    FrameUniforms {
        viewer_pos: [viewer_pos.x, viewer_pos.y, viewer_pos.z, CAPTURE_FAR_PLANE],
        viewer_offset: [offset.x, offset.y, offset.z, 0.0],
        bias: [bias, settings.bias_offset.y, settings.bias_offset.z, 0.0],
    }
}

/// The cube capture pass.
pub struct CubeCapturePass {
    settings: SharedSettings,
    atlas_format: AtlasFormat,
    pipeline: wgpu::RenderPipeline,
    pipeline_depth_format: wgpu::TextureFormat,
    frame_layout: wgpu::BindGroupLayout,
    face_layout: wgpu::BindGroupLayout,
    model_layout: wgpu::BindGroupLayout,
    frame_buffer: wgpu::Buffer,
    face_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    face_bind_group: wgpu::BindGroup,
    atlas: Option<ScopedTarget>,
    skip_frame: bool,
}

impl CubeCapturePass {
    /// Creates the pass with the controller-chosen atlas format.
    #[must_use]
    pub fn new(device: &wgpu::Device, settings: SharedSettings, atlas_format: AtlasFormat) -> Self {
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Capture Frame Bind Group Layout"),
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

        let face_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Capture Face Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<FaceUniforms>() as u64
                    ),
                },
                count: None,
            }],
        });

        let model_layout = model_bind_group_layout(device);

        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Capture Frame Uniforms"),
            contents: bytemuck::cast_slice(&[FrameUniforms::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let face_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Capture Face Uniforms"),
            size: FACE_UNIFORM_STRIDE * viscube_core::MAX_FACES as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Frame Bind Group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let face_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Capture Face Bind Group"),
            layout: &face_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &face_buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<FaceUniforms>() as u64),
                }),
            }],
        });

        let depth_format = {
            let settings = snapshot(&settings);
            depth_texture_format(settings.depth_bits)
        };
        let pipeline = Self::build_pipeline(
            device,
            atlas_format,
            depth_format,
            &frame_layout,
            &face_layout,
            &model_layout,
        );

        Self {
            settings,
            atlas_format,
            pipeline,
            pipeline_depth_format: depth_format,
            frame_layout,
            face_layout,
            model_layout,
            frame_buffer,
            face_buffer,
            frame_bind_group,
            face_bind_group,
            atlas: None,
            skip_frame: false,
        }
    }

    /// Bind group layout occluder model uniforms must be created with.
    #[must_use]
    pub fn model_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.model_layout
    }

    /// Atlas view and format, available between execute and cleanup.
    #[must_use]
    pub fn atlas(&self) -> Option<AtlasBinding> {
        self.atlas.as_ref().map(|target| AtlasBinding {
            texture: target.texture.clone(),
            view: target.view.clone(),
            format: self.atlas_format,
        })
    }

    fn build_pipeline(
        device: &wgpu::Device,
        atlas_format: AtlasFormat,
        depth_format: wgpu::TextureFormat,
        frame_layout: &wgpu::BindGroupLayout,
        face_layout: &wgpu::BindGroupLayout,
        model_layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let variant = ShaderVariant {
            float_atlas: atlas_format.is_float(),
            ..ShaderVariant::default()
        };
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Cube Capture Shader"),
            source: wgpu::ShaderSource::Wgsl(
                variant.apply(include_str!("shaders/capture.wgsl")).into(),
            ),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cube Capture Pipeline Layout"),
            bind_group_layouts: &[frame_layout, face_layout, model_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Cube Capture Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[OccluderVertex::layout()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: atlas_texture_format(atlas_format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Occluders block rays from any direction.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: depth_format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

impl FramePass for CubeCapturePass {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> RenderResult<()> {
        let settings = snapshot(&self.settings);
        if let Err(e) = settings.validate() {
            log::warn!("cube capture skipped: {e}");
            self.skip_frame = true;
            return Ok(());
        }
        self.skip_frame = false;

        // Resolution changes take effect here; depth precision changes also
        // require a pipeline rebuild.
        let depth_format = depth_texture_format(settings.depth_bits);
        if depth_format != self.pipeline_depth_format {
            self.pipeline = Self::build_pipeline(
                ctx.device,
                self.atlas_format,
                depth_format,
                &self.frame_layout,
                &self.face_layout,
                &self.model_layout,
            );
            self.pipeline_depth_format = depth_format;
        }

        let desc = TargetDesc::color(
            "Cube Atlas",
            settings.atlas_width(),
            settings.atlas_height(),
            atlas_texture_format(self.atlas_format),
        )
        .with_usage(wgpu::TextureUsages::COPY_SRC)
        .with_depth(depth_format);
        self.atlas = Some(ctx.pool.acquire(ctx.device, &desc));
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
        let Some(atlas) = &self.atlas else {
            return Ok(());
        };
        let settings = snapshot(&self.settings);

        ctx.queue.write_buffer(
            &self.frame_buffer,
            0,
            bytemuck::cast_slice(&[frame_uniforms(
                &settings,
                ctx.viewer_pos,
                ctx.camera.world_position(),
            )]),
        );

        let projection = capture_projection();
        let slice_count = settings.slice_count.as_usize();
        let mut face_view_projs = [Mat4::IDENTITY; viscube_core::MAX_FACES];
        for (face, view_proj) in face_view_projs.iter_mut().enumerate().take(slice_count) {
            let view = face_view_matrix(ctx.viewer_pos, face)?;
            *view_proj = projection * view;
            ctx.queue.write_buffer(
                &self.face_buffer,
                face as u64 * FACE_UNIFORM_STRIDE,
                bytemuck::cast_slice(&[FaceUniforms {
                    view_proj: view_proj.to_cols_array_2d(),
                }]),
            );
        }

        let Some(depth_view) = atlas.depth_view.as_ref() else {
            return Ok(());
        };

        let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Cube Capture Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &atlas.view,
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

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.frame_bind_group, &[]);

        let slice_res = settings.resolution.pixels() as f32;
        for (face, view_proj) in face_view_projs.iter().enumerate().take(slice_count) {
            render_pass.set_viewport(slice_res * face as f32, 0.0, slice_res, slice_res, 0.0, 1.0);
            let offset = face as u32 * FACE_UNIFORM_STRIDE as u32;
            render_pass.set_bind_group(1, &self.face_bind_group, &[offset]);

            let frustum = if settings.cull_each_side {
                match frustum_planes(*view_proj) {
                    Ok(frustum) => Some(frustum),
                    Err(e) => {
                        // Non-fatal: leave this slice cleared.
                        log::warn!("culling extraction failed for face {face}: {e}");
                        continue;
                    }
                }
            } else {
                None
            };

            for draw in occluders.visible_occluders() {
                if let Some(frustum) = &frustum {
                    if !frustum.contains_sphere(draw.bounds) {
                        continue;
                    }
                }
                render_pass.set_bind_group(2, &draw.model_bind_group, &[]);
                render_pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
                render_pass
                    .set_index_buffer(draw.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..draw.index_count, 0, 0..1);
            }
        }
        drop(render_pass);

        ctx.atlas = self.atlas();
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut FrameContext<'_>) {
        // Atlas lifetime ends with the camera; it is recreated next frame.
        self.atlas = None;
    }
}
