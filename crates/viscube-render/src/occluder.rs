//! Occluder geometry submitted to the capture and silhouette draws.
//!
//! The host tags renderers as occluders and hands them to the passes as
//! [`OccluderDraw`] records through an [`OccluderSource`]. The passes never
//! walk a scene graph themselves.

use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use viscube_core::BoundingSphere;

/// Vertex layout of occluder geometry: position only.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OccluderVertex {
    /// Object-space position.
    pub position: [f32; 3],
}

impl OccluderVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

    /// Vertex buffer layout for pipeline creation.
    #[must_use]
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<OccluderVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// GPU representation of per-occluder uniforms.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniforms {
    /// Object-to-world matrix.
    pub model: [[f32; 4]; 4],
}

/// Bind group layout for per-occluder model uniforms (group 2 of the
/// capture and silhouette pipelines).
#[must_use]
pub fn model_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Occluder Model Bind Group Layout"),
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
    })
}

/// One occluder draw call: geometry buffers, model transform, and a world
/// bounding sphere for per-face culling.
pub struct OccluderDraw {
    /// Vertex buffer of [`OccluderVertex`].
    pub vertex_buffer: wgpu::Buffer,
    /// 32-bit index buffer.
    pub index_buffer: wgpu::Buffer,
    /// Number of indices to draw.
    pub index_count: u32,
    /// Bind group carrying the model matrix.
    pub model_bind_group: wgpu::BindGroup,
    /// World-space bounds used by per-face culling.
    pub bounds: BoundingSphere,
}

impl OccluderDraw {
    /// Uploads geometry and model transform for one occluder.
    #[must_use]
    pub fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        vertices: &[OccluderVertex],
        indices: &[u32],
        model: Mat4,
        bounds: BoundingSphere,
    ) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Occluder Vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Occluder Indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let model_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Occluder Model Uniforms"),
            contents: bytemuck::cast_slice(&[ModelUniforms {
                model: model.to_cols_array_2d(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let model_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Occluder Model Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: model_buffer.as_entire_binding(),
            }],
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            model_bind_group,
            bounds,
        }
    }

    /// Convenience constructor for an axis-aligned cube occluder.
    #[must_use]
    pub fn cube(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        center: Vec3,
        half_extent: f32,
    ) -> Self {
        let h = half_extent;
        let vertices: Vec<OccluderVertex> = [
            [-h, -h, -h],
            [h, -h, -h],
            [h, h, -h],
            [-h, h, -h],
            [-h, -h, h],
            [h, -h, h],
            [h, h, h],
            [-h, h, h],
        ]
        .into_iter()
        .map(|position| OccluderVertex { position })
        .collect();

        #[rustfmt::skip]
        let indices: [u32; 36] = [
            0, 2, 1, 0, 3, 2, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 1, 5, 0, 5, 4, // -y
            3, 7, 6, 3, 6, 2, // +y
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
        ];

        Self::new(
            device,
            layout,
            &vertices,
            &indices,
            Mat4::from_translation(center),
            BoundingSphere {
                center,
                radius: half_extent * 3.0_f32.sqrt(),
            },
        )
    }
}

/// Supplies the occluder draws visible from the main camera, in submission
/// order.
pub trait OccluderSource {
    /// Occluders already culled by the host's main-camera visibility set.
    fn visible_occluders(&self) -> &[OccluderDraw];
}

/// A plain list of occluders, sufficient for hosts without their own
/// visibility system.
#[derive(Default)]
pub struct OccluderSet {
    draws: Vec<OccluderDraw>,
}

impl OccluderSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an occluder.
    pub fn push(&mut self, draw: OccluderDraw) {
        self.draws.push(draw);
    }

    /// Removes every occluder.
    pub fn clear(&mut self) {
        self.draws.clear();
    }

    /// Number of occluders in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    /// True when the set contains no occluders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }
}

impl OccluderSource for OccluderSet {
    fn visible_occluders(&self) -> &[OccluderDraw] {
        &self.draws
    }
}
