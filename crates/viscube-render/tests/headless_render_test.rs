//! Headless rendering integration tests.
//!
//! These tests verify the capture and resolve passes without a window.
//! They require a GPU adapter (real or software fallback). On CI without
//! GPU support, they skip at adapter creation.

use std::sync::{Arc, RwLock};

use glam::{Mat4, Vec3};

use viscube_core::{AtlasFormat, SliceCount, SliceResolution, VisibilityCubeSettings};
use viscube_render::{
    CameraMatrices, CubeCapturePass, FrameContext, FramePass, OccluderDraw, OccluderSet,
    SceneTarget, TargetPool, VisibilityCubeFeature,
};

const SCENE_SIZE: u32 = 256;

fn create_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    })) {
        Ok(adapter) => adapter,
        Err(e) => {
            eprintln!("Skipping headless tests: no GPU adapter available ({e})");
            return None;
        }
    };

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("viscube test device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: Default::default(),
        trace: Default::default(),
        experimental_features: Default::default(),
    }))
    .ok()?;
    Some((device, queue))
}

fn create_scene_texture(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Test Scene"),
        size: wgpu::Extent3d {
            width: SCENE_SIZE,
            height: SCENE_SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn clear_to_white(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Clear Scene"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        ..Default::default()
    });
}

fn read_scene_bytes(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bytes_per_pixel: u32,
) -> Vec<u8> {
    let bytes_per_row = SCENE_SIZE * bytes_per_pixel;
    assert_eq!(bytes_per_row % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT, 0);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback"),
        size: u64::from(bytes_per_row * SCENE_SIZE),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
    encoder.copy_texture_to_buffer(
        texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: None,
            },
        },
        wgpu::Extent3d {
            width: SCENE_SIZE,
            height: SCENE_SIZE,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).unwrap();
    });
    let _ = device.poll(wgpu::PollType::wait_indefinitely());
    rx.recv().unwrap().unwrap();

    let data = slice.get_mapped_range();
    let pixels = data.to_vec();
    drop(data);
    buffer.unmap();
    pixels
}

fn pixel_at(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let idx = ((y * SCENE_SIZE + x) * 4) as usize;
    [pixels[idx], pixels[idx + 1], pixels[idx + 2], pixels[idx + 3]]
}

/// All headless tests run in one function so a missing adapter skips the
/// whole suite at one place.
#[test]
fn headless_render_tests() {
    let _ = env_logger::builder().is_test(true).try_init();

    let Some((device, queue)) = create_device() else {
        return;
    };

    // Camera at the origin looking down -Z. The viewer sits eight units
    // ahead of the camera, two units short of a cube occluder. Rays near
    // the screen centre hit the cube silhouette and stay lit; rays in the
    // annulus around it are shadowed by the cube; rays near the corners
    // miss it entirely.
    let camera = CameraMatrices {
        view: Mat4::IDENTITY,
        proj: Mat4::perspective_rh(60.0_f32.to_radians(), 1.0, 0.1, 1000.0),
        near: 0.1,
    };
    let viewer_pos = Vec3::new(0.0, 0.0, -8.0);
    let cube_center = Vec3::new(0.0, 0.0, -10.0);

    // --- Test 1: resolve darkens shadowed pixels, blur disabled ---
    {
        let settings = VisibilityCubeSettings {
            blur: false,
            ..VisibilityCubeSettings::default()
        };
        let mut feature = VisibilityCubeFeature::with_format(&device, AtlasFormat::Rgba8, settings);

        let mut occluders = OccluderSet::new();
        occluders.push(OccluderDraw::cube(
            &device,
            feature.occluder_layout(),
            cube_center,
            1.0,
        ));

        let (texture, view) = create_scene_texture(&device, wgpu::TextureFormat::Rgba8Unorm);
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        clear_to_white(&mut encoder, &view);
        feature.render_frame(
            &device,
            &queue,
            &mut encoder,
            SceneTarget {
                texture: &texture,
                view: &view,
                format: wgpu::TextureFormat::Rgba8Unorm,
                width: SCENE_SIZE,
                height: SCENE_SIZE,
            },
            camera,
            viewer_pos,
            &occluders,
        );
        queue.submit(Some(encoder.finish()));

        assert_eq!(
            feature.pool().outstanding(),
            0,
            "all frame-scoped targets must be released after the frame"
        );

        let pixels = read_scene_bytes(&device, &queue, &texture, 4);
        let center = pixel_at(&pixels, SCENE_SIZE / 2, SCENE_SIZE / 2);
        // Row 92 sits above the cube silhouette (rows ~103..152) but inside
        // the cube's shadow cone as seen from the viewer (rows ~84..172).
        let shadowed = pixel_at(&pixels, SCENE_SIZE / 2, 92);
        let corner = pixel_at(&pixels, 4, 4);

        // The occluder's own silhouette stays lit.
        assert!(
            center[0] > 200,
            "silhouette pixel should stay lit, got {center:?}"
        );
        // A ray past the silhouette but inside the cube's shadow darkens.
        assert!(
            shadowed[0] < 100,
            "shadowed pixel should darken, got {shadowed:?}"
        );
        // Rays that miss the occluder are untouched.
        assert!(
            corner[0] > 200,
            "unoccluded pixel should stay lit, got {corner:?}"
        );
    }

    // --- Test 2: blurred path still composites and releases targets ---
    {
        let settings = VisibilityCubeSettings {
            blur: true,
            downsample_divider: 2,
            ..VisibilityCubeSettings::default()
        };
        let mut feature = VisibilityCubeFeature::with_format(&device, AtlasFormat::Rgba8, settings);

        let mut occluders = OccluderSet::new();
        occluders.push(OccluderDraw::cube(
            &device,
            feature.occluder_layout(),
            cube_center,
            1.0,
        ));

        let (texture, view) = create_scene_texture(&device, wgpu::TextureFormat::Rgba8Unorm);
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        clear_to_white(&mut encoder, &view);
        feature.render_frame(
            &device,
            &queue,
            &mut encoder,
            SceneTarget {
                texture: &texture,
                view: &view,
                format: wgpu::TextureFormat::Rgba8Unorm,
                width: SCENE_SIZE,
                height: SCENE_SIZE,
            },
            camera,
            viewer_pos,
            &occluders,
        );
        queue.submit(Some(encoder.finish()));

        assert_eq!(feature.pool().outstanding(), 0);

        let pixels = read_scene_bytes(&device, &queue, &texture, 4);
        let shadowed = pixel_at(&pixels, SCENE_SIZE / 2, 92);
        let corner = pixel_at(&pixels, 4, 4);
        assert!(
            shadowed[0] < corner[0],
            "blurred shadow should still darken relative to open sky: {shadowed:?} vs {corner:?}"
        );
    }

    // --- Test 3: no occluders leaves the scene untouched ---
    {
        let settings = VisibilityCubeSettings {
            blur: false,
            ..VisibilityCubeSettings::default()
        };
        let mut feature = VisibilityCubeFeature::with_format(&device, AtlasFormat::Rgba8, settings);
        let occluders = OccluderSet::new();

        let (texture, view) = create_scene_texture(&device, wgpu::TextureFormat::Rgba8Unorm);
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        clear_to_white(&mut encoder, &view);
        feature.render_frame(
            &device,
            &queue,
            &mut encoder,
            SceneTarget {
                texture: &texture,
                view: &view,
                format: wgpu::TextureFormat::Rgba8Unorm,
                width: SCENE_SIZE,
                height: SCENE_SIZE,
            },
            camera,
            viewer_pos,
            &occluders,
        );
        queue.submit(Some(encoder.finish()));
        assert_eq!(feature.pool().outstanding(), 0);

        let pixels = read_scene_bytes(&device, &queue, &texture, 4);
        let all_white = pixels.chunks(4).all(|px| px[0] > 250 && px[1] > 250);
        assert!(all_white, "empty occluder set must not darken anything");
    }

    // --- Test 4: invalid settings skip the frame without panicking ---
    {
        let settings = VisibilityCubeSettings {
            downsample_divider: 0,
            ..VisibilityCubeSettings::default()
        };
        let mut feature = VisibilityCubeFeature::with_format(&device, AtlasFormat::Rgba8, settings);
        let occluders = OccluderSet::new();

        let (texture, view) = create_scene_texture(&device, wgpu::TextureFormat::Rgba8Unorm);
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        clear_to_white(&mut encoder, &view);
        feature.render_frame(
            &device,
            &queue,
            &mut encoder,
            SceneTarget {
                texture: &texture,
                view: &view,
                format: wgpu::TextureFormat::Rgba8Unorm,
                width: SCENE_SIZE,
                height: SCENE_SIZE,
            },
            camera,
            viewer_pos,
            &occluders,
        );
        queue.submit(Some(encoder.finish()));
        assert_eq!(feature.pool().outstanding(), 0);
    }

    // --- Test 5: half-float scene target with a half-float atlas ---
    {
        let settings = VisibilityCubeSettings {
            blur: false,
            ..VisibilityCubeSettings::default()
        };
        let mut feature =
            VisibilityCubeFeature::with_format(&device, AtlasFormat::RgHalf, settings);

        let mut occluders = OccluderSet::new();
        occluders.push(OccluderDraw::cube(
            &device,
            feature.occluder_layout(),
            cube_center,
            1.0,
        ));

        let (texture, view) = create_scene_texture(&device, wgpu::TextureFormat::Rgba16Float);
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        clear_to_white(&mut encoder, &view);
        feature.render_frame(
            &device,
            &queue,
            &mut encoder,
            SceneTarget {
                texture: &texture,
                view: &view,
                format: wgpu::TextureFormat::Rgba16Float,
                width: SCENE_SIZE,
                height: SCENE_SIZE,
            },
            camera,
            viewer_pos,
            &occluders,
        );
        queue.submit(Some(encoder.finish()));
        assert_eq!(feature.pool().outstanding(), 0);

        let bytes = read_scene_bytes(&device, &queue, &texture, 8);
        let red_at = |x: u32, y: u32| -> f32 {
            let idx = ((y * SCENE_SIZE + x) * 8) as usize;
            half::f16::from_le_bytes([bytes[idx], bytes[idx + 1]]).to_f32()
        };
        assert!(
            red_at(SCENE_SIZE / 2, 92) < 0.4,
            "shadowed pixel should darken on a float scene target"
        );
        assert!(
            red_at(4, 4) > 0.8,
            "unoccluded pixel should stay lit on a float scene target"
        );
    }

    // --- Test 6: capture fills exactly the facing atlas slice ---
    {
        let slice_res: u32 = 512;
        let settings = VisibilityCubeSettings {
            resolution: SliceResolution::Normal,
            slice_count: SliceCount::Six,
            blur: false,
            ..VisibilityCubeSettings::default()
        };
        let shared = Arc::new(RwLock::new(settings));
        let mut pass = CubeCapturePass::new(&device, Arc::clone(&shared), AtlasFormat::Rgba8);

        let mut occluders = OccluderSet::new();
        occluders.push(OccluderDraw::cube(
            &device,
            pass.model_bind_group_layout(),
            Vec3::new(0.0, 0.0, 10.0),
            1.0,
        ));

        let (texture, view) = create_scene_texture(&device, wgpu::TextureFormat::Rgba8Unorm);
        let pool = TargetPool::new();
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        let mut ctx = FrameContext {
            device: &device,
            queue: &queue,
            encoder: &mut encoder,
            scene: SceneTarget {
                texture: &texture,
                view: &view,
                format: wgpu::TextureFormat::Rgba8Unorm,
                width: SCENE_SIZE,
                height: SCENE_SIZE,
            },
            camera,
            // Viewer at the origin, occluder one slice-forward along +Z.
            viewer_pos: Vec3::ZERO,
            pool: &pool,
            atlas: None,
        };
        pass.setup(&mut ctx).unwrap();
        pass.execute(&mut ctx, &occluders).unwrap();
        let atlas = ctx.atlas.take().expect("capture must publish its atlas");
        pass.cleanup(&mut ctx);
        drop(ctx);
        queue.submit(Some(encoder.finish()));
        assert_eq!(pool.outstanding(), 0);

        let atlas_w = slice_res * 6;
        let bytes_per_row = atlas_w * 4;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Atlas Readback"),
            size: u64::from(bytes_per_row * slice_res),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        encoder.copy_texture_to_buffer(
            atlas.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: atlas_w,
                height: slice_res,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).unwrap();
        });
        let _ = device.poll(wgpu::PollType::wait_indefinitely());
        rx.recv().unwrap().unwrap();
        let data = slice.get_mapped_range();

        // Occupancy lives in the red channel. Face order is +Z, +X, -Z, -X,
        // +Y, -Y; a cube at (0,0,10) may only appear in slice 0.
        let mut occupied = [false; 6];
        for row in 0..slice_res {
            for col in 0..atlas_w {
                let idx = ((row * atlas_w + col) * 4) as usize;
                if data[idx] > 0 {
                    occupied[(col / slice_res) as usize] = true;
                }
            }
        }
        drop(data);
        buffer.unmap();

        assert!(occupied[0], "+Z slice should contain the occluder");
        assert_eq!(
            &occupied[1..],
            &[false; 5],
            "all other slices must stay empty"
        );
    }
}
