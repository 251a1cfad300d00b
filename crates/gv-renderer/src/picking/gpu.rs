//! wgpu pick target: renders proxies flat into a 1x1 texture and reads it back.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use gv_core::{MeshGeometry, MeshId};
use wgpu::util::DeviceExt;

use super::{PickTarget, PickingIndex, PickingProxy};
use crate::camera::Camera;
use crate::context::{RenderContext, create_camera_bind_group, create_camera_bind_group_layout, create_camera_buffer};
use crate::error::PickError;

const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const PICK_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Readback rows must be aligned to this many bytes.
const READBACK_ROW_BYTES: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Per-proxy instance data: model matrix and key color.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PickInstance {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
}

impl PickInstance {
    pub fn new(proxy: &PickingProxy) -> Self {
        Self {
            model: proxy.transform.to_cols_array_2d(),
            color: proxy.color(),
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // model matrix (4 columns)
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 16,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 32,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 48,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // key color
                wgpu::VertexAttribute {
                    offset: 64,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

fn position_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        }],
    }
}

struct ProxyBuffers {
    geometry: Arc<MeshGeometry>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

/// GPU picking render target.
///
/// Proxy vertex and index buffers are created lazily and kept until the
/// proxy leaves the index. Instance data is rewritten whenever the index
/// revision changes.
pub struct GpuPickTarget {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    color_view: wgpu::TextureView,
    color_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    staging_buffer: wgpu::Buffer,
    proxies: HashMap<MeshId, ProxyBuffers>,
    draw_list: Vec<MeshId>,
    instance_buffer: Option<wgpu::Buffer>,
    synced_revision: Option<u64>,
}

impl GpuPickTarget {
    pub fn new(ctx: &RenderContext) -> Self {
        let device = ctx.device();

        let camera_layout = create_camera_bind_group_layout(device, "Pick");
        let camera_buffer = create_camera_buffer(device, "Pick");
        let camera_bind_group =
            create_camera_bind_group(device, &camera_layout, &camera_buffer, "Pick");

        let shader = ctx.create_shader(include_str!("../shaders/pick.wgsl"), "Pick Shader");
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pick Pipeline Layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Pick Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[position_layout(), PickInstance::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: PICK_FORMAT,
                    // Keys must be written verbatim.
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None, // Double-sided
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: PICK_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Pick Color Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Pick Depth Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pick Staging Buffer"),
            size: READBACK_ROW_BYTES as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            device: ctx.device_handle(),
            queue: ctx.queue_handle(),
            pipeline,
            camera_buffer,
            camera_bind_group,
            color_view: color_texture.create_view(&wgpu::TextureViewDescriptor::default()),
            color_texture,
            depth_view: depth_texture.create_view(&wgpu::TextureViewDescriptor::default()),
            staging_buffer,
            proxies: HashMap::new(),
            draw_list: Vec::new(),
            instance_buffer: None,
            synced_revision: None,
        }
    }

    /// Number of proxies with resident GPU buffers.
    pub fn resident_proxies(&self) -> usize {
        self.proxies.len()
    }

    /// Brings proxy buffers in line with the picking index.
    fn sync(&mut self, index: &PickingIndex) {
        if self.synced_revision == Some(index.revision()) {
            return;
        }

        self.proxies.retain(|id, _| index.proxy(id).is_some());

        let mut draw_list = Vec::with_capacity(index.len());
        let mut instances = Vec::with_capacity(index.len());
        for proxy in index.proxies() {
            if proxy.geometry.is_empty() {
                continue;
            }
            let stale = self
                .proxies
                .get(&proxy.mesh)
                .is_none_or(|buffers| !Arc::ptr_eq(&buffers.geometry, &proxy.geometry));
            if stale {
                let buffers = self.create_proxy_buffers(proxy);
                self.proxies.insert(proxy.mesh.clone(), buffers);
            }
            draw_list.push(proxy.mesh.clone());
            instances.push(PickInstance::new(proxy));
        }

        self.instance_buffer = (!instances.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Pick Instance Buffer"),
                contents: bytemuck::cast_slice(&instances),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });
        self.draw_list = draw_list;
        self.synced_revision = Some(index.revision());

        tracing::debug!("Synced {} pick proxies to GPU", self.draw_list.len());
    }

    fn create_proxy_buffers(&self, proxy: &PickingProxy) -> ProxyBuffers {
        let label = proxy.mesh.as_str();
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Pick Vertex Buffer", label)),
            contents: bytemuck::cast_slice(&proxy.geometry.positions),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Pick Index Buffer", label)),
            contents: bytemuck::cast_slice(&proxy.geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        ProxyBuffers {
            geometry: proxy.geometry.clone(),
            vertex_buffer,
            index_buffer,
            index_count: proxy.geometry.indices.len() as u32,
        }
    }

    fn read_pixel(&self) -> Result<[u8; 4], PickError> {
        let slice = self.staging_buffer.slice(..4);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| PickError::Gpu(e.to_string()))?
            .map_err(|e| PickError::Gpu(e.to_string()))?;

        let pixel = {
            let data = slice.get_mapped_range();
            [data[0], data[1], data[2], data[3]]
        };
        self.staging_buffer.unmap();
        Ok(pixel)
    }
}

impl PickTarget for GpuPickTarget {
    fn render_pixel(&mut self, camera: &Camera, index: &PickingIndex) -> Result<[u8; 4], PickError> {
        self.sync(index);

        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[camera.uniform()]));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pick Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Pick Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(instances) = &self.instance_buffer {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &self.camera_bind_group, &[]);
                pass.set_vertex_buffer(1, instances.slice(..));

                for (instance, id) in self.draw_list.iter().enumerate() {
                    let Some(buffers) = self.proxies.get(id) else {
                        continue;
                    };
                    let instance = instance as u32;
                    pass.set_vertex_buffer(0, buffers.vertex_buffer.slice(..));
                    pass.set_index_buffer(buffers.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..buffers.index_count, 0, instance..instance + 1);
                }
            }
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.staging_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(READBACK_ROW_BYTES),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));
        self.read_pixel()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use gv_core::{ModelId, SourceMesh};

    use super::*;

    /// Headless device, or None on machines without an adapter.
    fn context() -> Option<RenderContext> {
        pollster::block_on(RenderContext::headless())
    }

    fn canvas_position(camera: &Camera, point: Vec3, width: f32, height: f32) -> (f32, f32) {
        let ndc = camera.view_projection().project_point3(point);
        ((ndc.x + 1.0) * 0.5 * width, (1.0 - ndc.y) * 0.5 * height)
    }

    #[test]
    fn test_gpu_pick_resolves_each_proxy() {
        let Some(ctx) = context() else {
            return;
        };
        let mut target = GpuPickTarget::new(&ctx);

        let model = ModelId::new("m");
        let mut index = PickingIndex::new();
        let placements = [("left", -2.0), ("middle", 0.0), ("right", 2.0)];
        for (name, x) in placements {
            let mesh = SourceMesh::new(&model, name, Arc::new(MeshGeometry::quad(1.0)))
                .with_transform(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)));
            index.add(&mesh).unwrap();
        }

        let (width, height) = (800u32, 600u32);
        let mut camera =
            Camera::new(width as f32 / height as f32).looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);

        for (name, x) in placements {
            let (px, py) = canvas_position(&camera, Vec3::new(x, 0.0, 0.0), width as f32, height as f32);
            let picked = index
                .mesh_at(&mut camera, width, height, px - 0.5, py - 0.5, &mut target)
                .unwrap();
            assert_eq!(picked, Some(MeshId::from_raw(format!("m|{name}"))));
        }
        assert_eq!(target.resident_proxies(), 3);

        assert_eq!(index.mesh_at(&mut camera, width, height, 1.0, 1.0, &mut target).unwrap(), None);
        assert!(camera.view_offset().is_none());

        // A removed proxy is no longer drawn.
        let middle = MeshId::from_raw("m|middle");
        index.remove(&middle);
        let (px, py) = canvas_position(&camera, Vec3::ZERO, width as f32, height as f32);
        let picked = index
            .mesh_at(&mut camera, width, height, px - 0.5, py - 0.5, &mut target)
            .unwrap();
        assert_eq!(picked, None);
        assert_eq!(target.resident_proxies(), 2);
    }

    #[test]
    fn test_gpu_pick_prefers_nearest_proxy() {
        let Some(ctx) = context() else {
            return;
        };
        let mut target = GpuPickTarget::new(&ctx);

        let model = ModelId::new("m");
        let mut index = PickingIndex::new();
        let near = SourceMesh::new(&model, "near", Arc::new(MeshGeometry::quad(1.0)))
            .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0)));
        let far = SourceMesh::new(&model, "far", Arc::new(MeshGeometry::quad(2.0)));
        index.add(&near).unwrap();
        index.add(&far).unwrap();

        let mut camera = Camera::new(1.0).looking_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO);
        let picked = index.mesh_at(&mut camera, 100, 100, 49.5, 49.5, &mut target).unwrap();
        assert_eq!(picked, Some(near.id));
    }

    #[test]
    fn test_pick_instance_layout() {
        assert_eq!(std::mem::size_of::<PickInstance>(), 80);
        assert_eq!(PickInstance::layout().array_stride, 80);
    }

    #[test]
    fn test_key_color_is_exact_in_unorm8() {
        let proxy = PickingProxy {
            mesh: MeshId::new(&ModelId::new("m"), "a"),
            key: 0x01_02FF,
            geometry: Arc::new(MeshGeometry::quad(1.0)),
            transform: Mat4::IDENTITY,
        };
        let instance = PickInstance::new(&proxy);
        let bytes = instance.color.map(|c| (c * 255.0).round() as u8);
        assert_eq!(bytes, [1, 2, 255, 255]);
    }
}
