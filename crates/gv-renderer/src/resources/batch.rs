//! GPU buffers for merged batches.

use std::ops::Range;

use crate::batch::{RenderBatchRegistry, RenderGeometry};
use crate::context::RenderContext;

const POSITION_STRIDE: u64 = std::mem::size_of::<[f32; 3]>() as u64;
const PACKED_STRIDE: u64 = std::mem::size_of::<[u8; 4]>() as u64;

/// Byte range in a buffer with `stride`-sized vertices.
pub fn vertex_byte_range(vertices: &Range<u32>, stride: u64) -> Range<u64> {
    vertices.start as u64 * stride..vertices.end as u64 * stride
}

/// Vertex buffer layouts of a merged batch: position, color, rmo.
pub fn batch_vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 3] {
    [
        wgpu::VertexBufferLayout {
            array_stride: POSITION_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            }],
        },
        wgpu::VertexBufferLayout {
            array_stride: PACKED_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 1,
                format: wgpu::VertexFormat::Unorm8x4,
            }],
        },
        wgpu::VertexBufferLayout {
            array_stride: PACKED_STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[wgpu::VertexAttribute {
                offset: 0,
                shader_location: 2,
                format: wgpu::VertexFormat::Unorm8x4,
            }],
        },
    ]
}

/// What an upload pass wrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub created: usize,
    pub vertex_bytes: u64,
    pub index_uploads: usize,
}

/// GPU copy of one merged batch.
pub struct BatchBuffers {
    position_buffer: wgpu::Buffer,
    color_buffer: wgpu::Buffer,
    rmo_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    opaque_index_count: u32,
}

impl BatchBuffers {
    /// Uploads a whole geometry and clears its pending change flags.
    pub fn create(ctx: &RenderContext, label: &str, geometry: &mut RenderGeometry) -> Self {
        let vertex_usage = wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST;
        let make = |name: &str, contents: &[u8], usage| {
            ctx.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} {} Buffer", label, name)),
                contents,
                usage,
            })
        };

        let position_buffer = make("Position", geometry.position_bytes(), vertex_usage);
        let color_buffer = make("Color", geometry.color_bytes(), vertex_usage);
        let rmo_buffer = make("RMO", geometry.rmo_bytes(), vertex_usage);
        let index_buffer = make(
            "Index",
            geometry.index_bytes(),
            wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        );

        geometry.take_dirty_vertex_ranges();
        geometry.take_indices_dirty();

        Self {
            position_buffer,
            color_buffer,
            rmo_buffer,
            index_buffer,
            index_count: geometry.index_count() as u32,
            opaque_index_count: geometry.opaque_index_count() as u32,
        }
    }

    /// Writes dirty vertex ranges and, after a re-sort, the index buffer.
    pub fn upload_changes(&mut self, ctx: &RenderContext, geometry: &mut RenderGeometry) -> UploadStats {
        let mut stats = UploadStats::default();

        for range in geometry.take_dirty_vertex_ranges() {
            let bytes = vertex_byte_range(&range, PACKED_STRIDE);
            let span = bytes.start as usize..bytes.end as usize;
            ctx.write_buffer(&self.color_buffer, bytes.start, &geometry.color_bytes()[span.clone()]);
            ctx.write_buffer(&self.rmo_buffer, bytes.start, &geometry.rmo_bytes()[span]);
            stats.vertex_bytes += 2 * (bytes.end - bytes.start);
        }

        if geometry.take_indices_dirty() {
            ctx.write_buffer(&self.index_buffer, 0, geometry.index_bytes());
            self.opaque_index_count = geometry.opaque_index_count() as u32;
            stats.index_uploads += 1;
        }

        stats
    }

    fn bind(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.position_buffer.slice(..));
        pass.set_vertex_buffer(1, self.color_buffer.slice(..));
        pass.set_vertex_buffer(2, self.rmo_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
    }

    /// Draws the opaque prefix of the index buffer.
    pub fn draw_opaque(&self, pass: &mut wgpu::RenderPass<'_>) {
        if self.opaque_index_count > 0 {
            self.bind(pass);
            pass.draw_indexed(0..self.opaque_index_count, 0, 0..1);
        }
    }

    /// Draws the transparent suffix of the index buffer.
    pub fn draw_transparent(&self, pass: &mut wgpu::RenderPass<'_>) {
        if self.index_count > self.opaque_index_count {
            self.bind(pass);
            pass.draw_indexed(self.opaque_index_count..self.index_count, 0, 0..1);
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Keeps one [`BatchBuffers`] per merge group of a registry.
///
/// Buffers are recreated whenever the registry installs a new batch set and
/// patched in place otherwise.
#[derive(Default)]
pub struct BatchBufferManager {
    buffers: Vec<Option<BatchBuffers>>,
    generation: Option<u64>,
}

impl BatchBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrors the registry's batches to the GPU. Call after `prepare_frame`.
    pub fn sync(&mut self, ctx: &RenderContext, registry: &mut RenderBatchRegistry) -> UploadStats {
        let mut stats = UploadStats::default();

        if self.generation != Some(registry.generation()) {
            self.buffers.clear();
            for group in 0..registry.group_count() {
                let buffers = registry.geometry_mut(group).map(|geometry| {
                    BatchBuffers::create(ctx, &format!("Batch {}", group), geometry)
                });
                stats.created += usize::from(buffers.is_some());
                self.buffers.push(buffers);
            }
            self.generation = Some(registry.generation());
            tracing::debug!("Created GPU buffers for {} batches", stats.created);
            return stats;
        }

        for (group, buffers) in self.buffers.iter_mut().enumerate() {
            let (Some(buffers), Some(geometry)) = (buffers.as_mut(), registry.geometry_mut(group)) else {
                continue;
            };
            let group_stats = buffers.upload_changes(ctx, geometry);
            stats.vertex_bytes += group_stats.vertex_bytes;
            stats.index_uploads += group_stats.index_uploads;
        }
        stats
    }

    /// Resident batches in group order.
    pub fn batches(&self) -> impl Iterator<Item = &BatchBuffers> {
        self.buffers.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
