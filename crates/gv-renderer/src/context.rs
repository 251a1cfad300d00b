//! Render context that encapsulates GPU resources.
//!
//! The RenderContext hides wgpu setup details from the batch and picking
//! code, which only need a device, a queue and a few resource helpers.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::camera::CameraUniform;

/// Render context containing the shared GPU handles.
pub struct RenderContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl RenderContext {
    /// Creates a new render context.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }

    /// Requests a headless device on the default adapter.
    ///
    /// Returns None when no adapter is available (e.g. CI without a GPU).
    pub async fn headless() -> Option<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await?;

        let (device, queue) = match adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("GV Headless Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Failed to create headless device: {}", e);
                return None;
            }
        };

        tracing::info!("Headless adapter: {}", adapter.get_info().name);
        Some(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Returns the wgpu device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Returns a shared handle to the device.
    pub fn device_handle(&self) -> Arc<wgpu::Device> {
        self.device.clone()
    }

    /// Returns the wgpu queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Returns a shared handle to the queue.
    pub fn queue_handle(&self) -> Arc<wgpu::Queue> {
        self.queue.clone()
    }

    /// Creates a buffer initialized with data.
    pub fn create_buffer_init(&self, desc: &wgpu::util::BufferInitDescriptor) -> wgpu::Buffer {
        self.device.create_buffer_init(desc)
    }

    /// Writes data to a buffer.
    pub fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }

    /// Creates a shader module from WGSL source.
    pub fn create_shader(&self, source: &str, label: &str) -> wgpu::ShaderModule {
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
    }
}

/// Bind group layout for a single camera uniform at binding 0.
pub fn create_camera_bind_group_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{} Camera Bind Group Layout", label)),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// Camera uniform buffer initialized with the identity view.
pub fn create_camera_buffer(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{} Camera Buffer", label)),
        contents: bytemuck::cast_slice(&[CameraUniform::default()]),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub fn create_camera_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{} Camera Bind Group", label)),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}
