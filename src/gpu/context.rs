use wgpu::util::DeviceExt;

use crate::error::{Result, SimError};
use crate::gpu::backend::BufferFactory;

/// Adapter, device and queue shared by the simulation and the renderer.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Whether the device was created with timestamp queries.
    pub can_timestamp: bool,
}

impl GpuContext {
    /// Requests an adapter able to present to `surface` when one is given.
    pub async fn new(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: surface,
            })
            .await
            .map_err(|err| SimError::Platform(format!("no suitable GPU adapter: {err}")))?;

        let can_timestamp = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        let required_features = if can_timestamp {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };

        let adapter_limits = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            max_compute_workgroups_per_dimension: adapter_limits.max_compute_workgroups_per_dimension,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("particle sandbox device"),
                required_features,
                required_limits,
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| SimError::Platform(format!("failed to create device: {err}")))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("uncaptured device error: {error}");
        }));

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);
        if !can_timestamp {
            log::warn!("adapter has no timestamp query support, pass timings are disabled");
        }

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            can_timestamp,
        })
    }

    /// A context with no surface, for offline runs and tests.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        Self::new(instance, None).await
    }
}

impl GpuContext {
    pub fn buffer(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    pub fn buffer_init(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }
}

impl BufferFactory for GpuContext {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&mut self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.buffer(label, size, usage)
    }

    fn create_buffer_init(&mut self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.buffer_init(label, contents, usage)
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }
}
