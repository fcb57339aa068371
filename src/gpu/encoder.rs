use crate::error::{Result, SimError};
use crate::gpu::backend::{BindingSet, BufferFactory, ComputeBackend, DispatchSize};
use crate::gpu::context::GpuContext;
use crate::gpu::kernels::{Kernel, KernelLibrary};
use crate::gpu::timestamps::TimestampRecorder;

/// Records one frame of compute work into a single command encoder. Every
/// dispatch gets its own pass so that each one can be timed.
pub struct FrameEncoder<'a> {
    context: &'a GpuContext,
    kernels: &'a KernelLibrary,
    encoder: wgpu::CommandEncoder,
    timestamps: Option<&'a mut TimestampRecorder>,
}

impl<'a> FrameEncoder<'a> {
    pub fn new(
        context: &'a GpuContext,
        kernels: &'a KernelLibrary,
        mut timestamps: Option<&'a mut TimestampRecorder>,
    ) -> Self {
        let encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        if let Some(recorder) = timestamps.as_deref_mut() {
            recorder.begin_frame();
        }
        Self {
            context,
            kernels,
            encoder,
            timestamps,
        }
    }

    pub fn encoder_mut(&mut self) -> &mut wgpu::CommandEncoder {
        &mut self.encoder
    }

    pub fn context(&self) -> &GpuContext {
        self.context
    }

    /// Resolves this frame's timestamp queries and copies them into
    /// `staging`. Returns the pass name of each begin/end pair.
    pub fn resolve_timestamps_into(&mut self, staging: &wgpu::Buffer) -> Option<Vec<&'static str>> {
        let recorder = self.timestamps.as_deref()?;
        let names = recorder.pass_names();
        if names.is_empty() {
            return None;
        }
        recorder.resolve(&mut self.encoder);
        let bytes = names.len() as u64 * 2 * 8;
        self.encoder
            .copy_buffer_to_buffer(recorder.resolve_buffer(), 0, staging, 0, bytes);
        Some(names.to_vec())
    }

    pub fn finish(self) -> wgpu::CommandBuffer {
        self.encoder.finish()
    }
}

impl BufferFactory for FrameEncoder<'_> {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&mut self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.context.buffer(label, size, usage)
    }

    fn create_buffer_init(&mut self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.context.buffer_init(label, contents, usage)
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn limits(&self) -> wgpu::Limits {
        self.context.device.limits()
    }
}

impl ComputeBackend for FrameEncoder<'_> {
    fn clear_buffer(&mut self, buffer: &wgpu::Buffer) {
        self.encoder.clear_buffer(buffer, 0, None);
    }

    fn copy_buffer(&mut self, source: &wgpu::Buffer, destination: &wgpu::Buffer, size: u64) {
        self.encoder.copy_buffer_to_buffer(source, 0, destination, 0, size);
    }

    fn record_dispatch(
        &mut self,
        kernel: Kernel,
        bindings: &BindingSet<'_, wgpu::Buffer>,
        size: &DispatchSize<'_, wgpu::Buffer>,
    ) -> Result<()> {
        let Some(pipeline) = self.kernels.pipeline(kernel) else {
            return Err(SimError::Validation(format!(
                "compute dispatch [{}]: kernel was never compiled",
                kernel.name()
            )));
        };

        let bind_groups: Vec<wgpu::BindGroup> = bindings
            .groups()
            .iter()
            .enumerate()
            .map(|(group_index, group)| {
                let entries: Vec<wgpu::BindGroupEntry<'_>> = group
                    .iter()
                    .flatten()
                    .enumerate()
                    .map(|(binding, buffer)| wgpu::BindGroupEntry {
                        binding: binding as u32,
                        resource: buffer.as_entire_binding(),
                    })
                    .collect();
                self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(kernel.name()),
                    layout: &pipeline.get_bind_group_layout(group_index as u32),
                    entries: &entries,
                })
            })
            .collect();

        let timestamp_writes = match self.timestamps.as_deref_mut() {
            Some(recorder) => recorder.next_writes(kernel.name()),
            None => None,
        };

        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.name()),
            timestamp_writes,
        });
        pass.set_pipeline(pipeline);
        for (index, bind_group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, bind_group, &[]);
        }
        match size {
            DispatchSize::Direct([x, y, z]) => pass.dispatch_workgroups(*x, *y, *z),
            DispatchSize::Indirect(buffer) => pass.dispatch_workgroups_indirect(buffer, 0),
        }
        Ok(())
    }
}
