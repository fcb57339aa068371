//! The seam between the simulation and the device.
//!
//! The orchestrator and the bucketizer only talk to a [`ComputeBackend`]:
//! buffers are created through it, and every kernel invocation goes through
//! [`ComputeBackend::dispatch`], which validates the bindings before anything
//! is recorded.

use crate::error::{Result, SimError};
use crate::gpu::kernels::Kernel;

/// Buffers bound to a kernel. A flat list becomes bind group 0, a grouped
/// list becomes one bind group per sub-list. Entries are optional so that a
/// resource that was never created surfaces as a validation error instead of
/// a broken submission.
#[derive(Debug)]
pub enum BindingSet<'a, B> {
    Flat(Vec<Option<&'a B>>),
    Grouped(Vec<Vec<Option<&'a B>>>),
}

impl<'a, B> BindingSet<'a, B> {
    pub fn flat(buffers: impl IntoIterator<Item = &'a B>) -> Self {
        BindingSet::Flat(buffers.into_iter().map(Some).collect())
    }

    pub fn grouped<G>(groups: impl IntoIterator<Item = G>) -> Self
    where
        G: IntoIterator<Item = &'a B>,
    {
        BindingSet::Grouped(
            groups
                .into_iter()
                .map(|group| group.into_iter().map(Some).collect())
                .collect(),
        )
    }

    /// Validated view, one slice per bind group.
    pub fn groups(&self) -> Vec<&[Option<&'a B>]> {
        match self {
            BindingSet::Flat(entries) => vec![entries.as_slice()],
            BindingSet::Grouped(groups) => groups.iter().map(Vec::as_slice).collect(),
        }
    }
}

/// Workgroup counts for a dispatch.
#[derive(Debug)]
pub enum DispatchSize<'a, B> {
    Direct([u32; 3]),
    /// Four words written by an earlier kernel: x, y, z and one reserved.
    Indirect(&'a B),
}

pub fn div_up(thread_count: u32, divisor: u32) -> u32 {
    thread_count.div_ceil(divisor)
}

/// Device-side buffer creation.
pub trait BufferFactory {
    type Buffer;

    fn create_buffer(&mut self, label: &str, size: u64, usage: wgpu::BufferUsages) -> Self::Buffer;

    fn create_buffer_init(&mut self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> Self::Buffer;

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    fn limits(&self) -> wgpu::Limits;
}

/// Command recording for one frame.
pub trait ComputeBackend: BufferFactory {
    fn clear_buffer(&mut self, buffer: &Self::Buffer);

    fn copy_buffer(&mut self, source: &Self::Buffer, destination: &Self::Buffer, size: u64);

    /// Records a dispatch whose bindings have already been validated. Fails
    /// when the kernel has no pipeline to record.
    fn record_dispatch(
        &mut self,
        kernel: Kernel,
        bindings: &BindingSet<'_, Self::Buffer>,
        size: &DispatchSize<'_, Self::Buffer>,
    ) -> Result<()>;

    fn dispatch(
        &mut self,
        kernel: Kernel,
        bindings: BindingSet<'_, Self::Buffer>,
        size: DispatchSize<'_, Self::Buffer>,
    ) -> Result<()> {
        validate_bindings(kernel, &bindings, |buffer| self.buffer_size(buffer))?;
        if let DispatchSize::Indirect(buffer) = &size {
            if self.buffer_size(buffer) < INDIRECT_ARGS_BYTES {
                return Err(SimError::Validation(format!(
                    "compute dispatch [{}]: indirect buffer is smaller than {INDIRECT_ARGS_BYTES} bytes",
                    kernel.name()
                )));
            }
        }
        self.record_dispatch(kernel, &bindings, &size)
    }
}

const INDIRECT_ARGS_BYTES: u64 = 12;

/// Rejects empty binding lists, absent resources and zero sized buffers.
pub fn validate_bindings<B>(
    kernel: Kernel,
    bindings: &BindingSet<'_, B>,
    buffer_size: impl Fn(&B) -> u64,
) -> Result<()> {
    let groups = bindings.groups();
    if groups.is_empty() {
        return Err(SimError::Validation(format!(
            "compute dispatch [{}]: no bind groups",
            kernel.name()
        )));
    }

    for (group_index, group) in groups.iter().enumerate() {
        if group.is_empty() {
            return Err(SimError::Validation(format!(
                "compute dispatch [{}]: bind group {group_index} is empty",
                kernel.name()
            )));
        }
        for (binding, entry) in group.iter().enumerate() {
            match entry {
                None => {
                    return Err(SimError::Validation(format!(
                        "compute dispatch [{}]: resource at group {group_index} index {binding} is missing",
                        kernel.name()
                    )));
                }
                Some(buffer) if buffer_size(buffer) == 0 => {
                    return Err(SimError::Validation(format!(
                        "compute dispatch [{}]: resource at group {group_index} index {binding} is empty",
                        kernel.name()
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Recording backend for tests that have no device.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct MockBuffer {
        pub(crate) id: usize,
        pub(crate) label: String,
        pub(crate) size: u64,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum RecordedSize {
        Direct([u32; 3]),
        Indirect(String),
    }

    #[derive(Debug, Clone)]
    pub(crate) struct RecordedDispatch {
        pub(crate) kernel: Kernel,
        pub(crate) groups: Vec<Vec<String>>,
        pub(crate) size: RecordedSize,
    }

    #[derive(Debug, Default)]
    pub(crate) struct MockBackend {
        pub(crate) created: Vec<MockBuffer>,
        pub(crate) dispatches: Vec<RecordedDispatch>,
        pub(crate) clears: Vec<String>,
        pub(crate) copies: Vec<(String, String)>,
        /// Kernel treated as having no pipeline.
        pub(crate) uncompiled: Option<Kernel>,
    }

    impl MockBackend {
        pub(crate) fn count(&self, kernel: Kernel) -> usize {
            self.dispatches
                .iter()
                .filter(|dispatch| dispatch.kernel == kernel)
                .count()
        }

        pub(crate) fn reset_log(&mut self) {
            self.dispatches.clear();
            self.clears.clear();
            self.copies.clear();
        }
    }

    impl BufferFactory for MockBackend {
        type Buffer = MockBuffer;

        fn create_buffer(&mut self, label: &str, size: u64, _usage: wgpu::BufferUsages) -> MockBuffer {
            let buffer = MockBuffer {
                id: self.created.len(),
                label: label.to_owned(),
                size,
            };
            self.created.push(buffer.clone());
            buffer
        }

        fn create_buffer_init(&mut self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> MockBuffer {
            self.create_buffer(label, contents.len() as u64, usage)
        }

        fn buffer_size(&self, buffer: &MockBuffer) -> u64 {
            buffer.size
        }

        fn limits(&self) -> wgpu::Limits {
            wgpu::Limits::default()
        }
    }

    impl ComputeBackend for MockBackend {
        fn clear_buffer(&mut self, buffer: &MockBuffer) {
            self.clears.push(buffer.label.clone());
        }

        fn copy_buffer(&mut self, source: &MockBuffer, destination: &MockBuffer, _size: u64) {
            self.copies.push((source.label.clone(), destination.label.clone()));
        }

        fn record_dispatch(
            &mut self,
            kernel: Kernel,
            bindings: &BindingSet<'_, MockBuffer>,
            size: &DispatchSize<'_, MockBuffer>,
        ) -> Result<()> {
            if self.uncompiled == Some(kernel) {
                return Err(SimError::Validation(format!(
                    "compute dispatch [{}]: kernel was never compiled",
                    kernel.name()
                )));
            }
            let groups = bindings
                .groups()
                .iter()
                .map(|group| {
                    group
                        .iter()
                        .flatten()
                        .map(|buffer| buffer.label.clone())
                        .collect()
                })
                .collect();
            let size = match size {
                DispatchSize::Direct(counts) => RecordedSize::Direct(*counts),
                DispatchSize::Indirect(buffer) => RecordedSize::Indirect(buffer.label.clone()),
            };
            self.dispatches.push(RecordedDispatch { kernel, groups, size });
            Ok(())
        }
    }
}
