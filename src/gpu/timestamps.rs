/// Maximum number of compute passes timed in one frame.
pub const MAX_TIMED_PASSES: u32 = 2048;

/// Hands out begin/end query slots to compute passes and remembers which
/// pass each pair belongs to.
pub struct TimestampRecorder {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    pass_names: Vec<&'static str>,
    overflowed: bool,
}

impl TimestampRecorder {
    pub fn new(device: &wgpu::Device) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("pass timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: MAX_TIMED_PASSES * 2,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size: Self::resolve_size(),
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            query_set,
            resolve_buffer,
            pass_names: Vec::new(),
            overflowed: false,
        }
    }

    pub fn resolve_size() -> u64 {
        u64::from(MAX_TIMED_PASSES) * 2 * 8
    }

    pub fn begin_frame(&mut self) {
        self.pass_names.clear();
        self.overflowed = false;
    }

    /// Query slots for the next pass, or `None` once the frame is full.
    pub fn next_writes(&mut self, name: &'static str) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        let index = self.pass_names.len() as u32;
        if index >= MAX_TIMED_PASSES {
            if !self.overflowed {
                log::warn!("more than {MAX_TIMED_PASSES} timed passes this frame, timing the rest is skipped");
                self.overflowed = true;
            }
            return None;
        }
        self.pass_names.push(name);
        Some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(index * 2),
            end_of_pass_write_index: Some(index * 2 + 1),
        })
    }

    pub fn pass_names(&self) -> &[&'static str] {
        &self.pass_names
    }

    /// Resolves this frame's queries into the resolve buffer.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        let count = self.pass_names.len() as u32 * 2;
        if count > 0 {
            encoder.resolve_query_set(&self.query_set, 0..count, &self.resolve_buffer, 0);
        }
    }

    pub fn resolve_buffer(&self) -> &wgpu::Buffer {
        &self.resolve_buffer
    }
}
