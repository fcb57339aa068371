//! Non blocking readback of particle counters and pass timings for display.
//!
//! Each staging buffer is either idle, holding a copy recorded in the current
//! frame, or waiting on a map. A copy is only recorded into an idle buffer,
//! so a slow map drops samples instead of stalling the frame.

use std::collections::BTreeMap;
use std::sync::mpsc;

use crate::gpu::context::GpuContext;
use crate::gpu::encoder::FrameEncoder;
use crate::gpu::pool::ResourcePool;
use crate::gpu::timestamps::TimestampRecorder;
use crate::layout::words::word_as_i32;

const TIMING_SMOOTHING: f64 = 0.99;

enum SlotState {
    Idle,
    Copied,
    Mapping(mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>),
}

struct StagingBuffer {
    buffer: wgpu::Buffer,
    state: SlotState,
}

impl StagingBuffer {
    fn new(context: &GpuContext, label: &str, size: u64) -> Self {
        Self {
            buffer: context.buffer(
                label,
                size,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
            state: SlotState::Idle,
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self.state, SlotState::Idle)
    }

    fn copy_from(&mut self, encoder: &mut wgpu::CommandEncoder, source: &wgpu::Buffer, size: u64) {
        if self.is_idle() {
            encoder.copy_buffer_to_buffer(source, 0, &self.buffer, 0, size);
            self.state = SlotState::Copied;
        }
    }

    fn start_map(&mut self) {
        if !matches!(self.state, SlotState::Copied) {
            return;
        }
        let (tx, rx) = mpsc::channel();
        self.buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.state = SlotState::Mapping(rx);
    }

    /// Contents of a completed map. The buffer is unmapped and idle again
    /// afterwards.
    fn take_ready(&mut self) -> Option<Vec<u8>> {
        let SlotState::Mapping(receiver) = &self.state else {
            return None;
        };
        match receiver.try_recv() {
            Ok(Ok(())) => {
                let bytes = self.buffer.slice(..).get_mapped_range().to_vec();
                self.buffer.unmap();
                self.state = SlotState::Idle;
                Some(bytes)
            }
            Ok(Err(err)) => {
                log::warn!("readback map failed: {err}");
                self.state = SlotState::Idle;
                None
            }
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                self.state = SlotState::Idle;
                None
            }
        }
    }
}

fn read_i32(bytes: &[u8]) -> Option<i32> {
    let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(word_as_i32(u32::from_le_bytes(word)))
}

/// Sums `(end - begin) * period` per pass name, in milliseconds.
pub fn pass_durations_ms(names: &[&str], ticks: &[u64], period_ns: f32) -> BTreeMap<String, f64> {
    let mut durations = BTreeMap::new();
    for (name, pair) in names.iter().zip(ticks.chunks_exact(2)) {
        let elapsed_ns = pair[1].saturating_sub(pair[0]) as f64 * f64::from(period_ns);
        *durations.entry((*name).to_owned()).or_insert(0.0) += elapsed_ns / 1.0e6;
    }
    durations
}

/// Particle counters as last read back.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ParticleCounts {
    /// High water mark of allocated slots.
    pub allocated: u32,
    pub free: u32,
}

impl ParticleCounts {
    pub fn live(&self) -> u32 {
        self.allocated.saturating_sub(self.free)
    }
}

/// Values shown to the user, with dirty flags so a presenter only redraws
/// what changed.
#[derive(Debug, Clone, Default)]
pub struct PresentationStats {
    max_particle_count: u32,
    counts: ParticleCounts,
    timings_ms: BTreeMap<String, f64>,
    counts_dirty: bool,
    timings_dirty: bool,
}

impl PresentationStats {
    pub fn new(max_particle_count: u32) -> Self {
        Self {
            max_particle_count,
            ..Self::default()
        }
    }

    fn clamp(&self, raw: i32) -> u32 {
        raw.clamp(0, self.max_particle_count as i32) as u32
    }

    pub fn apply_particle_count(&mut self, raw: i32) {
        self.counts.allocated = self.clamp(raw);
        self.counts_dirty = true;
    }

    pub fn apply_free_count(&mut self, raw: i32) {
        self.counts.free = self.clamp(raw);
        self.counts_dirty = true;
    }

    /// Blends a frame of pass timings into the running averages. Passes that
    /// did not run this frame are dropped, new ones start at their sample.
    pub fn apply_timings(&mut self, sample_ms: BTreeMap<String, f64>) {
        let previous = std::mem::take(&mut self.timings_ms);
        self.timings_ms = sample_ms
            .into_iter()
            .map(|(name, value)| {
                let smoothed = match previous.get(&name) {
                    Some(old) => TIMING_SMOOTHING * old + (1.0 - TIMING_SMOOTHING) * value,
                    None => value,
                };
                (name, smoothed)
            })
            .collect();
        self.timings_dirty = true;
    }

    pub fn counts(&self) -> ParticleCounts {
        self.counts
    }

    pub fn timings_ms(&self) -> &BTreeMap<String, f64> {
        &self.timings_ms
    }

    pub fn take_particle_stats(&mut self) -> Option<ParticleCounts> {
        std::mem::take(&mut self.counts_dirty).then_some(self.counts)
    }

    pub fn take_timing_stats(&mut self) -> Option<BTreeMap<String, f64>> {
        std::mem::take(&mut self.timings_dirty).then(|| self.timings_ms.clone())
    }
}

struct TimestampStaging {
    staging: StagingBuffer,
    copied_names: Vec<&'static str>,
    mapped_names: Vec<&'static str>,
    period_ns: f32,
}

pub struct ReadbackSynchronizer {
    particle_count: StagingBuffer,
    free_count: StagingBuffer,
    timestamps: Option<TimestampStaging>,
    stats: PresentationStats,
}

impl ReadbackSynchronizer {
    pub fn new(context: &GpuContext, max_particle_count: u32) -> Self {
        let timestamps = context.can_timestamp.then(|| TimestampStaging {
            staging: StagingBuffer::new(context, "timestamp staging", TimestampRecorder::resolve_size()),
            copied_names: Vec::new(),
            mapped_names: Vec::new(),
            period_ns: context.queue.get_timestamp_period(),
        });
        Self {
            particle_count: StagingBuffer::new(context, "particle count staging", 16),
            free_count: StagingBuffer::new(context, "free count staging", 16),
            timestamps,
            stats: PresentationStats::new(max_particle_count),
        }
    }

    /// Restarts the stats for a pool of a different capacity.
    pub fn reset(&mut self, max_particle_count: u32) {
        self.stats = PresentationStats::new(max_particle_count);
    }

    /// Records copies into every idle staging buffer. Call after the frame's
    /// compute work and before submission.
    pub fn record_copies(&mut self, frame: &mut FrameEncoder<'_>, pool: &ResourcePool<wgpu::Buffer>) {
        self.particle_count
            .copy_from(frame.encoder_mut(), &pool.particle_count, 16);
        let free_bytes = pool.free_indices.size().min(16);
        self.free_count
            .copy_from(frame.encoder_mut(), &pool.free_indices, free_bytes);

        if let Some(timestamps) = &mut self.timestamps {
            if timestamps.staging.is_idle() {
                if let Some(names) = frame.resolve_timestamps_into(&timestamps.staging.buffer) {
                    timestamps.copied_names = names;
                    timestamps.staging.state = SlotState::Copied;
                }
            }
        }
    }

    /// Starts maps for the copies recorded this frame. Call after submission.
    pub fn start_maps(&mut self) {
        self.particle_count.start_map();
        self.free_count.start_map();
        if let Some(timestamps) = &mut self.timestamps {
            if matches!(timestamps.staging.state, SlotState::Copied) {
                timestamps.mapped_names = std::mem::take(&mut timestamps.copied_names);
                timestamps.staging.start_map();
            }
        }
    }

    /// Drives pending maps and folds completed ones into the stats.
    pub fn poll(&mut self, device: &wgpu::Device) {
        if let Err(err) = device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {err}");
        }

        if let Some(value) = self.particle_count.take_ready().as_deref().and_then(read_i32) {
            self.stats.apply_particle_count(value);
        }
        if let Some(value) = self.free_count.take_ready().as_deref().and_then(read_i32) {
            self.stats.apply_free_count(value);
        }
        if let Some(timestamps) = &mut self.timestamps {
            if let Some(bytes) = timestamps.staging.take_ready() {
                let pass_count = timestamps.mapped_names.len();
                let ticks: Vec<u64> = bytes
                    .chunks_exact(8)
                    .take(pass_count * 2)
                    .filter_map(|chunk| chunk.try_into().ok().map(u64::from_le_bytes))
                    .collect();
                let durations = pass_durations_ms(&timestamps.mapped_names, &ticks, timestamps.period_ns);
                self.stats.apply_timings(durations);
            }
        }
    }

    pub fn stats(&self) -> &PresentationStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut PresentationStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_clamped_to_capacity() {
        let mut stats = PresentationStats::new(100);
        stats.apply_particle_count(250);
        stats.apply_free_count(-3);
        let counts = stats.take_particle_stats().unwrap();
        assert_eq!(counts.allocated, 100);
        assert_eq!(counts.free, 0);
        assert_eq!(counts.live(), 100);
    }

    #[test]
    fn dirty_flags_clear_on_take() {
        let mut stats = PresentationStats::new(10);
        assert!(stats.take_particle_stats().is_none());
        stats.apply_particle_count(4);
        assert!(stats.take_particle_stats().is_some());
        assert!(stats.take_particle_stats().is_none());

        stats.apply_timings(BTreeMap::from([("g2p2g".to_owned(), 1.0)]));
        assert!(stats.take_timing_stats().is_some());
        assert!(stats.take_timing_stats().is_none());
    }

    #[test]
    fn timings_blend_known_names_and_drop_missing_ones() {
        let mut stats = PresentationStats::new(10);
        stats.apply_timings(BTreeMap::from([
            ("g2p2g".to_owned(), 2.0),
            ("bukkitCount".to_owned(), 1.0),
        ]));
        stats.apply_timings(BTreeMap::from([
            ("g2p2g".to_owned(), 4.0),
            ("particleEmit".to_owned(), 0.5),
        ]));

        let timings = stats.timings_ms();
        assert!((timings["g2p2g"] - (0.99 * 2.0 + 0.01 * 4.0)).abs() < 1e-12);
        assert_eq!(timings["particleEmit"], 0.5);
        assert!(!timings.contains_key("bukkitCount"));
    }

    #[test]
    fn pass_durations_sum_repeated_passes() {
        let names = ["g2p2g", "g2p2g", "bukkitCount"];
        let ticks = [100, 1100, 2000, 4000, 5000, 5500];
        let durations = pass_durations_ms(&names, &ticks, 1.0);
        assert!((durations["g2p2g"] - 0.003).abs() < 1e-12);
        assert!((durations["bukkitCount"] - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn reversed_ticks_count_as_zero() {
        let durations = pass_durations_ms(&["g2p2g"], &[10, 5], 1.0);
        assert_eq!(durations["g2p2g"], 0.0);
    }
}
