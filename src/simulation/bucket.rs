//! Spatial bucketing of live particles.
//!
//! The grid is split into square buckets of `BUKKIT_SIZE` cells. Each
//! substep rebuilds, in three passes:
//!
//! 1. a per bucket count of live particles,
//! 2. a contiguous range of the scattered index buffer per bucket, plus one
//!    thread group descriptor per 64 particles of that bucket,
//! 3. the scattered index buffer itself.
//!
//! The transfer kernel is then dispatched indirectly with one workgroup per
//! descriptor.

use crate::config::{BUKKIT_SIZE, GRID_DISPATCH_SIZE, PARTICLE_DISPATCH_SIZE};
use crate::error::{Result, SimError};
use crate::gpu::backend::{BindingSet, BufferFactory, ComputeBackend, DispatchSize, div_up};
use crate::gpu::kernels::Kernel;
use crate::layout::words::words_to_bytes;

/// Words per thread group descriptor: bucket x, bucket y, range start, range count.
pub const DESCRIPTOR_WORDS: u64 = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BucketGeometry {
    pub count_x: u32,
    pub count_y: u32,
}

impl BucketGeometry {
    pub fn for_grid(grid_size: [u32; 2]) -> Self {
        Self {
            count_x: div_up(grid_size[0].max(1), BUKKIT_SIZE),
            count_y: div_up(grid_size[1].max(1), BUKKIT_SIZE),
        }
    }

    pub fn count(&self) -> u32 {
        self.count_x * self.count_y
    }

    /// Bucket holding `position`, clamped into the bucket grid. Mirrors
    /// `positionToBukkit` in `bukkit.inc.wgsl`.
    pub fn bucket_of(&self, position: [f32; 2]) -> (u32, u32) {
        let axis = |value: f32, count: u32| -> u32 {
            let cell = (value / BUKKIT_SIZE as f32).floor().max(0.0);
            (cell as u32).min(count - 1)
        };
        (axis(position[0], self.count_x), axis(position[1], self.count_y))
    }

    pub fn linear_index(&self, bucket: (u32, u32)) -> u32 {
        bucket.1 * self.count_x + bucket.0
    }
}

/// Worst case sizes of the descriptor and scattered index buffers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BucketCapacity {
    pub descriptors: u32,
    pub indices: u32,
}

impl BucketCapacity {
    /// Every bucket contributes `ceil(n_b / 64)` descriptors, which is at most
    /// `1 + n_b / 64`, so the sum is bounded by `B + ceil(N / 64)`.
    pub fn worst_case(geometry: BucketGeometry, max_particle_count: u32) -> Self {
        Self {
            descriptors: geometry.count() + div_up(max_particle_count, PARTICLE_DISPATCH_SIZE),
            indices: max_particle_count,
        }
    }

    /// Rejects sizes the device cannot bind or dispatch.
    pub fn check(&self, limits: &wgpu::Limits) -> Result<()> {
        if self.descriptors > limits.max_compute_workgroups_per_dimension {
            return Err(SimError::Configuration(format!(
                "{} bucket thread groups exceed the device dispatch limit of {}",
                self.descriptors, limits.max_compute_workgroups_per_dimension
            )));
        }
        let descriptor_bytes = u64::from(self.descriptors) * DESCRIPTOR_WORDS * 4;
        let index_bytes = u64::from(self.indices) * 4;
        let max_binding = u64::from(limits.max_storage_buffer_binding_size);
        if descriptor_bytes > max_binding || index_bytes > max_binding {
            return Err(SimError::Configuration(format!(
                "bucket buffers of {descriptor_bytes} and {index_bytes} bytes exceed the storage binding limit of {max_binding}"
            )));
        }
        Ok(())
    }
}

/// Per substep inputs the bucket passes read.
pub struct BucketInputs<'a, B> {
    pub constants: &'a B,
    pub particle_count: &'a B,
    pub particles: &'a B,
    pub sim_dispatch: &'a B,
}

pub struct BucketSystem<B> {
    geometry: BucketGeometry,
    capacity: BucketCapacity,
    count_buffer: B,
    cursor_buffer: B,
    thread_data: B,
    particle_data: B,
    dispatch: B,
    blank_dispatch: B,
    particle_allocator: B,
    index_start: B,
}

impl<B> BucketSystem<B> {
    pub fn new<F>(factory: &mut F, grid_size: [u32; 2], max_particle_count: u32) -> Result<Self>
    where
        F: BufferFactory<Buffer = B>,
    {
        use wgpu::BufferUsages as Usage;

        let geometry = BucketGeometry::for_grid(grid_size);
        let capacity = BucketCapacity::worst_case(geometry, max_particle_count);
        capacity.check(&factory.limits())?;

        let bucket_bytes = u64::from(geometry.count()) * 4;
        // COPY_SRC lets bucket state be read back for inspection
        let storage = Usage::STORAGE | Usage::COPY_DST | Usage::COPY_SRC;

        let count_buffer = factory.create_buffer("bukkit count", bucket_bytes, storage);
        let cursor_buffer = factory.create_buffer("bukkit cursor", bucket_bytes, storage);
        let thread_data = factory.create_buffer(
            "bukkit thread data",
            u64::from(capacity.descriptors) * DESCRIPTOR_WORDS * 4,
            storage,
        );
        let particle_data = factory.create_buffer(
            "bukkit particle data",
            u64::from(capacity.indices.max(1)) * 4,
            storage,
        );
        let dispatch = factory.create_buffer_init(
            "bukkit dispatch",
            &words_to_bytes(&[0, 1, 1, 0]),
            storage | Usage::INDIRECT,
        );
        let blank_dispatch = factory.create_buffer_init(
            "bukkit blank dispatch",
            &words_to_bytes(&[0, 1, 1, 0]),
            Usage::COPY_SRC,
        );
        let particle_allocator = factory.create_buffer_init(
            "bukkit particle allocator",
            &words_to_bytes(&[0, 0, 0, 0]),
            storage,
        );
        let index_start = factory.create_buffer("bukkit index start", bucket_bytes, storage);

        log::debug!(
            "bucket grid {}x{}, {} descriptors, {} indices",
            geometry.count_x,
            geometry.count_y,
            capacity.descriptors,
            capacity.indices
        );

        Ok(Self {
            geometry,
            capacity,
            count_buffer,
            cursor_buffer,
            thread_data,
            particle_data,
            dispatch,
            blank_dispatch,
            particle_allocator,
            index_start,
        })
    }

    pub fn geometry(&self) -> BucketGeometry {
        self.geometry
    }

    pub fn capacity(&self) -> BucketCapacity {
        self.capacity
    }

    /// Indirect arguments for the transfer kernel, one workgroup per descriptor.
    pub fn dispatch_buffer(&self) -> &B {
        &self.dispatch
    }

    pub fn thread_data(&self) -> &B {
        &self.thread_data
    }

    pub fn particle_data(&self) -> &B {
        &self.particle_data
    }

    /// Clears the per substep state and records the three bucket passes.
    pub fn record<E>(&self, backend: &mut E, inputs: &BucketInputs<'_, B>) -> Result<()>
    where
        E: ComputeBackend<Buffer = B>,
    {
        backend.clear_buffer(&self.count_buffer);
        backend.clear_buffer(&self.cursor_buffer);
        backend.clear_buffer(&self.thread_data);
        backend.clear_buffer(&self.particle_data);
        backend.clear_buffer(&self.particle_allocator);
        backend.copy_buffer(&self.blank_dispatch, &self.dispatch, DESCRIPTOR_WORDS * 4);

        backend.dispatch(
            Kernel::BukkitCount,
            BindingSet::flat([
                inputs.constants,
                inputs.particle_count,
                inputs.particles,
                &self.count_buffer,
            ]),
            DispatchSize::Indirect(inputs.sim_dispatch),
        )?;

        backend.dispatch(
            Kernel::BukkitAllocate,
            BindingSet::flat([
                inputs.constants,
                &self.count_buffer,
                &self.dispatch,
                &self.thread_data,
                &self.particle_allocator,
                &self.index_start,
            ]),
            DispatchSize::Direct([
                div_up(self.geometry.count_x, GRID_DISPATCH_SIZE),
                div_up(self.geometry.count_y, GRID_DISPATCH_SIZE),
                1,
            ]),
        )?;

        backend.dispatch(
            Kernel::BukkitInsert,
            BindingSet::flat([
                inputs.constants,
                inputs.particle_count,
                &self.cursor_buffer,
                inputs.particles,
                &self.particle_data,
                &self.index_start,
            ]),
            DispatchSize::Indirect(inputs.sim_dispatch),
        )
    }
}

/// One workgroup's slice of a bucket.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ThreadGroupDescriptor {
    pub bucket: (u32, u32),
    pub range_start: u32,
    pub range_count: u32,
}

/// Host side result of bucketing, used to check the kernels' contract.
#[derive(Debug, Clone, Default)]
pub struct ReferenceBuckets {
    pub counts: Vec<u32>,
    pub index_start: Vec<u32>,
    pub descriptors: Vec<ThreadGroupDescriptor>,
    pub scattered: Vec<u32>,
}

/// Buckets `positions` the way the three kernels do. `None` marks a free slot.
/// Ranges are allocated in linear bucket order, which is one of the orders
/// the allocation kernel may produce.
pub fn bucketize_reference(geometry: BucketGeometry, positions: &[Option<[f32; 2]>]) -> ReferenceBuckets {
    let bucket_count = geometry.count() as usize;
    let mut counts = vec![0u32; bucket_count];
    for position in positions.iter().flatten() {
        counts[geometry.linear_index(geometry.bucket_of(*position)) as usize] += 1;
    }

    let mut index_start = vec![0u32; bucket_count];
    let mut descriptors = Vec::new();
    let mut allocated = 0u32;
    for (bucket, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        index_start[bucket] = allocated;
        let bucket_xy = (bucket as u32 % geometry.count_x, bucket as u32 / geometry.count_x);
        let mut offset = 0;
        while offset < count {
            descriptors.push(ThreadGroupDescriptor {
                bucket: bucket_xy,
                range_start: allocated + offset,
                range_count: (count - offset).min(PARTICLE_DISPATCH_SIZE),
            });
            offset += PARTICLE_DISPATCH_SIZE;
        }
        allocated += count;
    }

    let mut cursor = vec![0u32; bucket_count];
    let mut scattered = vec![0u32; allocated as usize];
    for (index, position) in positions.iter().enumerate() {
        let Some(position) = position else { continue };
        let bucket = geometry.linear_index(geometry.bucket_of(*position)) as usize;
        scattered[(index_start[bucket] + cursor[bucket]) as usize] = index as u32;
        cursor[bucket] += 1;
    }

    ReferenceBuckets {
        counts,
        index_start,
        descriptors,
        scattered,
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand::rngs::StdRng;

    use super::*;
    use crate::gpu::backend::mock::{MockBackend, RecordedSize};

    fn random_positions(rng: &mut StdRng, count: usize, grid: [u32; 2], free_ratio: f64) -> Vec<Option<[f32; 2]>> {
        (0..count)
            .map(|_| {
                if rng.gen_bool(free_ratio) {
                    None
                } else {
                    Some([
                        rng.gen_range(0.0..grid[0] as f32),
                        rng.gen_range(0.0..grid[1] as f32),
                    ])
                }
            })
            .collect()
    }

    #[test]
    fn geometry_rounds_up_partial_buckets() {
        let geometry = BucketGeometry::for_grid([128, 96]);
        assert_eq!((geometry.count_x, geometry.count_y), (22, 16));
        assert_eq!(geometry.count(), 352);
    }

    #[test]
    fn out_of_grid_positions_clamp_to_edge_buckets() {
        let geometry = BucketGeometry::for_grid([12, 12]);
        assert_eq!(geometry.bucket_of([-5.0, 3.0]), (0, 0));
        assert_eq!(geometry.bucket_of([100.0, 6.0]), (1, 1));
        assert_eq!(geometry.bucket_of([5.99, 11.99]), (0, 1));
    }

    #[test]
    fn scattered_ranges_partition_live_particles() {
        let mut rng = StdRng::seed_from_u64(7);
        let grid = [64, 48];
        let geometry = BucketGeometry::for_grid(grid);
        let positions = random_positions(&mut rng, 5000, grid, 0.2);

        let buckets = bucketize_reference(geometry, &positions);

        let live: Vec<u32> = positions
            .iter()
            .enumerate()
            .filter_map(|(index, position)| position.map(|_| index as u32))
            .collect();
        let mut scattered = buckets.scattered.clone();
        scattered.sort_unstable();
        assert_eq!(scattered, live);

        for (bucket, &count) in buckets.counts.iter().enumerate() {
            let start = buckets.index_start[bucket] as usize;
            for &index in &buckets.scattered[start..start + count as usize] {
                let position = positions[index as usize].unwrap();
                assert_eq!(geometry.linear_index(geometry.bucket_of(position)) as usize, bucket);
            }
        }
    }

    #[test]
    fn descriptors_cover_each_bucket_in_groups_of_64() {
        let mut rng = StdRng::seed_from_u64(11);
        let grid = [30, 30];
        let geometry = BucketGeometry::for_grid(grid);
        let positions = random_positions(&mut rng, 4000, grid, 0.0);

        let buckets = bucketize_reference(geometry, &positions);
        let mut covered = vec![0u32; geometry.count() as usize];
        for descriptor in &buckets.descriptors {
            assert!(descriptor.range_count >= 1);
            assert!(descriptor.range_count <= PARTICLE_DISPATCH_SIZE);
            covered[geometry.linear_index(descriptor.bucket) as usize] += descriptor.range_count;
        }
        assert_eq!(covered, buckets.counts);
    }

    #[test]
    fn worst_case_capacity_bounds_any_distribution() {
        let grid = [48, 48];
        let geometry = BucketGeometry::for_grid(grid);
        let max = 1000;
        let capacity = BucketCapacity::worst_case(geometry, max);

        // Everything in one bucket
        let clustered: Vec<_> = (0..max).map(|_| Some([1.0, 1.0])).collect();
        assert!(bucketize_reference(geometry, &clustered).descriptors.len() as u32 <= capacity.descriptors);

        // Evenly spread over every bucket
        let mut spread = Vec::new();
        for by in 0..geometry.count_y {
            for bx in 0..geometry.count_x {
                for _ in 0..(max / geometry.count()) {
                    spread.push(Some([bx as f32 * 6.0 + 0.5, by as f32 * 6.0 + 0.5]));
                }
            }
        }
        assert!(bucketize_reference(geometry, &spread).descriptors.len() as u32 <= capacity.descriptors);
    }

    #[test]
    fn no_live_particles_means_no_descriptors() {
        let geometry = BucketGeometry::for_grid([20, 20]);
        let buckets = bucketize_reference(geometry, &[None, None, None]);
        assert!(buckets.descriptors.is_empty());
        assert!(buckets.scattered.is_empty());
    }

    #[test]
    fn oversized_capacity_is_a_configuration_error() {
        let limits = wgpu::Limits::default();
        let capacity = BucketCapacity {
            descriptors: limits.max_compute_workgroups_per_dimension + 1,
            indices: 10,
        };
        assert!(matches!(capacity.check(&limits), Err(SimError::Configuration(_))));
    }

    #[test]
    fn record_resets_state_then_runs_three_passes() {
        let mut backend = MockBackend::default();
        let buckets = BucketSystem::new(&mut backend, [64, 64], 1000).unwrap();
        let constants = backend.create_buffer("constants", 128, wgpu::BufferUsages::UNIFORM);
        let count = backend.create_buffer("particle count", 16, wgpu::BufferUsages::STORAGE);
        let particles = backend.create_buffer("particles", 64_000, wgpu::BufferUsages::STORAGE);
        let sim_dispatch = backend.create_buffer("sim dispatch", 16, wgpu::BufferUsages::INDIRECT);

        buckets
            .record(
                &mut backend,
                &BucketInputs {
                    constants: &constants,
                    particle_count: &count,
                    particles: &particles,
                    sim_dispatch: &sim_dispatch,
                },
            )
            .unwrap();

        assert_eq!(backend.clears.len(), 5);
        assert_eq!(
            backend.copies,
            vec![("bukkit blank dispatch".to_owned(), "bukkit dispatch".to_owned())]
        );
        let kernels: Vec<_> = backend.dispatches.iter().map(|d| d.kernel).collect();
        assert_eq!(kernels, vec![Kernel::BukkitCount, Kernel::BukkitAllocate, Kernel::BukkitInsert]);
        assert_eq!(backend.dispatches[1].size, RecordedSize::Direct([2, 2, 1]));
        assert_eq!(backend.dispatches[2].size, RecordedSize::Indirect("sim dispatch".to_owned()));
    }
}
