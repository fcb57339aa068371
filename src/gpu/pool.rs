//! Buffers that live from one reset to the next.

use crate::config::PARTICLE_WORDS;
use crate::error::{Result, SimError};
use crate::gpu::backend::BufferFactory;
use crate::layout::words::words_to_bytes;
use crate::simulation::bucket::BucketSystem;

/// Words per grid cell: mass, momentum x, momentum y and volume, all fixed point.
pub const GRID_CELL_WORDS: u64 = 4;

pub struct ResourcePool<B> {
    pub max_particle_count: u32,
    pub grid_size: [u32; 2],
    /// Word 0 is the high water mark of allocated slots.
    pub particle_count: B,
    /// Instanced draw arguments: six vertices per particle slot.
    pub render_dispatch: B,
    /// Workgroups covering every allocated slot, rewritten each substep.
    pub sim_dispatch: B,
    pub particles: B,
    /// Word 0 is the free count, followed by that many released slot indices.
    pub free_indices: B,
    pub grids: [B; 3],
    pub buckets: BucketSystem<B>,
}

/// A buffer of four words, the size of every counter and indirect argument
/// block the kernels use.
pub fn four_word_buffer<F: BufferFactory>(
    factory: &mut F,
    label: &str,
    usage: wgpu::BufferUsages,
    values: [u32; 4],
) -> F::Buffer {
    factory.create_buffer_init(label, &words_to_bytes(&values), usage)
}

impl<B> ResourcePool<B> {
    pub fn new<F>(factory: &mut F, grid_size: [u32; 2], max_particle_count: u32) -> Result<Self>
    where
        F: BufferFactory<Buffer = B>,
    {
        use wgpu::BufferUsages as Usage;

        let limits = factory.limits();
        let particle_bytes = u64::from(max_particle_count) * PARTICLE_WORDS * 4;
        let grid_bytes = u64::from(grid_size[0]) * u64::from(grid_size[1]) * GRID_CELL_WORDS * 4;
        let max_binding = u64::from(limits.max_storage_buffer_binding_size);
        if particle_bytes > max_binding {
            return Err(SimError::Configuration(format!(
                "{max_particle_count} particles need {particle_bytes} bytes, over the storage binding limit of {max_binding}"
            )));
        }
        if grid_bytes > max_binding {
            return Err(SimError::Configuration(format!(
                "a {}x{} grid needs {grid_bytes} bytes, over the storage binding limit of {max_binding}",
                grid_size[0], grid_size[1]
            )));
        }

        let storage = Usage::STORAGE | Usage::COPY_DST | Usage::COPY_SRC;

        let particle_count = four_word_buffer(factory, "particle count", storage, [0, 0, 0, 0]);
        let render_dispatch = four_word_buffer(
            factory,
            "particle render dispatch",
            Usage::STORAGE | Usage::INDIRECT,
            [6, 0, 0, 0],
        );
        let sim_dispatch = four_word_buffer(
            factory,
            "particle sim dispatch",
            Usage::STORAGE | Usage::INDIRECT,
            [0, 1, 1, 0],
        );
        let particles = factory.create_buffer("particles", particle_bytes, storage);
        // Zero initialised, so the free count starts at 0
        let free_indices = factory.create_buffer(
            "free particle indices",
            4 + 4 * u64::from(max_particle_count),
            storage,
        );
        let grids = [
            factory.create_buffer("grid 0", grid_bytes, storage),
            factory.create_buffer("grid 1", grid_bytes, storage),
            factory.create_buffer("grid 2", grid_bytes, storage),
        ];
        let buckets = BucketSystem::new(factory, grid_size, max_particle_count)?;

        log::info!(
            "allocated resources for a {}x{} grid and {max_particle_count} particles",
            grid_size[0],
            grid_size[1]
        );

        Ok(Self {
            max_particle_count,
            grid_size,
            particle_count,
            render_dispatch,
            sim_dispatch,
            particles,
            free_indices,
            grids,
            buckets,
        })
    }
}
