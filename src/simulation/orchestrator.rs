//! Records one displayed frame of simulation work.

use crate::config::{GRID_DISPATCH_SIZE, SimSettings, dispatch_sizes_text, sim_enums_text};
use crate::error::Result;
use crate::gpu::backend::{BindingSet, ComputeBackend, DispatchSize, div_up};
use crate::gpu::kernels::Kernel;
use crate::gpu::pool::ResourcePool;
use crate::gpu::preprocess::ShaderPreprocessor;
use crate::layout::{StructLayout, Values};
use crate::simulation::bucket::BucketInputs;
use crate::simulation::constants::{FrameInputs, GridMouse, grid_mouse, sim_constants_layout};
use crate::simulation::shapes::{Shape, pack_shapes, shape_layout};
use crate::time::{TimeInputs, TimeRegulator};

/// What a frame recorded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameReport {
    pub substeps: u32,
    pub transfer_dispatches: u32,
    /// Index of the grid buffer that will be read as current by the next
    /// transfer dispatch of this frame.
    pub rotation: usize,
}

pub struct Simulation {
    settings: SimSettings,
    constants_layout: StructLayout,
    shape_layout: StructLayout,
    shapes: Vec<Shape>,
    substep_index: u32,
}

impl Simulation {
    pub fn new(settings: SimSettings, shapes: Vec<Shape>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            constants_layout: sim_constants_layout()?,
            shape_layout: shape_layout()?,
            shapes,
            substep_index: 0,
        })
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn set_shapes(&mut self, shapes: Vec<Shape>) {
        self.shapes = shapes;
    }

    /// Substeps simulated since the last reset.
    pub fn substep_index(&self) -> u32 {
        self.substep_index
    }

    /// Registers the struct and constant texts the simulation kernels insert.
    pub fn register_inserts(&self, preprocessor: &mut ShaderPreprocessor) -> Result<()> {
        preprocessor.add_insert("SimConstants", self.constants_layout.shader_text()?);
        preprocessor.add_insert("SimShape", self.shape_layout.shader_text()?);
        preprocessor.add_insert("SimEnums", sim_enums_text());
        preprocessor.add_insert("DispatchSizes", dispatch_sizes_text());
        Ok(())
    }

    fn constants_buffer<E: ComputeBackend>(
        &self,
        backend: &mut E,
        settings_layer: &Values,
        frame_layer: &Values,
        iteration: u32,
    ) -> Result<E::Buffer> {
        let iteration_layer = Values::new().with("iteration", iteration);
        let packed = self
            .constants_layout
            .pack(&[settings_layer, frame_layer, &iteration_layer])?;
        Ok(backend.create_buffer_init(
            "sim constants",
            &packed.as_bytes(),
            wgpu::BufferUsages::UNIFORM,
        ))
    }

    fn frame_layer(&self, pool: &ResourcePool<impl Sized>, mouse: &GridMouse) -> Values {
        let geometry = pool.buckets.geometry();
        Values::new()
            .with("gridSize", pool.grid_size)
            .with("deltaTime", 1.0 / self.settings.sim_rate as f32)
            .with("mouseActivation", mouse.activation)
            .with("mousePosition", mouse.position)
            .with("mouseVelocity", mouse.velocity)
            .with("fixedPointMultiplier", self.settings.fixed_point_multiplier())
            .with(
                "mouseRadius",
                self.settings.mouse_radius / self.settings.sim_res_divisor.max(1) as f32,
            )
            .with("shapeCount", self.shapes.len() as u32)
            .with("simFrame", self.substep_index)
            .with("bukkitCount", geometry.count())
            .with("bukkitCountX", geometry.count_x)
            .with("bukkitCountY", geometry.count_y)
            .with("maxParticleCount", pool.max_particle_count)
    }

    /// Records the frame: grid clears, then for every substep emission,
    /// indirect argument setup, bucketing and `iteration_count` transfer
    /// dispatches over the rotating grid window. Any validation failure
    /// aborts the frame before anything is submitted.
    pub fn update<E: ComputeBackend>(
        &mut self,
        backend: &mut E,
        pool: &ResourcePool<E::Buffer>,
        time: &mut TimeRegulator,
        inputs: &FrameInputs,
    ) -> Result<FrameReport> {
        if inputs.do_reset {
            self.substep_index = 0;
        }

        for grid in &pool.grids {
            backend.clear_buffer(grid);
        }

        let shape_words = pack_shapes(
            &self.shape_layout,
            &self.shapes,
            self.settings.sim_res_divisor,
            pool.grid_size[1],
        )?;
        let shape_buffer = backend.create_buffer_init(
            "sim shapes",
            &shape_words.as_bytes(),
            wgpu::BufferUsages::STORAGE,
        );

        let substeps = time.regulate(&TimeInputs {
            now_ms: inputs.now_ms,
            sim_rate: self.settings.sim_rate,
            do_pause: inputs.do_pause,
            do_reset: inputs.do_reset,
        });

        let mouse = grid_mouse(
            &inputs.mouse,
            inputs.resolution,
            pool.grid_size,
            self.settings.sim_rate,
            time.last_render_time_step(),
        );
        let settings_layer = self.settings.constants_layer();
        let emit_groups = [
            div_up(pool.grid_size[0], GRID_DISPATCH_SIZE),
            div_up(pool.grid_size[1], GRID_DISPATCH_SIZE),
            1,
        ];

        let mut rotation = 0usize;
        let mut transfer_dispatches = 0;
        for _ in 0..substeps {
            let frame_layer = self.frame_layer(pool, &mouse);
            let constants = self.constants_buffer(backend, &settings_layer, &frame_layer, 0)?;

            backend.dispatch(
                Kernel::ParticleEmit,
                BindingSet::flat([
                    &constants,
                    &pool.particle_count,
                    &pool.particles,
                    &shape_buffer,
                    &pool.free_indices,
                ]),
                DispatchSize::Direct(emit_groups),
            )?;

            backend.dispatch(
                Kernel::SetIndirectArgs,
                BindingSet::flat([&pool.particle_count, &pool.sim_dispatch, &pool.render_dispatch]),
                DispatchSize::Direct([1, 1, 1]),
            )?;

            pool.buckets.record(
                backend,
                &BucketInputs {
                    constants: &constants,
                    particle_count: &pool.particle_count,
                    particles: &pool.particles,
                    sim_dispatch: &pool.sim_dispatch,
                },
            )?;

            for iteration in 0..self.settings.iteration_count {
                let constants = self.constants_buffer(backend, &settings_layer, &frame_layer, iteration)?;
                let [current, next, next_next] = [rotation, (rotation + 1) % 3, (rotation + 2) % 3];

                backend.dispatch(
                    Kernel::G2P2G,
                    BindingSet::flat([
                        &constants,
                        &pool.particles,
                        &pool.grids[current],
                        &pool.grids[next],
                        &pool.grids[next_next],
                        pool.buckets.thread_data(),
                        pool.buckets.particle_data(),
                        &shape_buffer,
                        &pool.free_indices,
                    ]),
                    DispatchSize::Indirect(pool.buckets.dispatch_buffer()),
                )?;

                rotation = (rotation + 1) % 3;
                transfer_dispatches += 1;
            }

            self.substep_index += 1;
        }

        Ok(FrameReport {
            substeps,
            transfer_dispatches,
            rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;
    use crate::gpu::backend::BufferFactory;
    use crate::gpu::backend::mock::{MockBackend, MockBuffer, RecordedSize};
    use crate::simulation::constants::MouseInput;

    const RESOLUTION: [u32; 2] = [256, 192];

    fn setup(settings: SimSettings) -> (Simulation, MockBackend, ResourcePool<MockBuffer>, TimeRegulator) {
        let mut backend = MockBackend::default();
        let grid = settings.grid_size(RESOLUTION);
        let pool = ResourcePool::new(&mut backend, grid, 4096).unwrap();
        let time = TimeRegulator::new(settings.substep_cap, settings.throttle_policy);
        let simulation = Simulation::new(settings, Vec::new()).unwrap();
        backend.reset_log();
        (simulation, backend, pool, time)
    }

    fn inputs(now_ms: f64, do_reset: bool) -> FrameInputs {
        FrameInputs {
            now_ms,
            do_pause: false,
            do_reset,
            resolution: RESOLUTION,
            mouse: MouseInput::default(),
        }
    }

    #[test]
    fn reset_frame_runs_substeps_times_iterations_transfers() {
        // 90Hz and a reset frame of 1000/60 ms gives exactly one substep
        let settings = SimSettings {
            sim_rate: 90,
            iteration_count: 3,
            ..SimSettings::default()
        };
        let (mut simulation, mut backend, pool, mut time) = setup(settings);

        let report = simulation
            .update(&mut backend, &pool, &mut time, &inputs(1000.0, true))
            .unwrap();

        assert_eq!(report.substeps, 1);
        assert_eq!(report.transfer_dispatches, 3);
        assert_eq!(backend.count(Kernel::G2P2G), 3);
        assert_eq!(backend.count(Kernel::ParticleEmit), 1);
        assert_eq!(backend.count(Kernel::SetIndirectArgs), 1);
        assert_eq!(backend.count(Kernel::BukkitCount), 1);
        assert_eq!(simulation.substep_index(), 1);
    }

    #[test]
    fn dispatch_counts_scale_with_substeps() {
        let settings = SimSettings {
            sim_rate: 600,
            iteration_count: 2,
            ..SimSettings::default()
        };
        let (mut simulation, mut backend, pool, mut time) = setup(settings);
        simulation
            .update(&mut backend, &pool, &mut time, &inputs(0.0, true))
            .unwrap();
        backend.reset_log();

        // 50ms at 600Hz is 30 substeps
        let report = simulation
            .update(&mut backend, &pool, &mut time, &inputs(50.0, false))
            .unwrap();
        let substeps = report.substeps as usize;
        assert!(substeps > 0);
        assert_eq!(backend.count(Kernel::ParticleEmit), substeps);
        assert_eq!(backend.count(Kernel::BukkitInsert), substeps);
        assert_eq!(backend.count(Kernel::G2P2G), substeps * 2);
        assert_eq!(report.transfer_dispatches as usize, substeps * 2);
        assert_eq!(report.rotation, (substeps * 2) % 3);
    }

    #[test]
    fn grid_window_rotates_through_three_buffers() {
        let settings = SimSettings {
            sim_rate: 90,
            iteration_count: 4,
            ..SimSettings::default()
        };
        let (mut simulation, mut backend, pool, mut time) = setup(settings);
        simulation
            .update(&mut backend, &pool, &mut time, &inputs(1000.0, true))
            .unwrap();

        let windows: Vec<Vec<String>> = backend
            .dispatches
            .iter()
            .filter(|dispatch| dispatch.kernel == Kernel::G2P2G)
            .map(|dispatch| dispatch.groups[0][2..5].to_vec())
            .collect();
        let grid = |index: usize| format!("grid {index}");
        assert_eq!(windows[0], vec![grid(0), grid(1), grid(2)]);
        assert_eq!(windows[1], vec![grid(1), grid(2), grid(0)]);
        assert_eq!(windows[2], vec![grid(2), grid(0), grid(1)]);
        assert_eq!(windows[3], vec![grid(0), grid(1), grid(2)]);
    }

    #[test]
    fn frame_starts_with_grid_clears_and_uses_indirect_transfer() {
        let (mut simulation, mut backend, pool, mut time) = setup(SimSettings {
            sim_rate: 90,
            ..SimSettings::default()
        });
        simulation
            .update(&mut backend, &pool, &mut time, &inputs(1000.0, true))
            .unwrap();

        assert_eq!(&backend.clears[..3], &["grid 0", "grid 1", "grid 2"]);
        let transfer = backend
            .dispatches
            .iter()
            .find(|dispatch| dispatch.kernel == Kernel::G2P2G)
            .unwrap();
        assert_eq!(transfer.size, RecordedSize::Indirect("bukkit dispatch".to_owned()));
        let emit = &backend.dispatches[0];
        assert_eq!(emit.kernel, Kernel::ParticleEmit);
        assert_eq!(emit.size, RecordedSize::Direct([4, 3, 1]));
    }

    #[test]
    fn paused_frames_record_no_substeps() {
        let (mut simulation, mut backend, pool, mut time) = setup(SimSettings::default());
        let report = simulation
            .update(
                &mut backend,
                &pool,
                &mut time,
                &FrameInputs {
                    do_pause: true,
                    ..inputs(500.0, false)
                },
            )
            .unwrap();
        assert_eq!(report.substeps, 0);
        assert_eq!(backend.count(Kernel::G2P2G), 0);
        assert_eq!(backend.clears.len(), 3);
    }

    #[test]
    fn reset_restarts_substep_index() {
        let settings = SimSettings {
            sim_rate: 90,
            ..SimSettings::default()
        };
        let (mut simulation, mut backend, pool, mut time) = setup(settings);
        simulation
            .update(&mut backend, &pool, &mut time, &inputs(1000.0, true))
            .unwrap();
        simulation
            .update(&mut backend, &pool, &mut time, &inputs(1100.0, false))
            .unwrap();
        assert!(simulation.substep_index() > 1);

        simulation
            .update(&mut backend, &pool, &mut time, &inputs(2000.0, true))
            .unwrap();
        assert_eq!(simulation.substep_index(), 1);
    }

    #[test]
    fn zero_sized_pool_buffer_fails_validation_before_recording() {
        let (mut simulation, mut backend, mut pool, mut time) = setup(SimSettings {
            sim_rate: 90,
            ..SimSettings::default()
        });
        pool.free_indices = backend.create_buffer("free particle indices", 0, wgpu::BufferUsages::STORAGE);

        let result = simulation.update(&mut backend, &pool, &mut time, &inputs(1000.0, true));
        assert!(matches!(result, Err(SimError::Validation(_))));
        assert_eq!(backend.count(Kernel::ParticleEmit), 0);
    }

    #[test]
    fn uncompiled_transfer_kernel_aborts_the_frame() {
        let (mut simulation, mut backend, pool, mut time) = setup(SimSettings {
            sim_rate: 90,
            ..SimSettings::default()
        });
        backend.uncompiled = Some(Kernel::G2P2G);

        let result = simulation.update(&mut backend, &pool, &mut time, &inputs(1000.0, true));
        assert!(matches!(result, Err(SimError::Validation(_))));
        assert_eq!(backend.count(Kernel::BukkitInsert), 1);
        assert_eq!(backend.count(Kernel::G2P2G), 0);
    }

    #[test]
    fn inserts_cover_every_simulation_key() {
        let simulation = Simulation::new(SimSettings::default(), Vec::new()).unwrap();
        let mut preprocessor = ShaderPreprocessor::with_builtin_sources();
        simulation.register_inserts(&mut preprocessor).unwrap();
        for kernel in Kernel::ALL {
            let text = preprocessor.process(kernel.name()).unwrap();
            assert!(text.contains("csMain"), "{}", kernel.name());
        }
    }
}
