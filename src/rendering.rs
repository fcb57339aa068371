mod render_pass;
mod render_pipeline;
mod surface;

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;
use winit::window::Window;

use render_pass::record_particle_pass;
use render_pipeline::{ParticleRenderPipeline, ParticleView};
use surface::configure_surface;

use crate::config::SimSettings;
use crate::error::{Result, SimError};
use crate::gpu::{FrameEncoder, GpuContext, KernelLibrary, ReadbackSynchronizer, ResourcePool, ShaderPreprocessor, TimestampRecorder};
use crate::simulation::{FrameInputs, MouseInput, Shape, Simulation};
use crate::time::TimeRegulator;

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Buffers rebuilt on every reset.
struct FrameResources {
    pool: ResourcePool<wgpu::Buffer>,
    particle_bind_group: wgpu::BindGroup,
}

pub(crate) struct Renderer {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    context: GpuContext,
    kernels: KernelLibrary,
    particle_pipeline: ParticleRenderPipeline,
    resources: Option<FrameResources>,

    simulation: Simulation,
    time: TimeRegulator,
    readback: ReadbackSynchronizer,
    timestamps: Option<TimestampRecorder>,

    paused: bool,
    reset_requested: bool,
    mouse: MouseInput,
    started: Instant,
    last_stats_log: Instant,
}

impl Renderer {
    pub(crate) async fn new(window: Arc<Window>, settings: SimSettings, shapes: Vec<Shape>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .map_err(|err| SimError::Platform(format!("failed to create surface: {err}")))?;
        let context = GpuContext::new(instance, Some(&surface)).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&context.adapter);
        let surface_config = configure_surface(&context.device, &size, &surface, &surface_caps);

        let simulation = Simulation::new(settings, shapes)?;
        let mut preprocessor = ShaderPreprocessor::with_builtin_sources();
        simulation.register_inserts(&mut preprocessor)?;
        let kernels = KernelLibrary::new(&context, &preprocessor).await?;
        let particle_pipeline = ParticleRenderPipeline::new(&context, &mut preprocessor, surface_config.format).await?;

        let settings = simulation.settings();
        let time = TimeRegulator::new(settings.substep_cap, settings.throttle_policy);
        let readback = ReadbackSynchronizer::new(&context, settings.max_particle_count);
        let timestamps = context
            .can_timestamp
            .then(|| TimestampRecorder::new(&context.device));

        log::info!(
            "renderer ready at {}x{} ({:?}), {} shapes",
            surface_config.width,
            surface_config.height,
            surface_config.format,
            simulation.shapes().len()
        );

        let now = Instant::now();
        Ok(Self {
            window,
            surface,
            surface_config,
            context,
            kernels,
            particle_pipeline,
            resources: None,
            simulation,
            time,
            readback,
            timestamps,
            paused: false,
            reset_requested: true,
            mouse: MouseInput::default(),
            started: now,
            last_stats_log: now,
        })
    }

    pub(crate) fn get_window(&self) -> &Window {
        &self.window
    }

    pub(crate) fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.surface_config.width = new_size.width;
            self.surface_config.height = new_size.height;
            self.surface.configure(&self.context.device, &self.surface_config);
            // The grid follows the window size
            self.reset_requested = true;
        }
    }

    pub(crate) fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        log::info!("simulation {}", if self.paused { "paused" } else { "resumed" });
    }

    pub(crate) fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    pub(crate) fn handle_mouse_move(&mut self, position: [f32; 2]) {
        self.mouse.position = Vec2::from(position);
    }

    pub(crate) fn handle_mouse_button(&mut self, is_down: bool) {
        self.mouse.is_down = is_down;
    }

    fn rebuild_resources(&mut self) -> Result<()> {
        let resolution = [self.surface_config.width, self.surface_config.height];
        let grid_size = self.simulation.settings().grid_size(resolution);
        let max_particle_count = self.simulation.settings().max_particle_count;

        self.resources = None;
        let pool = ResourcePool::new(&mut self.context, grid_size, max_particle_count)?;
        let particle_bind_group = self.particle_pipeline.bind(&self.context.device, &pool.particles);
        self.readback.reset(max_particle_count);
        self.resources = Some(FrameResources {
            pool,
            particle_bind_group,
        });

        log::info!(
            "simulation reset on a {}x{} grid, up to {max_particle_count} particles",
            grid_size[0],
            grid_size[1]
        );
        Ok(())
    }

    fn log_stats(&mut self) {
        if self.last_stats_log.elapsed() < STATS_LOG_INTERVAL {
            return;
        }
        let stats = self.readback.stats_mut();
        let counts = stats.take_particle_stats();
        let timings = stats.take_timing_stats();
        if counts.is_none() && timings.is_none() {
            return;
        }
        self.last_stats_log = Instant::now();

        if let Some(counts) = counts {
            log::info!(
                "{} live particles ({} allocated, {} free), sim at {:.0}% of real time",
                counts.live(),
                counts.allocated,
                counts.free,
                self.time.throttling_ratio() * 100.0
            );
        }
        if let Some(timings) = timings {
            let total: f64 = timings.values().sum();
            log::info!("compute {total:.2} ms per frame");
            for (name, ms) in &timings {
                log::debug!("  {name}: {ms:.3} ms");
            }
        }
    }

    /// Simulates and draws one frame. Errors are fatal; nothing from a
    /// failed frame is submitted.
    pub(crate) fn render(&mut self) -> Result<()> {
        self.readback.poll(&self.context.device);
        self.log_stats();

        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.context.device, &self.surface_config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("timed out acquiring the next surface texture, frame skipped");
                return Ok(());
            }
            Err(err) => {
                return Err(SimError::Platform(format!("failed to acquire surface texture: {err}")));
            }
        };

        let do_reset = std::mem::take(&mut self.reset_requested);
        if do_reset || self.resources.is_none() {
            self.rebuild_resources()?;
        }
        let Some(resources) = self.resources.as_ref() else {
            return Ok(());
        };

        let resolution = [self.surface_config.width, self.surface_config.height];
        let inputs = FrameInputs {
            now_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            do_pause: self.paused,
            do_reset,
            resolution,
            mouse: self.mouse,
        };

        let mut frame = FrameEncoder::new(&self.context, &self.kernels, self.timestamps.as_mut());
        let report = self
            .simulation
            .update(&mut frame, &resources.pool, &mut self.time, &inputs)?;
        log::trace!(
            "{} substeps, {} transfer dispatches",
            report.substeps,
            report.transfer_dispatches
        );

        let settings = self.simulation.settings();
        self.particle_pipeline.update_constants(
            &self.context.queue,
            &ParticleView {
                grid_size: resources.pool.grid_size,
                canvas_size: resolution,
                particles_per_cell_axis: settings.particles_per_cell_axis,
                render_mode: settings.render_mode,
                sim_rate: settings.sim_rate,
                elapsed_seconds: self.started.elapsed().as_secs_f32(),
            },
        )?;

        let texture_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        record_particle_pass(
            frame.encoder_mut(),
            &texture_view,
            &self.particle_pipeline,
            &resources.particle_bind_group,
            &resources.pool.render_dispatch,
        );
        self.readback.record_copies(&mut frame, &resources.pool);

        self.context.queue.submit(std::iter::once(frame.finish()));
        self.window.pre_present_notify();
        surface_texture.present();
        self.readback.start_maps();

        self.mouse.previous_position = self.mouse.position;
        Ok(())
    }
}
