use crate::config::render_enums_text;
use crate::error::Result;
use crate::gpu::context::GpuContext;
use crate::gpu::kernels::compile_render_module;
use crate::gpu::preprocess::ShaderPreprocessor;
use crate::layout::{FieldType, LayoutMode, StructLayout, Values};

const PARTICLE_SHADER: &str = "particleRender";

/// The `RenderConstants` uniform read by the particle shader.
pub(crate) fn render_constants_layout() -> Result<StructLayout> {
    let mut layout = StructLayout::new("RenderConstants", LayoutMode::Uniform);
    layout.add("particleRadiusTimestamp", FieldType::Vec2F)?;
    layout.add("canvasSize", FieldType::Vec2F)?;
    layout.add("viewPos", FieldType::Vec2F)?;
    layout.add("viewExtent", FieldType::Vec2F)?;
    layout.add("renderMode", FieldType::F32)?;
    layout.add("deltaTime", FieldType::F32)?;
    layout.compile()?;
    Ok(layout)
}

/// Per frame inputs of the particle draw.
pub(crate) struct ParticleView {
    pub(crate) grid_size: [u32; 2],
    pub(crate) canvas_size: [u32; 2],
    pub(crate) particles_per_cell_axis: u32,
    pub(crate) render_mode: u32,
    pub(crate) sim_rate: u32,
    pub(crate) elapsed_seconds: f32,
}

impl ParticleView {
    fn values(&self) -> Values {
        let grid = glam::Vec2::new(self.grid_size[0] as f32, self.grid_size[1] as f32);
        // Half the spacing of particles seeded on a full cell
        let radius = 0.5 / self.particles_per_cell_axis.max(1) as f32;
        Values::new()
            .with("particleRadiusTimestamp", [radius, self.elapsed_seconds])
            .with(
                "canvasSize",
                [self.canvas_size[0] as f32, self.canvas_size[1] as f32],
            )
            .with("viewPos", grid * 0.5)
            .with("viewExtent", grid * 0.5)
            .with("renderMode", self.render_mode as f32)
            .with("deltaTime", 1.0 / self.sim_rate.max(1) as f32)
    }
}

/// Instanced circle sprites, one instance per particle slot.
pub(crate) struct ParticleRenderPipeline {
    pipeline: wgpu::RenderPipeline,
    constants_layout: StructLayout,
    constants_buffer: wgpu::Buffer,
}

impl ParticleRenderPipeline {
    pub(crate) async fn new(
        context: &GpuContext,
        preprocessor: &mut ShaderPreprocessor,
        surface_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let constants_layout = render_constants_layout()?;
        preprocessor.add_insert("RenderConstants", constants_layout.shader_text()?);
        preprocessor.add_insert("RenderEnums", render_enums_text());

        let module = compile_render_module(context, preprocessor, PARTICLE_SHADER).await?;
        let pipeline = context
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("particle render pipeline"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vertexMain"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fragmentMain"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        let constants_buffer = context.buffer(
            "render constants",
            constants_layout.total_bytes()?,
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        );

        Ok(Self {
            pipeline,
            constants_layout,
            constants_buffer,
        })
    }

    /// Bind group over the particle arena. Rebuilt whenever the pool is.
    pub(crate) fn bind(&self, device: &wgpu::Device, particles: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle render bind group"),
            layout: &self.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.constants_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles.as_entire_binding(),
                },
            ],
        })
    }

    pub(crate) fn update_constants(&self, queue: &wgpu::Queue, view: &ParticleView) -> Result<()> {
        let packed = self.constants_layout.pack(&[&view.values()])?;
        queue.write_buffer(&self.constants_buffer, 0, &packed.as_bytes());
        Ok(())
    }

    /// Draws every particle slot; the vertex count and instance count come
    /// from `render_dispatch`.
    pub(crate) fn draw(
        &self,
        render_pass: &mut wgpu::RenderPass<'_>,
        bind_group: &wgpu::BindGroup,
        render_dispatch: &wgpu::Buffer,
    ) {
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw_indirect(render_dispatch, 0);
    }
}
