use std::collections::HashMap;

use crate::error::{Result, SimError};
use crate::gpu::context::GpuContext;
use crate::gpu::preprocess::ShaderPreprocessor;

pub const COMPUTE_ENTRY_POINT: &str = "csMain";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kernel {
    G2P2G,
    BukkitCount,
    BukkitAllocate,
    BukkitInsert,
    ParticleEmit,
    SetIndirectArgs,
}

impl Kernel {
    pub const ALL: [Kernel; 6] = [
        Kernel::G2P2G,
        Kernel::BukkitCount,
        Kernel::BukkitAllocate,
        Kernel::BukkitInsert,
        Kernel::ParticleEmit,
        Kernel::SetIndirectArgs,
    ];

    /// Source name, also used as the pass label and the timing key.
    pub fn name(self) -> &'static str {
        match self {
            Kernel::G2P2G => "g2p2g",
            Kernel::BukkitCount => "bukkitCount",
            Kernel::BukkitAllocate => "bukkitAllocate",
            Kernel::BukkitInsert => "bukkitInsert",
            Kernel::ParticleEmit => "particleEmit",
            Kernel::SetIndirectArgs => "setIndirectArgs",
        }
    }
}

/// Every compute pipeline, compiled once at startup.
pub struct KernelLibrary {
    pipelines: HashMap<Kernel, wgpu::ComputePipeline>,
}

impl KernelLibrary {
    pub async fn new(context: &GpuContext, preprocessor: &ShaderPreprocessor) -> Result<Self> {
        let mut pipelines = HashMap::with_capacity(Kernel::ALL.len());
        for kernel in Kernel::ALL {
            let source = preprocessor.process(kernel.name())?;

            context.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel.name()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline = context.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.name()),
                layout: None,
                module: &module,
                entry_point: Some(COMPUTE_ENTRY_POINT),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            if let Some(error) = context.device.pop_error_scope().await {
                return Err(SimError::Platform(format!(
                    "failed to compile kernel [{}]: {error}",
                    kernel.name()
                )));
            }

            log::debug!("compiled kernel [{}]", kernel.name());
            pipelines.insert(kernel, pipeline);
        }
        Ok(Self { pipelines })
    }

    pub fn pipeline(&self, kernel: Kernel) -> Option<&wgpu::ComputePipeline> {
        self.pipelines.get(&kernel)
    }
}

/// Compiles a render module under a validation error scope.
pub async fn compile_render_module(
    context: &GpuContext,
    preprocessor: &ShaderPreprocessor,
    name: &str,
) -> Result<wgpu::ShaderModule> {
    let source = preprocessor.process(name)?;
    context.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(error) = context.device.pop_error_scope().await {
        return Err(SimError::Platform(format!("failed to compile shader [{name}]: {error}")));
    }
    Ok(module)
}
