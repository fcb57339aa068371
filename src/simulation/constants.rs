use glam::Vec2;

use crate::error::Result;
use crate::layout::{FieldType, LayoutMode, StructLayout};

/// The `SimConstants` uniform read by every simulation kernel.
pub fn sim_constants_layout() -> Result<StructLayout> {
    let mut layout = StructLayout::new("SimConstants", LayoutMode::Uniform);
    layout.add("gridSize", FieldType::Vec2U)?;
    layout.add("deltaTime", FieldType::F32)?;
    layout.add("mouseActivation", FieldType::F32)?;
    layout.add("mousePosition", FieldType::Vec2F)?;
    layout.add("mouseVelocity", FieldType::Vec2F)?;
    layout.add("mouseFunction", FieldType::F32)?;
    layout.add("elasticityRatio", FieldType::F32)?;
    layout.add("gravityStrength", FieldType::F32)?;
    layout.add("liquidRelaxation", FieldType::F32)?;
    layout.add("elasticRelaxation", FieldType::F32)?;
    layout.add("liquidViscosity", FieldType::F32)?;
    layout.add("fixedPointMultiplier", FieldType::U32)?;
    layout.add("useGridVolumeForLiquid", FieldType::U32)?;
    layout.add("particlesPerCellAxis", FieldType::U32)?;
    layout.add("frictionAngle", FieldType::F32)?;
    layout.add("plasticity", FieldType::F32)?;
    layout.add("mouseRadius", FieldType::F32)?;
    layout.add("shapeCount", FieldType::U32)?;
    layout.add("simFrame", FieldType::U32)?;
    layout.add("bukkitCount", FieldType::U32)?;
    layout.add("bukkitCountX", FieldType::U32)?;
    layout.add("bukkitCountY", FieldType::U32)?;
    layout.add("iteration", FieldType::U32)?;
    layout.add("iterationCount", FieldType::U32)?;
    layout.add("maxParticleCount", FieldType::U32)?;
    layout.compile()?;
    Ok(layout)
}

/// Pointer state in window pixels, y pointing down.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct MouseInput {
    pub position: Vec2,
    pub previous_position: Vec2,
    pub is_down: bool,
}

/// Everything the host loop gathers for one frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameInputs {
    pub now_ms: f64,
    pub do_pause: bool,
    pub do_reset: bool,
    /// Render target size in pixels.
    pub resolution: [u32; 2],
    pub mouse: MouseInput,
}

/// Mouse state in grid units, as the kernels consume it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GridMouse {
    pub activation: f32,
    pub position: Vec2,
    pub velocity: Vec2,
}

fn to_grid(pixel: Vec2, resolution: [u32; 2], grid_size: [u32; 2]) -> Vec2 {
    let resolution = Vec2::new(resolution[0].max(1) as f32, resolution[1].max(1) as f32);
    let grid = Vec2::new(grid_size[0] as f32, grid_size[1] as f32);
    Vec2::new(
        grid.x * (pixel.x / resolution.x),
        grid.y * (1.0 - pixel.y / resolution.y),
    )
}

/// Converts pointer input to grid space. Velocity is the grid space
/// displacement since the previous frame over the render time step.
pub fn grid_mouse(
    mouse: &MouseInput,
    resolution: [u32; 2],
    grid_size: [u32; 2],
    sim_rate: u32,
    render_time_step: f32,
) -> GridMouse {
    let activation = if mouse.is_down {
        500.0 / sim_rate.max(1) as f32 * (grid_size[0] as f32 / 128.0)
    } else {
        0.0
    };
    let position = to_grid(mouse.position, resolution, grid_size);
    let previous = to_grid(mouse.previous_position, resolution, grid_size);
    let velocity = if render_time_step > 0.0 {
        (position - previous) / render_time_step
    } else {
        Vec2::ZERO
    };
    GridMouse {
        activation,
        position,
        velocity,
    }
}
