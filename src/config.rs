use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::layout::Values;

// Dispatch sizes shared with the kernels through the `DispatchSizes` insert
pub const PARTICLE_DISPATCH_SIZE: u32 = 64;
pub const GRID_DISPATCH_SIZE: u32 = 8;
pub const BUKKIT_SIZE: u32 = 6;
pub const BUKKIT_HALO_SIZE: u32 = 1;

/// Width of the border of grid cells particles are kept out of.
pub const GUARDIAN_SIZE: u32 = 3;

/// Words per particle record, must match `MPMParticle` in `particle.inc.wgsl`.
pub const PARTICLE_WORDS: u64 = 16;

pub const DEFAULT_MAX_PARTICLE_COUNT: u32 = 1_000_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThrottlePolicy {
    /// Log sustained overruns and keep the substep cap.
    WarnOnly,
    /// Halve the substep cap at every throttle event, restored on reset.
    HalveCap,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum MouseFunction {
    Push = 0,
    Grab = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum Material {
    Liquid = 0,
    Elastic = 1,
    Sand = 2,
    Visco = 3,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum ShapeType {
    Box = 0,
    Circle = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum ShapeFunction {
    Emit = 0,
    Collider = 1,
    Drain = 2,
    InitialEmit = 3,
}

impl TryFrom<u32> for ShapeType {
    type Error = SimError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ShapeType::Box),
            1 => Ok(ShapeType::Circle),
            other => Err(SimError::Configuration(format!("unknown shape type {other}"))),
        }
    }
}

impl TryFrom<u32> for ShapeFunction {
    type Error = SimError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ShapeFunction::Emit),
            1 => Ok(ShapeFunction::Collider),
            2 => Ok(ShapeFunction::Drain),
            3 => Ok(ShapeFunction::InitialEmit),
            other => Err(SimError::Configuration(format!("unknown shape function {other}"))),
        }
    }
}

/// Every tunable of the simulation. Field names serialize in camelCase so a
/// scene's settings map can override them by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimSettings {
    pub sim_rate: u32,
    pub iteration_count: u32,
    pub sim_res_divisor: u32,
    pub particles_per_cell_axis: u32,
    pub use_grid_volume_for_liquid: bool,
    pub fixed_point_multiplier_exponent: u32,
    pub gravity_strength: f32,
    pub liquid_viscosity: f32,
    pub mouse_function: u32,
    pub elasticity_ratio: f32,
    pub liquid_relaxation: f32,
    pub elastic_relaxation: f32,
    pub friction_angle: f32,
    pub plasticity: f32,
    pub render_mode: u32,
    pub mouse_radius: f32,
    pub max_particle_count: u32,
    pub substep_cap: u32,
    pub throttle_policy: ThrottlePolicy,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            sim_rate: 480,
            iteration_count: 2,
            sim_res_divisor: 8,
            particles_per_cell_axis: 2,
            use_grid_volume_for_liquid: true,
            fixed_point_multiplier_exponent: 7,
            gravity_strength: 2.5,
            liquid_viscosity: 0.01,
            mouse_function: MouseFunction::Grab as u32,
            elasticity_ratio: 1.0,
            liquid_relaxation: 2.0,
            elastic_relaxation: 1.5,
            friction_angle: 30.0,
            plasticity: 0.0,
            render_mode: 0,
            mouse_radius: 100.0,
            max_particle_count: DEFAULT_MAX_PARTICLE_COUNT,
            substep_cap: 100,
            throttle_policy: ThrottlePolicy::WarnOnly,
        }
    }
}

impl SimSettings {
    /// Grid resolution for a render target of the given pixel size.
    pub fn grid_size(&self, resolution: [u32; 2]) -> [u32; 2] {
        let divisor = self.sim_res_divisor.max(1);
        [
            (resolution[0] / divisor).max(1),
            (resolution[1] / divisor).max(1),
        ]
    }

    pub fn fixed_point_multiplier(&self) -> u32 {
        10f64.powi(self.fixed_point_multiplier_exponent as i32).ceil() as u32
    }

    pub fn validate(&self) -> Result<()> {
        if self.sim_rate == 0 {
            return Err(SimError::Configuration("simRate must be positive".into()));
        }
        if self.iteration_count == 0 {
            return Err(SimError::Configuration("iterationCount must be positive".into()));
        }
        if self.max_particle_count == 0 {
            return Err(SimError::Configuration("maxParticleCount must be positive".into()));
        }
        if self.substep_cap == 0 {
            return Err(SimError::Configuration("substepCap must be positive".into()));
        }
        if self.fixed_point_multiplier_exponent > 9 {
            // 10^10 no longer fits the u32 the kernels read
            return Err(SimError::Configuration(
                "fixedPointMultiplierExponent must be at most 9".into(),
            ));
        }
        Ok(())
    }

    /// Overrides settings by name from a loosely typed map. Numeric strings
    /// are accepted where numbers are expected.
    pub fn apply_overrides(&mut self, overrides: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let mut merged = serde_json::to_value(&*self)?;
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in overrides {
                if !target.contains_key(key) {
                    log::warn!("ignoring unknown setting [{key}]");
                    continue;
                }
                target.insert(key.clone(), normalize_setting(value));
            }
        }
        *self = serde_json::from_value(merged)?;
        Ok(())
    }

    /// The layer of `SimConstants` values that come straight from settings.
    pub fn constants_layer(&self) -> Values {
        Values::new()
            .with("mouseFunction", self.mouse_function as f32)
            .with("elasticityRatio", self.elasticity_ratio)
            .with("gravityStrength", self.gravity_strength)
            .with("liquidRelaxation", self.liquid_relaxation)
            .with("elasticRelaxation", self.elastic_relaxation)
            .with("liquidViscosity", self.liquid_viscosity)
            .with("useGridVolumeForLiquid", u32::from(self.use_grid_volume_for_liquid))
            .with("particlesPerCellAxis", self.particles_per_cell_axis)
            .with("frictionAngle", self.friction_angle)
            .with("plasticity", self.plasticity)
            .with("iterationCount", self.iteration_count)
    }
}

fn normalize_setting(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(text) => {
            if let Ok(int) = text.parse::<u64>() {
                serde_json::Value::from(int)
            } else if let Ok(float) = text.parse::<f64>() {
                serde_json::Value::from(float)
            } else if let Ok(flag) = text.parse::<bool>() {
                serde_json::Value::from(flag)
            } else {
                value.clone()
            }
        }
        _ => value.clone(),
    }
}

fn enum_block(entries: &[(&str, u32)]) -> String {
    entries
        .iter()
        .map(|(name, value)| format!("const {name} = {value}u;\n"))
        .collect()
}

/// Text for the `SimEnums` insert.
pub fn sim_enums_text() -> String {
    enum_block(&[
        ("MouseFunctionPush", MouseFunction::Push as u32),
        ("MouseFunctionGrab", MouseFunction::Grab as u32),
        ("MaterialLiquid", Material::Liquid as u32),
        ("MaterialElastic", Material::Elastic as u32),
        ("MaterialSand", Material::Sand as u32),
        ("MaterialVisco", Material::Visco as u32),
        ("GuardianSize", GUARDIAN_SIZE),
        ("ShapeTypeBox", ShapeType::Box as u32),
        ("ShapeTypeCircle", ShapeType::Circle as u32),
        ("ShapeFunctionEmit", ShapeFunction::Emit as u32),
        ("ShapeFunctionCollider", ShapeFunction::Collider as u32),
        ("ShapeFunctionDrain", ShapeFunction::Drain as u32),
        ("ShapeFunctionInitialEmit", ShapeFunction::InitialEmit as u32),
    ])
}

/// Text for the `RenderEnums` insert.
pub fn render_enums_text() -> String {
    enum_block(&[
        ("RenderModeStandard", 0),
        ("RenderModeCompression", 1),
        ("RenderModeVelocity", 2),
        ("MaterialLiquid", Material::Liquid as u32),
        ("MaterialElastic", Material::Elastic as u32),
        ("MaterialSand", Material::Sand as u32),
        ("MaterialVisco", Material::Visco as u32),
    ])
}

/// Text for the `DispatchSizes` insert.
pub fn dispatch_sizes_text() -> String {
    enum_block(&[
        ("ParticleDispatchSize", PARTICLE_DISPATCH_SIZE),
        ("GridDispatchSize", GRID_DISPATCH_SIZE),
        ("BukkitSize", BUKKIT_SIZE),
        ("BukkitHaloSize", BUKKIT_HALO_SIZE),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_accept_numeric_strings() {
        let mut settings = SimSettings::default();
        let overrides = serde_json::json!({
            "simRate": "120",
            "gravityStrength": 1.25,
            "useGridVolumeForLiquid": "false",
            "unknownThing": 3
        });
        settings
            .apply_overrides(overrides.as_object().unwrap())
            .unwrap();

        assert_eq!(settings.sim_rate, 120);
        assert_eq!(settings.gravity_strength, 1.25);
        assert!(!settings.use_grid_volume_for_liquid);
        assert_eq!(settings.iteration_count, 2);
    }

    #[test]
    fn grid_size_follows_divisor() {
        let settings = SimSettings::default();
        assert_eq!(settings.grid_size([1024, 768]), [128, 96]);
    }

    #[test]
    fn fixed_point_multiplier_is_power_of_ten() {
        let settings = SimSettings::default();
        assert_eq!(settings.fixed_point_multiplier(), 10_000_000);
    }

    #[test]
    fn validate_rejects_zero_rate() {
        let settings = SimSettings {
            sim_rate: 0,
            ..SimSettings::default()
        };
        assert!(matches!(settings.validate(), Err(SimError::Configuration(_))));
    }

    #[test]
    fn enum_blocks_are_wgsl_constants() {
        let text = dispatch_sizes_text();
        assert!(text.contains("const ParticleDispatchSize = 64u;\n"));
        assert!(text.contains("const BukkitSize = 6u;\n"));
    }
}
