//! Shapes placed in the scene: emitters, colliders and drains.
//!
//! Shapes are authored in window pixels with y pointing down and converted
//! to grid units with y pointing up when the shape buffer is packed.

use glam::Vec2;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{ShapeFunction, ShapeType};
use crate::error::Result;
use crate::layout::{FieldType, LayoutMode, PackedWords, StructLayout, Values};

/// Accepts numbers written either as JSON numbers or as numeric strings.
fn lenient_f32<'de, D>(deserializer: D) -> std::result::Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Value(f64),
        Text(String),
    }

    match Number::deserialize(deserializer)? {
        Number::Value(value) => Ok(value as f32),
        Number::Text(text) => text
            .trim()
            .parse::<f32>()
            .map_err(|err| serde::de::Error::custom(format!("invalid number [{text}]: {err}"))),
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_f32(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(serde::de::Error::custom(format!("expected a whole number, got {value}")));
    }
    Ok(value as u32)
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    #[serde(deserialize_with = "lenient_f32")]
    pub x: f32,
    #[serde(deserialize_with = "lenient_f32")]
    pub y: f32,
}

impl From<Point> for Vec2 {
    fn from(point: Point) -> Self {
        Vec2::new(point.x, point.y)
    }
}

impl From<Vec2> for Point {
    fn from(value: Vec2) -> Self {
        Point { x: value.x, y: value.y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    #[serde(default)]
    pub id: String,
    pub position: Point,
    #[serde(default)]
    pub half_size: Point,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub radius: f32,
    /// Degrees, counter clockwise in grid space.
    #[serde(default, deserialize_with = "lenient_f32")]
    pub rotation: f32,
    #[serde(deserialize_with = "lenient_u32")]
    pub shape: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub function: u32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub emit_material: f32,
    /// Particles per cell per simulated second.
    #[serde(default, deserialize_with = "lenient_f32")]
    pub emission_rate: f32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub emission_speed: f32,
}

impl Shape {
    pub fn shape_type(&self) -> Result<ShapeType> {
        ShapeType::try_from(self.shape)
    }

    pub fn function(&self) -> Result<ShapeFunction> {
        ShapeFunction::try_from(self.function)
    }

    /// Scales position and size by `scale` per axis and lengths by `length_scale`.
    pub fn rescaled(&self, scale: Vec2, length_scale: f32) -> Shape {
        Shape {
            position: (Vec2::from(self.position) * scale).into(),
            half_size: (Vec2::from(self.half_size) * length_scale).into(),
            radius: self.radius * length_scale,
            ..self.clone()
        }
    }

    /// Grid space record for the shape buffer.
    fn grid_values(&self, sim_res_divisor: u32, grid_height: u32) -> Result<Values> {
        let render_to_sim = 1.0 / sim_res_divisor.max(1) as f32;
        let mut position = Vec2::from(self.position) * render_to_sim;
        position.y = grid_height as f32 - position.y;

        let (half_size, radius) = match self.shape_type()? {
            ShapeType::Circle => (Vec2::ZERO, self.radius * render_to_sim),
            ShapeType::Box => (Vec2::from(self.half_size) * render_to_sim, 0.0),
        };
        let function = self.function()?;

        Ok(Values::new()
            .with("position", position)
            .with("halfSize", half_size)
            .with("radius", radius)
            .with("rotation", self.rotation)
            .with("functionality", function as u32 as f32)
            .with("shapeType", self.shape as f32)
            .with("emitMaterial", self.emit_material)
            .with("emissionRate", self.emission_rate)
            .with("emissionSpeed", self.emission_speed))
    }
}

/// The `SimShape` storage record.
pub fn shape_layout() -> Result<StructLayout> {
    let mut layout = StructLayout::new("SimShape", LayoutMode::Storage);
    layout.add("position", FieldType::Vec2F)?;
    layout.add("halfSize", FieldType::Vec2F)?;
    layout.add("radius", FieldType::F32)?;
    layout.add("rotation", FieldType::F32)?;
    layout.add("functionality", FieldType::F32)?;
    layout.add("shapeType", FieldType::F32)?;
    layout.add("emitMaterial", FieldType::F32)?;
    layout.add("emissionRate", FieldType::F32)?;
    layout.add("emissionSpeed", FieldType::F32)?;
    // Rounds the record to the 8 byte alignment of its vec2f fields
    layout.add_padding()?;
    layout.compile()?;
    Ok(layout)
}

/// Packs `shapes` into grid space records. An empty scene still packs one
/// zeroed record so the shape binding is never empty; kernels read only
/// `shapeCount` records.
pub fn pack_shapes(layout: &StructLayout, shapes: &[Shape], sim_res_divisor: u32, grid_height: u32) -> Result<PackedWords> {
    if shapes.is_empty() {
        return layout.pack_many(&[Values::new()
            .with("position", [0.0f32, 0.0])
            .with("halfSize", [0.0f32, 0.0])
            .with("radius", 0.0f32)
            .with("rotation", 0.0f32)
            .with("functionality", ShapeFunction::Collider as u32 as f32)
            .with("shapeType", ShapeType::Box as u32 as f32)
            .with("emitMaterial", 0.0f32)
            .with("emissionRate", 0.0f32)
            .with("emissionSpeed", 0.0f32)]);
    }
    let records = shapes
        .iter()
        .map(|shape| shape.grid_values(sim_res_divisor, grid_height))
        .collect::<Result<Vec<_>>>()?;
    layout.pack_many(&records)
}

/// Fractional bits of the per substep emission amount.
const EMISSION_FRACTION_BITS: u32 = 16;

/// Particles an `Emit` shape adds to each covered cell on substep
/// `sim_frame`, computed as `emissionsThisSubstep` in `particleEmit.wgsl`
/// does. Over `K` substeps from frame 0 the counts sum to
/// `floor(K * rate * delta_time)` up to the 16.16 quantization of the amount.
pub fn emissions_for_substep(sim_frame: u32, rate: f32, delta_time: f32) -> u32 {
    let one = (1u32 << EMISSION_FRACTION_BITS) as f32;
    let amount = ((rate * delta_time).max(0.0) * one).round() as u32;
    let mask = (1u32 << EMISSION_FRACTION_BITS) - 1;
    let carried = sim_frame.wrapping_mul(amount) & mask;
    (carried + amount) >> EMISSION_FRACTION_BITS
}
