//! Saved scenes: a list of shapes authored at some window resolution and,
//! from version 2 on, a map of setting overrides.

use std::path::Path;

use glam::Vec2;
use serde::Deserialize;

use crate::config::SimSettings;
use crate::error::{Result, SimError};
use crate::simulation::shapes::Shape;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneDocument {
    version: u32,
    resolution: [f32; 2],
    #[serde(default)]
    shapes: Vec<Shape>,
    #[serde(default)]
    settings: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// Shapes rescaled to the resolution the scene was loaded at.
    pub shapes: Vec<Shape>,
    pub settings_overrides: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Scene {
    pub fn load(path: &Path, current_resolution: [u32; 2]) -> Result<Scene> {
        let text = std::fs::read_to_string(path)?;
        let scene = Scene::parse(&text, current_resolution)?;
        log::info!("loaded {} shapes from {}", scene.shapes.len(), path.display());
        Ok(scene)
    }

    pub fn parse(text: &str, current_resolution: [u32; 2]) -> Result<Scene> {
        let document: SceneDocument = serde_json::from_str(text)?;

        let settings_overrides = match document.version {
            1 => {
                if document.settings.is_some() {
                    log::warn!("version 1 scenes carry no settings, ignoring them");
                }
                None
            }
            2 => document.settings,
            other => {
                return Err(SimError::Configuration(format!("unsupported scene version {other}")));
            }
        };

        let [saved_width, saved_height] = document.resolution;
        if saved_width <= 0.0 || saved_height <= 0.0 {
            return Err(SimError::Configuration(format!(
                "scene resolution {saved_width}x{saved_height} is not positive"
            )));
        }

        let scale = Vec2::new(
            current_resolution[0] as f32 / saved_width,
            current_resolution[1] as f32 / saved_height,
        );
        let length_scale = (scale.x * scale.y).sqrt();

        Ok(Scene {
            shapes: document
                .shapes
                .iter()
                .map(|shape| shape.rescaled(scale, length_scale))
                .collect(),
            settings_overrides,
        })
    }

    pub fn apply_settings(&self, settings: &mut SimSettings) -> Result<()> {
        if let Some(overrides) = &self.settings_overrides {
            settings.apply_overrides(overrides)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2_SCENE: &str = r#"{
        "version": 2,
        "resolution": [500, 400],
        "shapes": [
            {"id": "a", "position": {"x": 100, "y": 200}, "halfSize": {"x": 10, "y": 20},
             "radius": 0, "rotation": 0, "shape": 0, "function": 1}
        ],
        "settings": {"simRate": "240", "gravityStrength": 1}
    }"#;

    #[test]
    fn positions_scale_per_axis_and_lengths_by_geometric_mean() {
        let scene = Scene::parse(V2_SCENE, [1000, 1600]).unwrap();
        let shape = &scene.shapes[0];
        assert_eq!(shape.position.x, 200.0);
        assert_eq!(shape.position.y, 800.0);
        // sqrt(2 * 4) = 2.828...
        assert!((shape.half_size.x - 10.0 * 8f32.sqrt()).abs() < 1e-4);
        assert!((shape.half_size.y - 20.0 * 8f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn version_two_settings_override_defaults() {
        let scene = Scene::parse(V2_SCENE, [500, 400]).unwrap();
        let mut settings = SimSettings::default();
        scene.apply_settings(&mut settings).unwrap();
        assert_eq!(settings.sim_rate, 240);
        assert_eq!(settings.gravity_strength, 1.0);
    }

    #[test]
    fn version_one_ignores_settings() {
        let text = V2_SCENE.replace("\"version\": 2", "\"version\": 1");
        let scene = Scene::parse(&text, [500, 400]).unwrap();
        assert!(scene.settings_overrides.is_none());
        assert_eq!(scene.shapes.len(), 1);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let text = V2_SCENE.replace("\"version\": 2", "\"version\": 3");
        assert!(matches!(
            Scene::parse(&text, [500, 400]),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            Scene::parse("{\"version\": 2", [500, 400]),
            Err(SimError::SceneParse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Scene::load(Path::new("/nonexistent/scene.json"), [500, 400]),
            Err(SimError::SceneIo(_))
        ));
    }
}
