//! JSON scene descriptions.
//!
//! ```json
//! {
//!   "lights": [{ "position": [0, 10, -10], "color": [1, 1, 1, 1], "attenuation_distance": 40 }],
//!   "cubes": [{ "name": "center", "position": [0, 1, 0], "spin": 1.0 }],
//!   "voxels": [{ "color": [0.2, 0.8, 0.2, 1], "positions": [[0, 0, 0], [1, 0, 0]] }]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::resources::load_string;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightDescription {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub attenuation_distance: f32,
    /// Radians per second around the world Y axis.
    #[serde(default)]
    pub orbit_speed: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeDescription {
    pub name: String,
    pub position: [f32; 3],
    #[serde(default = "unit")]
    pub scale: f32,
    #[serde(default = "white")]
    pub color: [f32; 4],
    /// Radians per second around the cube's own Y axis.
    #[serde(default)]
    pub spin: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelDescription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "white")]
    pub color: [f32; 4],
    pub positions: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescription {
    pub lights: Vec<LightDescription>,
    pub cubes: Vec<CubeDescription>,
    pub voxels: Vec<VoxelDescription>,
}

fn unit() -> f32 {
    1.0
}

fn white() -> [f32; 4] {
    [1.0; 4]
}

impl SceneDescription {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Reads a scene description from the assets directory.
pub async fn load_scene_description(file_name: &str) -> anyhow::Result<SceneDescription> {
    let json = load_string(file_name).await?;
    SceneDescription::from_json(&json)
        .map_err(|e| e.context(format!("parsing scene description `{}`", file_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_in_defaults() {
        let description = SceneDescription::from_json(
            r#"{
                "cubes": [{ "name": "c", "position": [1, 2, 3] }],
                "voxels": [{ "positions": [[0, 0, 0]] }]
            }"#,
        )
        .unwrap();
        assert!(description.lights.is_empty());
        assert_eq!(description.cubes[0].scale, 1.0);
        assert_eq!(description.cubes[0].color, [1.0; 4]);
        assert_eq!(description.cubes[0].spin, None);
        assert_eq!(description.voxels[0].name, None);
    }

    #[test]
    fn rejects_missing_fields() {
        let err = SceneDescription::from_json(r#"{ "lights": [{ "position": [0, 0, 0] }] }"#);
        assert!(err.is_err());
    }
}
