//! Spinning cubes over a voxel floor, lit by two point lights with the first
//! one casting shadows.
//!
//! ```sh
//! cargo run --example cubes
//! # with an obj model from ./assets
//! cargo run --example cubes -- teapot.obj
//! ```

use std::sync::Arc;

use cgmath::{Point3, Vector3};
use lumen_ngin::camera::Camera;
use lumen_ngin::data_structures::drawable::Drawable;
use lumen_ngin::data_structures::instance::Instance;
use lumen_ngin::data_structures::model::Material;
use lumen_ngin::data_structures::scene::Scene;
use lumen_ngin::data_structures::texture::Texture;
use lumen_ngin::flow::{self, WindowConfig};
use lumen_ngin::render::Renderer;
use lumen_ngin::resources::description::SceneDescription;
use lumen_ngin::resources::{load_model_obj, primitives};

const SCENE: &str = r#"{
    "lights": [
        { "position": [4, 8, -4], "color": [1, 0.95, 0.9, 1], "attenuation_distance": 40, "orbit_speed": 0.3 },
        { "position": [-6, 4, 6], "color": [0.3, 0.3, 0.5, 1], "attenuation_distance": 25 }
    ],
    "cubes": [
        { "name": "center", "position": [0, 1, 0], "spin": 1.0 },
        { "name": "left", "position": [-3, 0.5, 1], "color": [0.9, 0.3, 0.3, 1], "spin": -0.5 },
        { "name": "tall", "position": [3, 1.5, 2], "scale": 2, "color": [0.3, 0.4, 0.9, 1] }
    ]
}"#;

fn floor() -> Drawable {
    let instances = (-10..10)
        .flat_map(|x| (-10..10).map(move |z| Instance::from(Vector3::new(x as f32, -0.5, z as f32))))
        .collect();
    Drawable::voxel("floor", primitives::cube(), instances).with_color([0.35, 0.6, 0.35, 1.0])
}

fn sky() -> Drawable {
    let texture = Arc::new(Texture::solid("sky", [70, 110, 170, 255]));
    Drawable::sky_box("sky", primitives::sky_cube(), Material::new("sky", Some(texture), None))
}

async fn setup(model: Option<String>) -> anyhow::Result<Renderer> {
    let description = SceneDescription::from_json(SCENE)?;
    let mut scene = Scene::from_description("cubes", &description)?;
    scene.add_voxel(floor());
    scene.set_sky_box(sky());
    if let Some(file_name) = model {
        scene.add_renderable(load_model_obj(&file_name).await?)?;
    }

    let mut renderer = Renderer::new().with_camera(Camera::new(Point3::new(0.0, 3.0, -10.0)));
    renderer.register_builtin_shaders()?;
    renderer.add_scene(scene)?;
    renderer.set_main_scene("cubes")?;
    Ok(renderer)
}

fn main() -> anyhow::Result<()> {
    let model = std::env::args().nth(1);
    flow::run(
        WindowConfig {
            title: "cubes".to_string(),
            ..Default::default()
        },
        setup(model),
    )
}
