//! A named collection of drawables and lights.
//!
//! A [`Scene`] owns renderables and models by name, voxels in insertion
//! order, an optional sky box and exactly [`NUM_LIGHTS`] point lights. Light
//! 0 casts the shadow.

use std::collections::HashMap;

use cgmath::{Matrix4, Point3, Rad, Vector3};

use crate::context::GpuContext;
use crate::data_structures::drawable::Drawable;
use crate::data_structures::instance::Instance;
use crate::data_structures::light::{NUM_LIGHTS, PointLight};
use crate::error::{EngineError, Result};
use crate::resources::description::SceneDescription;
use crate::resources::primitives;

#[derive(Debug, Default)]
pub struct Scene {
    name: String,
    renderables: HashMap<String, Drawable>,
    voxels: Vec<Drawable>,
    models: HashMap<String, Drawable>,
    sky_box: Option<Drawable>,
    point_lights: [PointLight; NUM_LIGHTS],
    initialized: bool,
}

impl Scene {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Builds a scene of unit cubes, voxel groups and lights.
    pub fn from_description(name: &str, description: &SceneDescription) -> Result<Self> {
        let mut scene = Self::new(name);
        if description.lights.len() > NUM_LIGHTS {
            return Err(EngineError::LightIndexOutOfRange {
                index: description.lights.len() - 1,
                count: NUM_LIGHTS,
            });
        }
        for (index, light) in description.lights.iter().enumerate() {
            let mut point_light =
                PointLight::new(light.position.into(), light.color, light.attenuation_distance);
            if let Some(speed) = light.orbit_speed {
                point_light = point_light.with_orbit(speed);
            }
            scene.set_point_light(index, point_light)?;
        }
        for cube in &description.cubes {
            let world = Matrix4::from_translation(Vector3::from(cube.position))
                * Matrix4::from_scale(cube.scale);
            let mut drawable = Drawable::renderable(&cube.name, primitives::cube())
                .with_world(world)
                .with_color(cube.color);
            if let Some(speed) = cube.spin {
                drawable = drawable.with_update(move |world, dt| {
                    *world = *world * Matrix4::from_angle_y(Rad(speed * dt));
                });
            }
            scene.add_renderable(drawable)?;
        }
        for (index, voxel) in description.voxels.iter().enumerate() {
            let instances = voxel
                .positions
                .iter()
                .map(|p| Instance::from(Vector3::from(*p)))
                .collect();
            let name = voxel
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-voxel-{}", name, index));
            scene.add_voxel(
                Drawable::voxel(&name, primitives::cube(), instances).with_color(voxel.color),
            );
        }
        log::debug!(
            "built scene `{}` with {} cubes, {} voxel groups",
            name,
            description.cubes.len(),
            description.voxels.len()
        );
        Ok(scene)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_renderable(&mut self, renderable: Drawable) -> Result<()> {
        if self.renderables.contains_key(renderable.name()) {
            return Err(EngineError::DuplicateName {
                kind: "renderable",
                name: renderable.name().to_string(),
            });
        }
        self.initialized &= renderable.is_initialized();
        self.renderables
            .insert(renderable.name().to_string(), renderable);
        Ok(())
    }

    pub fn add_voxel(&mut self, voxel: Drawable) {
        self.initialized &= voxel.is_initialized();
        self.voxels.push(voxel);
    }

    pub fn add_model(&mut self, model: Drawable) -> Result<()> {
        if self.models.contains_key(model.name()) {
            return Err(EngineError::DuplicateName {
                kind: "model",
                name: model.name().to_string(),
            });
        }
        self.initialized &= model.is_initialized();
        self.models.insert(model.name().to_string(), model);
        Ok(())
    }

    pub fn set_sky_box(&mut self, sky_box: Drawable) {
        self.initialized &= sky_box.is_initialized();
        self.sky_box = Some(sky_box);
    }

    pub fn renderables(&self) -> &HashMap<String, Drawable> {
        &self.renderables
    }

    pub fn renderables_mut(&mut self) -> &mut HashMap<String, Drawable> {
        &mut self.renderables
    }

    pub fn renderable_mut(&mut self, name: &str) -> Option<&mut Drawable> {
        self.renderables.get_mut(name)
    }

    pub fn voxels(&self) -> &[Drawable] {
        &self.voxels
    }

    pub fn voxels_mut(&mut self) -> &mut Vec<Drawable> {
        &mut self.voxels
    }

    pub fn models(&self) -> &HashMap<String, Drawable> {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut HashMap<String, Drawable> {
        &mut self.models
    }

    pub fn sky_box(&self) -> Option<&Drawable> {
        self.sky_box.as_ref()
    }

    pub fn sky_box_mut(&mut self) -> Option<&mut Drawable> {
        self.sky_box.as_mut()
    }

    pub fn point_lights(&self) -> &[PointLight; NUM_LIGHTS] {
        &self.point_lights
    }

    pub fn point_light(&self, index: usize) -> Result<&PointLight> {
        self.point_lights
            .get(index)
            .ok_or(EngineError::LightIndexOutOfRange {
                index,
                count: NUM_LIGHTS,
            })
    }

    /// Mutable access to light `index`. The scene is marked for
    /// initialization so a replaced light gets its shadow projection.
    pub fn point_light_mut(&mut self, index: usize) -> Result<&mut PointLight> {
        let light = self
            .point_lights
            .get_mut(index)
            .ok_or(EngineError::LightIndexOutOfRange {
                index,
                count: NUM_LIGHTS,
            })?;
        self.initialized = false;
        Ok(light)
    }

    pub fn set_point_light(&mut self, index: usize, light: PointLight) -> Result<()> {
        *self.point_light_mut(index)? = light;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Every drawable in draw order: renderables by name, voxels, models by
    /// name, then the sky box.
    pub fn drawables_mut(&mut self) -> Vec<&mut Drawable> {
        let mut renderables: Vec<_> = self.renderables.iter_mut().collect();
        renderables.sort_by(|a, b| a.0.cmp(b.0));
        let mut models: Vec<_> = self.models.iter_mut().collect();
        models.sort_by(|a, b| a.0.cmp(b.0));

        renderables
            .into_iter()
            .map(|(_, d)| d)
            .chain(self.voxels.iter_mut())
            .chain(models.into_iter().map(|(_, d)| d))
            .chain(self.sky_box.iter_mut())
            .collect()
    }

    /// Initializes every drawable and light. Stops at the first failure.
    /// Already initialized drawables are left alone, so calling this again
    /// after adding objects only sets up the new ones.
    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        for drawable in self.drawables_mut() {
            drawable.initialize(ctx)?;
        }
        let (width, height) = ctx.surface_size();
        for light in &mut self.point_lights {
            light.initialize(width, height);
        }
        self.initialized = true;
        log::debug!("initialized scene `{}`", self.name);
        Ok(())
    }

    pub fn update(&mut self, delta_time: f32) {
        for drawable in self.drawables_mut() {
            drawable.update(delta_time);
        }
        for light in &mut self.point_lights {
            light.update(delta_time);
        }
    }

    /// Position of the shadow-casting light.
    pub fn shadow_caster(&self) -> Point3<f32> {
        self.point_lights[0].position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record::RecordingContext;
    use crate::data_structures::model::Material;
    use crate::resources::description::{CubeDescription, LightDescription, VoxelDescription};

    fn cube(name: &str) -> Drawable {
        Drawable::renderable(name, primitives::cube())
    }

    #[test]
    fn renderable_names_are_unique() {
        let mut scene = Scene::new("main");
        scene.add_renderable(cube("a").with_color([1.0, 0.0, 0.0, 1.0])).unwrap();
        let err = scene.add_renderable(cube("a")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName { kind: "renderable", .. }));
        assert_eq!(scene.renderables().len(), 1);
        assert_eq!(scene.renderables()["a"].output_color(), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn light_index_is_bounds_checked() {
        let mut scene = Scene::new("main");
        let light = PointLight::new(Point3::new(1.0, 2.0, 3.0), [1.0; 4], 10.0);
        scene.set_point_light(1, light.clone()).unwrap();
        assert_eq!(scene.point_light(1).unwrap(), &light);
        assert!(matches!(
            scene.set_point_light(NUM_LIGHTS, light),
            Err(EngineError::LightIndexOutOfRange { index: 2, count: 2 })
        ));
        assert!(scene.point_light(NUM_LIGHTS).is_err());
    }

    #[test]
    fn initialize_cascades_and_is_repeatable() {
        let mut ctx = RecordingContext::new(640, 480);
        let mut scene = Scene::new("main");
        scene.add_renderable(cube("a")).unwrap();
        scene.add_voxel(Drawable::voxel("v", primitives::cube(), vec![Instance::new(); 4]));
        scene.initialize(&mut ctx).unwrap();
        assert!(scene.is_initialized());
        let created = ctx.buffer_count();

        scene.add_renderable(cube("b")).unwrap();
        assert!(!scene.is_initialized());
        scene.initialize(&mut ctx).unwrap();
        assert!(scene.renderables()["b"].is_initialized());
        // only the new cube allocated buffers
        assert_eq!(ctx.buffer_count() - created, 5);
    }

    #[test]
    fn initialize_stops_at_first_failure() {
        let mut ctx = RecordingContext::new(640, 480);
        ctx.fail_creation_after(0);
        let mut scene = Scene::new("main");
        scene.add_renderable(cube("a")).unwrap();
        assert!(scene.initialize(&mut ctx).is_err());
        assert!(!scene.is_initialized());
    }

    #[test]
    fn drawables_come_in_draw_order() {
        let mut scene = Scene::new("main");
        scene.set_sky_box(Drawable::sky_box("sky", primitives::sky_cube(), Material::default()));
        scene.add_renderable(cube("b")).unwrap();
        scene.add_renderable(cube("a")).unwrap();
        scene.add_voxel(Drawable::voxel("v", primitives::cube(), Vec::new()));
        let names: Vec<_> = scene
            .drawables_mut()
            .into_iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "v", "sky"]);
    }

    #[test]
    fn update_reaches_drawables_and_lights() {
        let mut scene = Scene::new("main");
        scene
            .add_renderable(cube("a").with_update(|world, dt| {
                *world = Matrix4::from_translation(Vector3::new(0.0, dt, 0.0));
            }))
            .unwrap();
        scene
            .set_point_light(
                0,
                PointLight::new(Point3::new(5.0, 0.0, 0.0), [1.0; 4], 10.0).with_orbit(1.0),
            )
            .unwrap();
        scene.update(0.5);
        assert_eq!(scene.renderables()["a"].world().w.y, 0.5);
        assert_ne!(scene.shadow_caster(), Point3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn builds_from_description() {
        let description = SceneDescription {
            lights: vec![LightDescription {
                position: [0.0, 10.0, -10.0],
                color: [1.0; 4],
                attenuation_distance: 40.0,
                orbit_speed: None,
            }],
            cubes: vec![CubeDescription {
                name: "center".into(),
                position: [0.0, 1.0, 0.0],
                scale: 2.0,
                color: [1.0; 4],
                spin: Some(1.0),
            }],
            voxels: vec![VoxelDescription {
                name: None,
                color: [0.2, 0.8, 0.2, 1.0],
                positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            }],
        };
        let scene = Scene::from_description("demo", &description).unwrap();
        assert_eq!(scene.voxels()[0].num_instances(), 2);
        assert_eq!(scene.voxels()[0].name(), "demo-voxel-0");
        assert_eq!(scene.renderables()["center"].world().w.y, 1.0);
        assert_eq!(scene.point_light(0).unwrap().attenuation_distance(), 40.0);
    }

    #[test]
    fn too_many_described_lights_fail() {
        let light = LightDescription {
            position: [0.0; 3],
            color: [1.0; 4],
            attenuation_distance: 1.0,
            orbit_speed: None,
        };
        let description = SceneDescription {
            lights: vec![light; NUM_LIGHTS + 1],
            ..Default::default()
        };
        assert!(Scene::from_description("demo", &description).is_err());
    }
}
