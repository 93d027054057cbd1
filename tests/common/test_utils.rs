#![allow(dead_code)]

use cgmath::{Matrix4, Point3, Vector3};
use lumen_ngin::context::record::{DrawCall, RecordingContext};
use lumen_ngin::context::{RenderTarget, ShaderId};
use lumen_ngin::data_structures::drawable::{Drawable, Skinning};
use lumen_ngin::data_structures::instance::Instance;
use lumen_ngin::data_structures::light::PointLight;
use lumen_ngin::data_structures::model::AnimationData;
use lumen_ngin::data_structures::scene::Scene;
use lumen_ngin::data_structures::skeleton::Skeleton;
use lumen_ngin::data_structures::model::Material;
use lumen_ngin::render::Renderer;
use lumen_ngin::resources::primitives;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;
pub const SCENE: &str = "demo";

pub fn headless() -> RecordingContext {
    RecordingContext::new(WIDTH, HEIGHT)
}

pub fn voxel_instances(count: usize) -> Vec<Instance> {
    (0..count)
        .map(|i| Instance::from(Vector3::new(i as f32, 0.0, 0.0)))
        .collect()
}

/// One drawable of every kind: renderable `cube`, voxel `wall`, model `rig`
/// and a sky box, lit by a light above the origin.
pub fn demo_scene() -> Scene {
    let mut scene = Scene::new(SCENE);
    scene
        .add_renderable(
            Drawable::renderable("cube", primitives::cube())
                .with_world(Matrix4::from_translation(Vector3::new(0.0, 1.0, 2.0))),
        )
        .unwrap();
    scene.add_voxel(Drawable::voxel("wall", primitives::cube(), voxel_instances(5)));
    let rig = primitives::cube().with_animation_data(vec![AnimationData::default(); 24]);
    scene
        .add_model(Drawable::model("rig", rig, Skinning::new(Skeleton::default(), Vec::new())))
        .unwrap();
    scene.set_sky_box(Drawable::sky_box("sky", primitives::sky_cube(), Material::default()));
    scene
        .set_point_light(
            0,
            PointLight::new(Point3::new(0.0, 10.0, -5.0), [1.0; 4], 50.0),
        )
        .unwrap();
    scene
}

pub fn renderer_for(scene: Scene) -> Renderer {
    let name = scene.name().to_string();
    let mut renderer = Renderer::new();
    renderer.register_builtin_shaders().unwrap();
    renderer.add_scene(scene).unwrap();
    renderer.set_main_scene(&name).unwrap();
    renderer
}

/// An initialized renderer for [`demo_scene`] and its context.
pub fn initialized() -> (Renderer, RecordingContext) {
    let mut ctx = headless();
    let mut renderer = renderer_for(demo_scene());
    renderer.initialize(&mut ctx).unwrap();
    (renderer, ctx)
}

pub fn shadow_target(renderer: &Renderer) -> RenderTarget {
    renderer.shadow_map().unwrap().render_target().unwrap()
}

pub fn shader_names<'a>(ctx: &'a RecordingContext, draw: &DrawCall) -> (&'a str, &'a str) {
    let (vertex, pixel): (ShaderId, ShaderId) = draw.shaders.unwrap();
    (
        ctx.shader_label(vertex).unwrap(),
        ctx.shader_label(pixel).unwrap(),
    )
}

pub fn transposed(matrix: Matrix4<f32>) -> [[f32; 4]; 4] {
    use cgmath::Matrix;
    matrix.transpose().into()
}
