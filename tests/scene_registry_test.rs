mod common;

use cgmath::{Matrix4, Point3, SquareMatrix};
use lumen_ngin::EngineError;
use lumen_ngin::camera::{DirectionsInput, MouseRelativeMovement};
use lumen_ngin::context::{RenderTarget, slot};
use lumen_ngin::data_structures::drawable::Drawable;
use lumen_ngin::data_structures::light::PointLight;
use lumen_ngin::data_structures::scene::Scene;
use lumen_ngin::pipelines;
use lumen_ngin::render::{Renderer, ShadowUniform};
use lumen_ngin::resources::description::SceneDescription;
use lumen_ngin::resources::primitives;

use crate::common::test_utils::{
    HEIGHT, SCENE, WIDTH, demo_scene, headless, initialized, renderer_for, shader_names,
    shadow_target, transposed,
};

#[test]
fn scenes_registered_after_initialize_are_set_up_on_first_render() {
    let (mut renderer, mut ctx) = initialized();
    let mut late = Scene::new("late");
    late.add_renderable(Drawable::renderable("box", primitives::cube()))
        .unwrap();
    renderer.add_scene(late).unwrap();
    renderer.set_main_scene("late").unwrap();
    assert!(!renderer.scene("late").unwrap().is_initialized());

    renderer.render(&mut ctx).unwrap();
    assert!(renderer.scene("late").unwrap().is_initialized());
    let frame = ctx.last_frame().unwrap();
    assert_eq!(frame.draws_to(RenderTarget::BackBuffer).count(), 1);
}

#[test]
fn drawables_added_to_a_live_scene_are_drawn() {
    let (mut renderer, mut ctx) = initialized();
    renderer.render(&mut ctx).unwrap();

    let scene = renderer.scene_mut(SCENE).unwrap();
    scene
        .add_renderable(Drawable::renderable("another", primitives::cube()))
        .unwrap();
    assert!(!scene.is_initialized());
    renderer.render(&mut ctx).unwrap();

    let frame = ctx.last_frame().unwrap();
    assert_eq!(frame.draws_to(RenderTarget::BackBuffer).count(), 5);
    assert!(renderer.scene(SCENE).unwrap().renderables()["another"].is_initialized());
}

#[test]
fn unknown_scenes_are_absent() {
    let (renderer, _) = initialized();
    assert!(renderer.scene("nothing").is_none());
    assert_eq!(renderer.main_scene_name(), Some(SCENE));
    assert_eq!(renderer.scene_count(), 1);
}

#[test]
fn shaders_of_renderables_are_checked_against_the_registry() {
    let (mut renderer, mut ctx) = initialized();
    let err = renderer
        .set_shaders_of_renderable("cube", "toon", "phong")
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownName { kind: "vertex shader", .. }));
    let err = renderer
        .set_shaders_of_renderable("cube", "phong", "toon")
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownName { kind: "pixel shader", .. }));
    let err = renderer
        .set_shaders_of_renderable("sphere", "phong", "phong")
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownName { kind: "renderable", .. }));

    renderer
        .set_shaders_of_renderable("cube", "voxel", "phong")
        .unwrap();
    renderer.render(&mut ctx).unwrap();
    let frame = ctx.last_frame().unwrap();
    let first = frame.draws_to(RenderTarget::BackBuffer).next().unwrap();
    assert_eq!(shader_names(&ctx, first), ("voxel", "phong"));
}

#[test]
fn shaders_registered_late_are_compiled_before_drawing() {
    let (mut renderer, mut ctx) = initialized();
    let (vertex, pixel) = pipelines::builtin_pair("flat", pipelines::PHONG);
    renderer.add_vertex_shader(vertex).unwrap();
    renderer.add_pixel_shader(pixel).unwrap();
    renderer
        .set_shaders_of_renderable("cube", "flat", "flat")
        .unwrap();
    renderer.render(&mut ctx).unwrap();

    let frame = ctx.last_frame().unwrap();
    let first = frame.draws_to(RenderTarget::BackBuffer).next().unwrap();
    assert_eq!(shader_names(&ctx, first), ("flat", "flat"));

    let (vertex, _) = pipelines::phong();
    assert!(matches!(
        renderer.add_vertex_shader(vertex),
        Err(EngineError::DuplicateName { .. })
    ));
}

#[test]
fn render_without_shadow_shaders_fails() {
    let mut ctx = headless();
    let mut renderer = Renderer::new();
    let (vertex, pixel) = pipelines::phong();
    renderer.add_vertex_shader(vertex).unwrap();
    renderer.add_pixel_shader(pixel).unwrap();
    renderer.add_scene(demo_scene()).unwrap();
    renderer.set_main_scene(SCENE).unwrap();
    renderer.initialize(&mut ctx).unwrap();

    assert!(matches!(
        renderer.render(&mut ctx),
        Err(EngineError::MissingShadowShaders)
    ));
    assert!(ctx.frames().is_empty());
}

#[test]
fn device_failures_surface_from_initialize() {
    let mut ctx = headless();
    ctx.fail_creation_after(3);
    let mut renderer = renderer_for(demo_scene());
    assert!(matches!(
        renderer.initialize(&mut ctx),
        Err(EngineError::Device(_))
    ));
    assert!(!renderer.scene(SCENE).unwrap().is_initialized());
}

#[test]
fn light_slots_are_bounded() {
    let (mut renderer, _) = initialized();
    let scene = renderer.scene_mut(SCENE).unwrap();
    let light = PointLight::new(Point3::new(1.0, 2.0, 3.0), [1.0; 4], 10.0);
    assert!(matches!(
        scene.set_point_light(2, light.clone()),
        Err(EngineError::LightIndexOutOfRange { index: 2, count: 2 })
    ));
    scene.set_point_light(1, light).unwrap();
    assert_eq!(scene.point_light(1).unwrap().position(), Point3::new(1.0, 2.0, 3.0));
    assert!(scene.point_light(5).is_err());
}

#[test]
fn lights_replaced_in_a_live_scene_get_a_shadow_projection() {
    let (mut renderer, mut ctx) = initialized();
    renderer.render(&mut ctx).unwrap();

    let scene = renderer.scene_mut(SCENE).unwrap();
    *scene.point_light_mut(0).unwrap() =
        PointLight::new(Point3::new(0.0, 10.0, -10.0), [1.0; 4], 50.0);
    assert!(!scene.is_initialized());
    renderer.render(&mut ctx).unwrap();

    let mut expected = PointLight::new(Point3::new(0.0, 10.0, -10.0), [1.0; 4], 50.0);
    expected.initialize(WIDTH, HEIGHT);
    let light = &renderer.scene(SCENE).unwrap().point_lights()[0];
    assert_ne!(light.projection(), Matrix4::identity());
    assert_eq!(light.projection(), expected.projection());

    let frame = ctx.last_frame().unwrap();
    let draw = frame.draws_to(shadow_target(&renderer)).next().unwrap();
    let constants: ShadowUniform = draw.constant(slot::constant::SHADOW).unwrap();
    assert_eq!(constants.projection, transposed(expected.projection()));
}

#[test]
fn update_drives_drawables_and_camera() {
    let description = SceneDescription::from_json(
        r#"{
            "lights": [{ "position": [0, 5, 0], "color": [1, 1, 1, 1], "attenuation_distance": 20 }],
            "cubes": [{ "name": "spinner", "position": [0, 0, 0], "spin": 1.0 }],
            "voxels": [{ "positions": [[0, 0, 0], [1, 0, 0], [2, 0, 0]] }]
        }"#,
    )
    .unwrap();
    let scene = Scene::from_description("described", &description).unwrap();
    let mut ctx = headless();
    let mut renderer = renderer_for(scene);
    renderer.initialize(&mut ctx).unwrap();

    let eye = renderer.camera().eye();
    let directions = DirectionsInput {
        front: true,
        ..Default::default()
    };
    renderer.handle_input(&directions, &MouseRelativeMovement::default(), 0.1);
    renderer.update(0.5);

    assert!(renderer.camera().eye().z > eye.z);
    let spinner = &renderer.scene("described").unwrap().renderables()["spinner"];
    assert_ne!(spinner.world(), Matrix4::identity());

    renderer.render(&mut ctx).unwrap();
    let frame = ctx.last_frame().unwrap();
    assert!(frame.draws.iter().any(|d| d.instance_count == 3));
}
