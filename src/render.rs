//! Frame orchestration.
//!
//! The [`Renderer`] owns the scene registry, the camera, the shader registry
//! and the per-frame GPU state. Each call to [`Renderer::render`] records two
//! passes on the context and presents:
//!
//! 1. the shadow pass draws renderables, voxels and models from light 0 into
//!    the shadow map, always with the shadow shader pair;
//! 2. the main pass draws renderables, voxels, models and finally the sky box
//!    to the back buffer with each object's own shaders, sampling the shadow
//!    map on [`slot::resource::SHADOW_MAP`].
//!
//! Setup failures are returned immediately. During a frame, a drawable that
//! cannot be drawn (not initialized, unknown shader, no instances) is logged
//! and skipped and the rest of the frame goes on.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::{Deg, Matrix, Matrix4, Point3, SquareMatrix};
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, DirectionsInput, MouseRelativeMovement, perspective_lh};
use crate::context::{
    BufferId, Command, DepthStencilId, DriverType, GpuContext, RenderTarget, ShaderId,
    create_constant_buffer, slot, upload,
};
use crate::data_structures::drawable::{Drawable, DrawableBuffers, DrawableKind};
use crate::data_structures::light::{LightsUniform, PointLight, lights_uniform};
use crate::data_structures::render_texture::RenderTexture;
use crate::data_structures::scene::Scene;
use crate::data_structures::texture::{Texture, TextureBinding};
use crate::error::{EngineError, Result};
use crate::pipelines::{self, PixelShader, VertexShader};

/// Midnight blue.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.098, 0.098, 0.439, 1.0];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub clear_color: [f32; 4],
    /// What the shadow map holds where nothing was drawn.
    pub shadow_clear_color: [f32; 4],
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: DEFAULT_CLEAR_COLOR,
            shadow_clear_color: [1.0; 4],
            fov: 45.0,
            near: 0.01,
            far: 1000.0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ResizeUniform {
    pub projection: [[f32; 4]; 4],
}

/// Constant buffer of the shadow pass (slot 5).
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniform {
    pub world: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub is_voxel: u32,
    pub _padding: [u32; 3],
}

impl ShadowUniform {
    pub fn new(drawable: &Drawable, caster: &PointLight) -> Self {
        Self {
            world: drawable.world().transpose().into(),
            view: caster.view().transpose().into(),
            projection: caster.projection().transpose().into(),
            is_voxel: drawable.is_voxel() as u32,
            _padding: [0; 3],
        }
    }
}

/// GPU state shared by every scene, created by [`Renderer::initialize`].
#[derive(Debug)]
struct FrameResources {
    depth_stencil: DepthStencilId,
    resize_buffer: BufferId,
    lights_buffer: BufferId,
    shadow_buffer: BufferId,
    shadow_map: RenderTexture,
    /// Bound wherever a material has no texture.
    placeholder: TextureBinding,
}

pub struct Renderer {
    config: RendererConfig,
    scenes: HashMap<String, Scene>,
    main_scene: Option<String>,
    camera: Camera,
    vertex_shaders: HashMap<String, VertexShader>,
    pixel_shaders: HashMap<String, PixelShader>,
    shadow_shaders: Option<(VertexShader, PixelShader)>,
    projection: Matrix4<f32>,
    driver_type: DriverType,
    invalid_texture: Texture,
    frame: Option<FrameResources>,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            config: RendererConfig::default(),
            scenes: HashMap::new(),
            main_scene: None,
            camera: Camera::default(),
            vertex_shaders: HashMap::new(),
            pixel_shaders: HashMap::new(),
            shadow_shaders: None,
            projection: Matrix4::identity(),
            driver_type: DriverType::default(),
            invalid_texture: Texture::solid("invalid texture", [255; 4]),
            frame: None,
        }
    }

    pub fn with_config(mut self, config: RendererConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = camera;
        self
    }

    /// Names the main scene without checking it is registered; that is
    /// checked by [`initialize`](Self::initialize).
    pub fn with_main_scene(mut self, name: &str) -> Self {
        self.main_scene = Some(name.to_string());
        self
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn projection(&self) -> Matrix4<f32> {
        self.projection
    }

    pub fn main_scene_name(&self) -> Option<&str> {
        self.main_scene.as_deref()
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.get(name)
    }

    pub fn scene_mut(&mut self, name: &str) -> Option<&mut Scene> {
        self.scenes.get_mut(name)
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.frame.is_some()
    }

    /// The shadow map, once initialized.
    pub fn shadow_map(&self) -> Option<&RenderTexture> {
        self.frame.as_ref().map(|f| &f.shadow_map)
    }

    /// Registers `scene` under its name. Scenes are initialized when they
    /// are first rendered as the main scene.
    pub fn add_scene(&mut self, scene: Scene) -> Result<()> {
        if self.scenes.contains_key(scene.name()) {
            return Err(EngineError::DuplicateName {
                kind: "scene",
                name: scene.name().to_string(),
            });
        }
        log::debug!("registered scene `{}`", scene.name());
        self.scenes.insert(scene.name().to_string(), scene);
        Ok(())
    }

    pub fn set_main_scene(&mut self, name: &str) -> Result<()> {
        if !self.scenes.contains_key(name) {
            return Err(EngineError::UnknownName {
                kind: "scene",
                name: name.to_string(),
            });
        }
        self.main_scene = Some(name.to_string());
        Ok(())
    }

    pub fn set_shadow_map_shaders(&mut self, vertex: VertexShader, pixel: PixelShader) {
        self.shadow_shaders = Some((vertex, pixel));
    }

    pub fn add_vertex_shader(&mut self, shader: VertexShader) -> Result<()> {
        if self.vertex_shaders.contains_key(shader.name()) {
            return Err(EngineError::DuplicateName {
                kind: "vertex shader",
                name: shader.name().to_string(),
            });
        }
        self.vertex_shaders.insert(shader.name().to_string(), shader);
        Ok(())
    }

    pub fn add_pixel_shader(&mut self, shader: PixelShader) -> Result<()> {
        if self.pixel_shaders.contains_key(shader.name()) {
            return Err(EngineError::DuplicateName {
                kind: "pixel shader",
                name: shader.name().to_string(),
            });
        }
        self.pixel_shaders.insert(shader.name().to_string(), shader);
        Ok(())
    }

    /// Registers the shaders the drawable kinds default to and installs the
    /// built-in shadow pair.
    pub fn register_builtin_shaders(&mut self) -> Result<()> {
        for (vertex, pixel) in [pipelines::phong(), pipelines::voxel(), pipelines::skybox()] {
            self.add_vertex_shader(vertex)?;
            self.add_pixel_shader(pixel)?;
        }
        self.add_vertex_shader(pipelines::skinning())?;
        let (vertex, pixel) = pipelines::shadow();
        self.set_shadow_map_shaders(vertex, pixel);
        Ok(())
    }

    fn main_scene_mut(&mut self) -> Result<&mut Scene> {
        let name = self.main_scene.as_deref().ok_or(EngineError::NoMainScene)?;
        self.scenes
            .get_mut(name)
            .ok_or_else(|| EngineError::MainSceneNotRegistered(name.to_string()))
    }

    /// Points renderable `renderable` of the main scene at registered
    /// shaders.
    pub fn set_shaders_of_renderable(
        &mut self,
        renderable: &str,
        vertex_shader: &str,
        pixel_shader: &str,
    ) -> Result<()> {
        if !self.vertex_shaders.contains_key(vertex_shader) {
            return Err(EngineError::UnknownName {
                kind: "vertex shader",
                name: vertex_shader.to_string(),
            });
        }
        if !self.pixel_shaders.contains_key(pixel_shader) {
            return Err(EngineError::UnknownName {
                kind: "pixel shader",
                name: pixel_shader.to_string(),
            });
        }
        let drawable = self
            .main_scene_mut()?
            .renderable_mut(renderable)
            .ok_or_else(|| EngineError::UnknownName {
                kind: "renderable",
                name: renderable.to_string(),
            })?;
        drawable.set_shaders(vertex_shader, pixel_shader);
        Ok(())
    }

    /// Creates the frame resources, compiles every registered shader and
    /// initializes the main scene.
    ///
    /// The main scene must be registered. Nothing is created if it is not.
    /// Any creation failure is returned as is; resources created before it
    /// stay alive.
    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        self.main_scene_mut()?;
        self.driver_type = ctx.driver_type();

        if self.frame.is_none() {
            let (width, height) = ctx.surface_size();
            let depth_stencil = ctx.create_depth_stencil(width, height)?;
            self.projection = perspective_lh(
                Deg(self.config.fov).into(),
                width.max(1) as f32 / height.max(1) as f32,
                self.config.near,
                self.config.far,
            );
            let resize_buffer = create_constant_buffer(
                ctx,
                "resize",
                &ResizeUniform {
                    projection: self.projection.transpose().into(),
                },
            )?;
            let lights_buffer = create_constant_buffer(ctx, "lights", &LightsUniform::default())?;
            let shadow_buffer = create_constant_buffer(
                ctx,
                "shadow matrices",
                &<ShadowUniform as bytemuck::Zeroable>::zeroed(),
            )?;
            let mut shadow_map = RenderTexture::new(width, height);
            shadow_map.initialize(ctx)?;
            self.camera.initialize(ctx)?;
            let placeholder = self.invalid_texture.initialize(ctx)?;

            self.frame = Some(FrameResources {
                depth_stencil,
                resize_buffer,
                lights_buffer,
                shadow_buffer,
                shadow_map,
                placeholder,
            });
            log::info!(
                "renderer initialized on {:?} driver at {}x{}",
                self.driver_type,
                width,
                height
            );
        }

        for shader in self.vertex_shaders.values_mut() {
            shader.initialize(ctx)?;
        }
        for shader in self.pixel_shaders.values_mut() {
            shader.initialize(ctx)?;
        }
        if let Some((vertex, pixel)) = self.shadow_shaders.as_mut() {
            vertex.initialize(ctx)?;
            pixel.initialize(ctx)?;
        }
        self.main_scene_mut()?.initialize(ctx)
    }

    pub fn handle_input(
        &mut self,
        directions: &DirectionsInput,
        mouse: &MouseRelativeMovement,
        delta_time: f32,
    ) {
        self.camera.handle_input(directions, mouse, delta_time);
    }

    /// Advances the main scene, then the camera.
    pub fn update(&mut self, delta_time: f32) {
        if let Some(scene) = self
            .main_scene
            .as_ref()
            .and_then(|name| self.scenes.get_mut(name))
        {
            scene.update(delta_time);
        }
        self.camera.update(delta_time);
    }

    /// Draws the main scene and presents.
    pub fn render(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        if self.frame.is_none() {
            return Err(EngineError::NotInitialized);
        }
        let shadow_shaders = match self.shadow_shaders.as_mut() {
            Some((vertex, pixel)) => (vertex.initialize(ctx)?, pixel.initialize(ctx)?),
            None => return Err(EngineError::MissingShadowShaders),
        };
        compile_pending(ctx, &mut self.vertex_shaders, &mut self.pixel_shaders);

        let scene = self.main_scene_mut()?;
        if !scene.is_initialized() {
            scene.initialize(ctx)?;
        }

        let Self {
            config,
            scenes,
            main_scene,
            camera,
            vertex_shaders,
            pixel_shaders,
            frame,
            ..
        } = self;
        let (Some(frame), Some(scene)) = (
            frame.as_ref(),
            main_scene.as_deref().and_then(|name| scenes.get_mut(name)),
        ) else {
            return Err(EngineError::NotInitialized);
        };

        upload_dirty_instances(ctx, scene);
        shadow_pass(ctx, frame, config, shadow_shaders, scene);
        main_pass(ctx, frame, config, camera, vertex_shaders, pixel_shaders, scene);
        ctx.present()?;
        Ok(())
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Compiles shaders registered after initialization.
fn compile_pending(
    ctx: &mut dyn GpuContext,
    vertex_shaders: &mut HashMap<String, VertexShader>,
    pixel_shaders: &mut HashMap<String, PixelShader>,
) {
    for shader in vertex_shaders.values_mut().filter(|s| s.id().is_none()) {
        if let Err(e) = shader.initialize(ctx) {
            log::error!("vertex shader `{}` failed to compile: {}", shader.name(), e);
        }
    }
    for shader in pixel_shaders.values_mut().filter(|s| s.id().is_none()) {
        if let Err(e) = shader.initialize(ctx) {
            log::error!("pixel shader `{}` failed to compile: {}", shader.name(), e);
        }
    }
}

fn upload_dirty_instances(ctx: &mut dyn GpuContext, scene: &mut Scene) {
    for voxel in scene.voxels_mut() {
        let Some(instances) = voxel.take_dirty_instances() else {
            continue;
        };
        if let (Some(buffers), false) = (voxel.buffers(), instances.is_empty()) {
            ctx.submit(Command::UpdateBuffer {
                buffer: buffers.instance,
                data: bytemuck::cast_slice(&instances).to_vec(),
            });
        }
    }
}

/// Buffers of a drawable that can be drawn this frame.
fn drawable_buffers(drawable: &Drawable) -> Option<DrawableBuffers> {
    let Some(buffers) = drawable.buffers() else {
        log::warn!("skipping `{}`: not initialized", drawable.name());
        return None;
    };
    if drawable.num_instances() == 0 {
        log::warn!("skipping voxel `{}`: no instances", drawable.name());
        return None;
    }
    Some(*buffers)
}

fn bind_geometry(ctx: &mut dyn GpuContext, buffers: &DrawableBuffers) {
    ctx.submit(Command::SetVertexBuffer {
        slot: slot::vertex::GEOMETRY,
        buffer: Some(buffers.vertex),
    });
    ctx.submit(Command::SetVertexBuffer {
        slot: slot::vertex::NORMAL_DATA,
        buffer: buffers.normal,
    });
    ctx.submit(Command::SetVertexBuffer {
        slot: slot::vertex::INSTANCES,
        buffer: Some(buffers.instance),
    });
    ctx.submit(Command::SetVertexBuffer {
        slot: slot::vertex::BONES,
        buffer: buffers.bones,
    });
    ctx.submit(Command::SetIndexBuffer {
        buffer: buffers.index,
    });
}

fn draw_command(drawable: &Drawable, mesh: &crate::data_structures::model::Mesh) -> Command {
    match drawable.kind() {
        DrawableKind::Instanced { instances } => Command::DrawIndexedInstanced {
            index_count: mesh.num_indices,
            instance_count: instances.len() as u32,
            base_index: mesh.base_index,
            base_vertex: mesh.base_vertex,
            base_instance: 0,
        },
        DrawableKind::Static | DrawableKind::Skinned(_) | DrawableKind::Sky => {
            Command::DrawIndexed {
                index_count: mesh.num_indices,
                base_index: mesh.base_index,
                base_vertex: mesh.base_vertex,
            }
        }
    }
}

fn bind_texture(
    ctx: &mut dyn GpuContext,
    slot: u32,
    texture: Option<&Arc<Texture>>,
    placeholder: TextureBinding,
) {
    let binding = texture.and_then(|t| t.binding()).unwrap_or(placeholder);
    ctx.submit(Command::SetShaderResource {
        slot,
        texture: Some(binding.texture),
    });
    ctx.submit(Command::SetSampler {
        slot,
        sampler: Some(binding.sampler),
    });
}

/// Renders depth as seen from light 0 into the shadow map.
fn shadow_pass(
    ctx: &mut dyn GpuContext,
    frame: &FrameResources,
    config: &RendererConfig,
    (vertex, pixel): (ShaderId, ShaderId),
    scene: &mut Scene,
) {
    let Some(target) = frame.shadow_map.render_target() else {
        log::error!("shadow map has no texture, skipping the shadow pass");
        return;
    };
    // the shadow map may still be bound for reading from the last frame
    for slot in 0..slot::resource::COUNT as u32 {
        ctx.submit(Command::SetShaderResource {
            slot,
            texture: None,
        });
    }
    ctx.submit(Command::SetRenderTarget {
        color: target,
        depth: Some(frame.depth_stencil),
    });
    ctx.submit(Command::ClearRenderTarget {
        color: config.shadow_clear_color,
    });
    ctx.submit(Command::ClearDepth { depth: 1.0 });

    let caster = scene.point_lights()[0].clone();
    for drawable in scene.drawables_mut() {
        if matches!(drawable.kind(), DrawableKind::Sky) {
            continue;
        }
        let Some(buffers) = drawable_buffers(drawable) else {
            continue;
        };
        bind_geometry(ctx, &buffers);
        ctx.submit(Command::SetShaders { vertex, pixel });
        upload(ctx, frame.shadow_buffer, &ShadowUniform::new(drawable, &caster));
        ctx.submit(Command::SetConstantBuffer {
            slot: slot::constant::SHADOW,
            buffer: Some(frame.shadow_buffer),
        });
        for mesh in drawable.meshes() {
            ctx.submit(draw_command(drawable, mesh));
        }
    }
}

/// Renders the scene to the back buffer.
fn main_pass(
    ctx: &mut dyn GpuContext,
    frame: &FrameResources,
    config: &RendererConfig,
    camera: &Camera,
    vertex_shaders: &HashMap<String, VertexShader>,
    pixel_shaders: &HashMap<String, PixelShader>,
    scene: &mut Scene,
) {
    ctx.submit(Command::SetRenderTarget {
        color: RenderTarget::BackBuffer,
        depth: Some(frame.depth_stencil),
    });
    ctx.submit(Command::ClearRenderTarget {
        color: config.clear_color,
    });
    ctx.submit(Command::ClearDepth { depth: 1.0 });

    let camera_buffer = camera.upload(ctx);
    ctx.submit(Command::SetConstantBuffer {
        slot: slot::constant::CAMERA,
        buffer: camera_buffer,
    });
    ctx.submit(Command::SetConstantBuffer {
        slot: slot::constant::RESIZE,
        buffer: Some(frame.resize_buffer),
    });
    upload(ctx, frame.lights_buffer, &lights_uniform(scene.point_lights()));
    ctx.submit(Command::SetConstantBuffer {
        slot: slot::constant::LIGHTS,
        buffer: Some(frame.lights_buffer),
    });
    ctx.submit(Command::SetShaderResource {
        slot: slot::resource::SHADOW_MAP,
        texture: frame.shadow_map.shader_resource(),
    });
    ctx.submit(Command::SetSampler {
        slot: slot::resource::SHADOW_MAP,
        sampler: frame.shadow_map.sampler(),
    });

    let eye: Point3<f32> = camera.eye();
    for drawable in scene.drawables_mut() {
        let Some(buffers) = drawable_buffers(drawable) else {
            continue;
        };
        let vertex = vertex_shaders
            .get(drawable.vertex_shader())
            .and_then(VertexShader::id);
        let pixel = pixel_shaders
            .get(drawable.pixel_shader())
            .and_then(PixelShader::id);
        let (Some(vertex), Some(pixel)) = (vertex, pixel) else {
            log::warn!(
                "skipping `{}`: shaders `{}`/`{}` are not available",
                drawable.name(),
                drawable.vertex_shader(),
                drawable.pixel_shader()
            );
            continue;
        };

        bind_geometry(ctx, &buffers);
        ctx.submit(Command::SetShaders { vertex, pixel });
        upload(ctx, buffers.constant, &drawable.object_uniform(eye));
        ctx.submit(Command::SetConstantBuffer {
            slot: slot::constant::OBJECT,
            buffer: Some(buffers.constant),
        });
        if let (Some(skinning), Some(buffer)) = (drawable.skinning(), buffers.skinning) {
            upload(ctx, buffer, &skinning.uniform());
            ctx.submit(Command::SetConstantBuffer {
                slot: slot::constant::SKINNING,
                buffer: Some(buffer),
            });
        }

        for mesh in drawable.meshes() {
            let material = drawable.materials().get(mesh.material_index);
            bind_texture(
                ctx,
                slot::resource::DIFFUSE,
                material.and_then(|m| m.diffuse.as_ref()),
                frame.placeholder,
            );
            bind_texture(
                ctx,
                slot::resource::NORMAL,
                material.and_then(|m| m.normal.as_ref()),
                frame.placeholder,
            );
            ctx.submit(draw_command(drawable, mesh));
        }
    }
}
