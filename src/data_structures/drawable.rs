//! Everything that produces draw calls.
//!
//! Renderables, voxels, models and the sky box share one record,
//! [`Drawable`], and differ only in their [`DrawableKind`]. The renderer
//! switches on the kind to pick an indexed or an indexed-instanced draw.
//!
//! # Key types
//! - [`Drawable`]: geometry, meshes, materials, world transform and shaders
//! - [`DrawableKind`]: static, instanced (voxel), skinned (model) or sky
//! - [`Geometry`]: CPU-side vertex and index data
//! - [`ObjectUniform`]: the per-object constant buffer (slot 2)

use std::fmt;

use cgmath::{Matrix, Matrix4, Point3, Rad, SquareMatrix, Vector3};

use crate::context::{BufferDescriptor, BufferId, BufferUsage, GpuContext, create_constant_buffer};
use crate::data_structures::instance::{Instance, InstanceRaw};
use crate::data_structures::model::{AnimationData, Material, Mesh, NormalData, SimpleVertex};
use crate::data_structures::skeleton::{AnimationClip, Skeleton, SkinningUniform};
use crate::error::{EngineError, Result};

/// Called every frame with the drawable's world matrix and the frame time.
pub type UpdateFn = Box<dyn FnMut(&mut Matrix4<f32>, f32) + Send>;

/// Distance from the eye to each face of the sky cube.
pub const SKY_BOX_SCALE: f32 = 500.0;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectUniform {
    pub world: [[f32; 4]; 4],
    pub output_color: [f32; 4],
    pub has_normal_map: u32,
    pub _padding: [u32; 3],
}

/// CPU-side geometry uploaded once during initialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub vertices: Vec<SimpleVertex>,
    pub indices: Vec<u32>,
    pub normal_data: Option<Vec<NormalData>>,
    /// Bone influences, only read by skinned drawables.
    pub animation_data: Option<Vec<AnimationData>>,
}

impl Geometry {
    pub fn new(vertices: Vec<SimpleVertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            normal_data: None,
            animation_data: None,
        }
    }

    pub fn with_normal_data(mut self, normal_data: Vec<NormalData>) -> Self {
        self.normal_data = Some(normal_data);
        self
    }

    pub fn with_animation_data(mut self, animation_data: Vec<AnimationData>) -> Self {
        self.animation_data = Some(animation_data);
        self
    }
}

/// Skeleton and animation state of a skinned model.
#[derive(Debug, Clone, Default)]
pub struct Skinning {
    pub skeleton: Skeleton,
    pub clips: Vec<AnimationClip>,
    active: Option<usize>,
    time: f32,
    bones: Vec<Matrix4<f32>>,
}

impl Skinning {
    pub fn new(skeleton: Skeleton, clips: Vec<AnimationClip>) -> Self {
        let bones = skeleton.bone_transforms(&skeleton.rest_pose());
        Self {
            active: if clips.is_empty() { None } else { Some(0) },
            skeleton,
            clips,
            time: 0.0,
            bones,
        }
    }

    pub fn active_clip(&self) -> Option<&AnimationClip> {
        self.clips.get(self.active?)
    }

    pub fn bones(&self) -> &[Matrix4<f32>] {
        &self.bones
    }

    fn advance(&mut self, delta_time: f32) {
        self.time += delta_time;
        let mut pose = self.skeleton.rest_pose();
        if let Some(clip) = self.active.and_then(|i| self.clips.get(i)) {
            clip.sample(self.time, &mut pose);
        }
        self.bones = self.skeleton.bone_transforms(&pose);
    }

    pub fn uniform(&self) -> SkinningUniform {
        SkinningUniform::new(&self.bones)
    }
}

pub enum DrawableKind {
    /// One indexed draw per mesh.
    Static,
    /// One instanced draw per mesh covering every instance.
    Instanced { instances: Vec<Instance> },
    Skinned(Box<Skinning>),
    /// Drawn around the camera eye, last in the main pass.
    Sky,
}

impl DrawableKind {
    pub fn default_shaders(&self) -> (&'static str, &'static str) {
        match self {
            DrawableKind::Static => ("phong", "phong"),
            DrawableKind::Instanced { .. } => ("voxel", "voxel"),
            DrawableKind::Skinned(_) => ("skinning", "phong"),
            DrawableKind::Sky => ("skybox", "skybox"),
        }
    }
}

impl fmt::Debug for DrawableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawableKind::Static => write!(f, "Static"),
            DrawableKind::Instanced { instances } => {
                write!(f, "Instanced({} instances)", instances.len())
            }
            DrawableKind::Skinned(skinning) => {
                write!(f, "Skinned({} bones)", skinning.skeleton.joints.len())
            }
            DrawableKind::Sky => write!(f, "Sky"),
        }
    }
}

/// GPU handles created by [`Drawable::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableBuffers {
    pub vertex: BufferId,
    pub index: BufferId,
    pub normal: Option<BufferId>,
    pub instance: BufferId,
    pub constant: BufferId,
    pub bones: Option<BufferId>,
    pub skinning: Option<BufferId>,
}

pub struct Drawable {
    name: String,
    kind: DrawableKind,
    geometry: Geometry,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    world: Matrix4<f32>,
    output_color: [f32; 4],
    vertex_shader: String,
    pixel_shader: String,
    updater: Option<UpdateFn>,
    instances_dirty: bool,
    buffers: Option<DrawableBuffers>,
}

impl Drawable {
    fn with_kind(name: &str, kind: DrawableKind, geometry: Geometry) -> Self {
        let (vertex_shader, pixel_shader) = kind.default_shaders();
        let meshes = vec![Mesh::whole(name, geometry.indices.len() as u32)];
        Self {
            name: name.to_string(),
            kind,
            geometry,
            meshes,
            materials: vec![Material::default()],
            world: Matrix4::identity(),
            output_color: [1.0; 4],
            vertex_shader: vertex_shader.to_string(),
            pixel_shader: pixel_shader.to_string(),
            updater: None,
            instances_dirty: false,
            buffers: None,
        }
    }

    /// A static mesh drawn once per frame.
    pub fn renderable(name: &str, geometry: Geometry) -> Self {
        Self::with_kind(name, DrawableKind::Static, geometry)
    }

    /// A group of identical meshes drawn with one instanced call.
    pub fn voxel(name: &str, geometry: Geometry, instances: Vec<Instance>) -> Self {
        Self::with_kind(name, DrawableKind::Instanced { instances }, geometry)
    }

    /// A skinned, animated model.
    pub fn model(name: &str, geometry: Geometry, skinning: Skinning) -> Self {
        Self::with_kind(name, DrawableKind::Skinned(Box::new(skinning)), geometry)
    }

    /// An inward-facing cube that follows the camera.
    pub fn sky_box(name: &str, geometry: Geometry, material: Material) -> Self {
        Self::with_kind(name, DrawableKind::Sky, geometry).with_materials(
            vec![material],
            vec![Mesh::whole(name, 0)],
        )
    }

    /// Replaces meshes and materials. A mesh covering zero indices is
    /// widened to the whole index buffer.
    pub fn with_materials(mut self, materials: Vec<Material>, meshes: Vec<Mesh>) -> Self {
        let total = self.geometry.indices.len() as u32;
        self.meshes = meshes
            .into_iter()
            .map(|mut mesh| {
                if mesh.num_indices == 0 {
                    mesh.num_indices = total;
                }
                mesh
            })
            .collect();
        self.materials = materials;
        self
    }

    pub fn with_color(mut self, output_color: [f32; 4]) -> Self {
        self.output_color = output_color;
        self
    }

    pub fn with_world(mut self, world: Matrix4<f32>) -> Self {
        self.world = world;
        self
    }

    pub fn with_shaders(mut self, vertex_shader: &str, pixel_shader: &str) -> Self {
        self.set_shaders(vertex_shader, pixel_shader);
        self
    }

    pub fn with_update(mut self, updater: impl FnMut(&mut Matrix4<f32>, f32) + Send + 'static) -> Self {
        self.updater = Some(Box::new(updater));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &DrawableKind {
        &self.kind
    }

    pub fn is_voxel(&self) -> bool {
        matches!(self.kind, DrawableKind::Instanced { .. })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn world(&self) -> Matrix4<f32> {
        self.world
    }

    pub fn set_world(&mut self, world: Matrix4<f32>) {
        self.world = world;
    }

    pub fn output_color(&self) -> [f32; 4] {
        self.output_color
    }

    pub fn set_output_color(&mut self, output_color: [f32; 4]) {
        self.output_color = output_color;
    }

    pub fn vertex_shader(&self) -> &str {
        &self.vertex_shader
    }

    pub fn pixel_shader(&self) -> &str {
        &self.pixel_shader
    }

    pub fn set_shaders(&mut self, vertex_shader: &str, pixel_shader: &str) {
        self.vertex_shader = vertex_shader.to_string();
        self.pixel_shader = pixel_shader.to_string();
    }

    pub fn rotate_x(&mut self, angle: Rad<f32>) {
        self.world = Matrix4::from_angle_x(angle) * self.world;
    }

    pub fn rotate_y(&mut self, angle: Rad<f32>) {
        self.world = Matrix4::from_angle_y(angle) * self.world;
    }

    pub fn rotate_z(&mut self, angle: Rad<f32>) {
        self.world = Matrix4::from_angle_z(angle) * self.world;
    }

    pub fn translate(&mut self, offset: Vector3<f32>) {
        self.world = Matrix4::from_translation(offset) * self.world;
    }

    pub fn scale(&mut self, x: f32, y: f32, z: f32) {
        self.world = Matrix4::from_nonuniform_scale(x, y, z) * self.world;
    }

    pub fn has_normal_map(&self) -> bool {
        self.materials.iter().any(|m| m.normal.is_some())
    }

    /// The world matrix used this frame. The sky box is centred on `eye`.
    pub fn world_at(&self, eye: Point3<f32>) -> Matrix4<f32> {
        match self.kind {
            DrawableKind::Sky => {
                Matrix4::from_translation(eye - Point3::new(0.0, 0.0, 0.0))
                    * Matrix4::from_scale(SKY_BOX_SCALE)
                    * self.world
            }
            _ => self.world,
        }
    }

    pub fn object_uniform(&self, eye: Point3<f32>) -> ObjectUniform {
        ObjectUniform {
            world: self.world_at(eye).transpose().into(),
            output_color: self.output_color,
            has_normal_map: self.has_normal_map() as u32,
            _padding: [0; 3],
        }
    }

    pub fn instances(&self) -> &[Instance] {
        match &self.kind {
            DrawableKind::Instanced { instances } => instances,
            _ => &[],
        }
    }

    /// Replaces the voxel instances. Ignored for other kinds.
    pub fn set_instances(&mut self, new_instances: Vec<Instance>) {
        if let DrawableKind::Instanced { instances } = &mut self.kind {
            *instances = new_instances;
            self.instances_dirty = true;
        }
    }

    /// Number of instances one draw of this drawable covers.
    pub fn num_instances(&self) -> u32 {
        match &self.kind {
            DrawableKind::Instanced { instances } => instances.len() as u32,
            _ => 1,
        }
    }

    /// Takes the pending instance data if it changed since the last call.
    pub fn take_dirty_instances(&mut self) -> Option<Vec<InstanceRaw>> {
        if !std::mem::take(&mut self.instances_dirty) {
            return None;
        }
        Some(instance_data(&self.kind))
    }

    pub fn skinning(&self) -> Option<&Skinning> {
        match &self.kind {
            DrawableKind::Skinned(skinning) => Some(skinning),
            _ => None,
        }
    }

    /// Selects the animation clip by name. Returns false if the model has no
    /// such clip.
    pub fn set_animation(&mut self, clip: &str) -> bool {
        let DrawableKind::Skinned(skinning) = &mut self.kind else {
            return false;
        };
        match skinning.clips.iter().position(|c| c.name == clip) {
            Some(index) => {
                skinning.active = Some(index);
                skinning.time = 0.0;
                true
            }
            None => false,
        }
    }

    pub fn buffers(&self) -> Option<&DrawableBuffers> {
        self.buffers.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.buffers.is_some()
    }

    /// Uploads geometry and textures and creates the constant buffers.
    /// Does nothing if already initialized.
    pub fn initialize(&mut self, ctx: &mut dyn GpuContext) -> Result<()> {
        if self.buffers.is_some() {
            return Ok(());
        }
        for (index, mesh) in self.meshes.iter().enumerate() {
            if mesh.material_index >= self.materials.len() {
                return Err(EngineError::InvalidMaterialIndex {
                    mesh: index,
                    material: mesh.material_index,
                    count: self.materials.len(),
                });
            }
        }

        let vertex = ctx.create_buffer(&BufferDescriptor {
            label: &self.name,
            contents: bytemuck::cast_slice(&self.geometry.vertices),
            usage: BufferUsage::Vertex,
        })?;
        let index = ctx.create_buffer(&BufferDescriptor {
            label: &self.name,
            contents: bytemuck::cast_slice(&self.geometry.indices),
            usage: BufferUsage::Index,
        })?;
        // Slot 1 steps per instance; voxels leave it to the backend's
        // placeholder so any instance count stays in bounds.
        let normal = match &self.geometry.normal_data {
            Some(normal_data) if !self.is_voxel() => Some(ctx.create_buffer(&BufferDescriptor {
                label: &self.name,
                contents: bytemuck::cast_slice(normal_data),
                usage: BufferUsage::Vertex,
            })?),
            _ => None,
        };
        let mut instances = instance_data(&self.kind);
        if instances.is_empty() {
            instances.push(InstanceRaw::identity());
        }
        let instance = ctx.create_buffer(&BufferDescriptor {
            label: &self.name,
            contents: bytemuck::cast_slice(&instances),
            usage: BufferUsage::Vertex,
        })?;
        let constant = create_constant_buffer(
            ctx,
            &self.name,
            &self.object_uniform(Point3::new(0.0, 0.0, 0.0)),
        )?;

        let (bones, skinning) = match &self.kind {
            DrawableKind::Skinned(skinning) => {
                let animation_data = self.geometry.animation_data.as_deref().unwrap_or(&[]);
                let bones = ctx.create_buffer(&BufferDescriptor {
                    label: &self.name,
                    contents: bytemuck::cast_slice(animation_data),
                    usage: BufferUsage::Vertex,
                })?;
                let palette = create_constant_buffer(ctx, &self.name, &skinning.uniform())?;
                (Some(bones), Some(palette))
            }
            _ => (None, None),
        };

        for material in &self.materials {
            for texture in [&material.diffuse, &material.normal].into_iter().flatten() {
                texture.initialize(ctx)?;
            }
        }

        self.instances_dirty = false;
        self.buffers = Some(DrawableBuffers {
            vertex,
            index,
            normal,
            instance,
            constant,
            bones,
            skinning,
        });
        log::debug!("initialized {:?} drawable `{}`", self.kind, self.name);
        Ok(())
    }

    /// Runs the update closure and advances the animation.
    pub fn update(&mut self, delta_time: f32) {
        if let Some(updater) = self.updater.as_mut() {
            updater(&mut self.world, delta_time);
        }
        if let DrawableKind::Skinned(skinning) = &mut self.kind {
            skinning.advance(delta_time);
        }
    }
}

fn instance_data(kind: &DrawableKind) -> Vec<InstanceRaw> {
    match kind {
        DrawableKind::Instanced { instances } => instances.iter().map(Instance::to_raw).collect(),
        _ => vec![InstanceRaw::identity()],
    }
}

impl fmt::Debug for Drawable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drawable")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("meshes", &self.meshes.len())
            .field("materials", &self.materials.len())
            .field("vertex_shader", &self.vertex_shader)
            .field("pixel_shader", &self.pixel_shader)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::record::RecordingContext;
    use crate::resources::primitives;
    use cgmath::Deg;

    #[test]
    fn voxel_counts_its_instances() {
        let instances = (0..5)
            .map(|i| Instance::from(Vector3::new(i as f32, 0.0, 0.0)))
            .collect();
        let mut voxel = Drawable::voxel("wall", primitives::cube(), instances);
        assert_eq!(voxel.num_instances(), 5);
        assert_eq!(voxel.instances().len(), 5);

        voxel.set_instances(vec![Instance::new()]);
        assert_eq!(voxel.num_instances(), 1);
        assert_eq!(voxel.take_dirty_instances().map(|d| d.len()), Some(1));
        assert!(voxel.take_dirty_instances().is_none());
    }

    #[test]
    fn renderables_ignore_instances() {
        let mut cube = Drawable::renderable("cube", primitives::cube());
        cube.set_instances(vec![Instance::new(); 3]);
        assert_eq!(cube.num_instances(), 1);
        assert!(cube.instances().is_empty());
    }

    #[test]
    fn initialize_rejects_bad_material_index() {
        let mut ctx = RecordingContext::new(8, 8);
        let mut cube = Drawable::renderable("cube", primitives::cube()).with_materials(
            vec![Material::default()],
            vec![Mesh {
                material_index: 3,
                ..Mesh::whole("cube", 0)
            }],
        );
        let err = cube.initialize(&mut ctx).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidMaterialIndex {
                mesh: 0,
                material: 3,
                count: 1
            }
        ));
        assert!(!cube.is_initialized());
        assert_eq!(ctx.buffer_count(), 0);
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut ctx = RecordingContext::new(8, 8);
        let mut cube = Drawable::renderable("cube", primitives::cube());
        cube.initialize(&mut ctx).unwrap();
        let created = ctx.buffer_count();
        cube.initialize(&mut ctx).unwrap();
        assert_eq!(ctx.buffer_count(), created);
        let buffers = cube.buffers().unwrap();
        assert!(buffers.normal.is_some());
        assert!(buffers.skinning.is_none());
    }

    #[test]
    fn initialize_fails_fast_on_device_errors() {
        let mut ctx = RecordingContext::new(8, 8);
        ctx.fail_creation_after(2);
        let mut cube = Drawable::renderable("cube", primitives::cube());
        assert!(matches!(
            cube.initialize(&mut ctx),
            Err(EngineError::Device(_))
        ));
        assert!(!cube.is_initialized());
    }

    #[test]
    fn transforms_apply_after_the_current_world() {
        let mut cube = Drawable::renderable("cube", primitives::cube());
        cube.scale(2.0, 2.0, 2.0);
        cube.translate(Vector3::new(0.0, 3.0, 0.0));
        let p = cube.world() * Point3::new(1.0, 0.0, 0.0).to_homogeneous();
        assert_eq!(p.truncate(), Vector3::new(2.0, 3.0, 0.0));

        cube.rotate_y(Rad::from(Deg(90.0)));
        let q = cube.world() * Point3::new(1.0, 0.0, 0.0).to_homogeneous();
        assert!((q.z + 2.0).abs() < 1e-5);
    }

    #[test]
    fn update_runs_the_closure() {
        let mut cube = Drawable::renderable("cube", primitives::cube())
            .with_update(|world, dt| *world = Matrix4::from_translation(Vector3::new(dt, 0.0, 0.0)));
        cube.update(0.25);
        assert_eq!(cube.world().w.x, 0.25);
    }

    #[test]
    fn sky_box_follows_the_eye() {
        let sky = Drawable::sky_box("sky", primitives::sky_cube(), Material::default());
        let eye = Point3::new(4.0, 5.0, 6.0);
        let world = sky.world_at(eye);
        assert_eq!(world.w.truncate(), Vector3::new(4.0, 5.0, 6.0));
        assert_eq!(sky.meshes()[0].num_indices, 36);
        assert_eq!(sky.vertex_shader(), "skybox");
    }

    #[test]
    fn object_uniform_is_transposed() {
        let cube = Drawable::renderable("cube", primitives::cube())
            .with_world(Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0)))
            .with_color([0.5, 0.5, 0.5, 1.0]);
        let uniform = cube.object_uniform(Point3::new(0.0, 0.0, 0.0));
        assert_eq!(uniform.world[0][3], 1.0);
        assert_eq!(uniform.world[2][3], 3.0);
        assert_eq!(uniform.output_color, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(uniform.has_normal_map, 0);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 96);
    }
}
