//! Engine data structures: scenes, drawables, lights and their GPU resources.
//!
//! - `scene` groups renderables, voxels, models, a sky box and point lights
//! - `drawable` is the single drawable type with its kind-specific state
//! - `model` contains vertex formats, meshes and materials
//! - `texture` holds decoded images until they are uploaded
//! - `instance` holds per-instance transformation data
//! - `light` contains point lights and the shadow caster's matrices
//! - `render_texture` is the off-screen target of the shadow pass
//! - `skeleton` contains bone hierarchies and animation clips

pub mod drawable;
pub mod instance;
pub mod light;
pub mod model;
pub mod render_texture;
pub mod scene;
pub mod skeleton;
pub mod texture;
