//! lumen-ngin
//!
//! A small real-time 3D engine. A [`render::Renderer`] owns named scenes of
//! static renderables, instanced voxel groups, skinned models and a sky box
//! lit by two point lights. Each frame it renders the main scene twice: a
//! shadow pass from the first light into an off-screen texture, then the
//! main pass that samples it. All GPU work goes through the
//! [`context::GpuContext`] trait, so the renderer runs on wgpu in a window
//! or headless against a recording backend.
//!
//! High-level modules
//! - `camera`: first-person camera, input accumulation and view uniforms
//! - `context`: the GPU abstraction with its wgpu and recording backends
//! - `data_structures`: scenes, drawables, lights, textures and skeletons
//! - `error`: the engine's error type
//! - `flow`: winit window and event loop hosting a renderer
//! - `pipelines`: built-in WGSL shaders and render pipeline construction
//! - `render`: the renderer and its two passes
//! - `resources`: loaders for obj, glTF, images and scene descriptions
//!

pub mod camera;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod pipelines;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use error::{EngineError, Result};
pub use winit::event::DeviceEvent;
pub use winit::event::WindowEvent;
