//! Vertex formats, meshes and materials shared by every drawable.
//!
//! # Key types
//! - [`SimpleVertex`]: position, texture coordinate and normal (slot 0)
//! - [`NormalData`]: tangent and bitangent (slot 1)
//! - [`AnimationData`]: bone indices and weights of skinned vertices (slot 3)
//! - [`Mesh`]: one indexed range of a drawable's geometry
//! - [`Material`]: optional diffuse and normal textures

use std::sync::Arc;

use crate::context::slot;
use crate::data_structures::texture::Texture;

/// Describes how a vertex type is laid out in its vertex buffer slot.
pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SimpleVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl SimpleVertex {
    pub const fn new(position: [f32; 3], tex_coords: [f32; 2], normal: [f32; 3]) -> Self {
        Self {
            position,
            tex_coords,
            normal,
        }
    }
}

impl Vertex for SimpleVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<SimpleVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Tangent space of one vertex.
///
/// Bound on slot 1 with per-instance step rate, so a drawable with a single
/// instance reads its first entry for every vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NormalData {
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl Vertex for NormalData {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<NormalData>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Up to four bone influences of a skinned vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AnimationData {
    pub bone_indices: [u32; 4],
    pub bone_weights: [f32; 4],
}

impl Vertex for AnimationData {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<AnimationData>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Uint32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[u32; 4]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

/// Vertex buffer layouts in slot order for a vertex shader input layout.
pub fn vertex_layouts(
    layout: crate::context::VertexLayout,
) -> Vec<wgpu::VertexBufferLayout<'static>> {
    let mut layouts = vec![
        SimpleVertex::desc(),
        NormalData::desc(),
        crate::data_structures::instance::InstanceRaw::desc(),
    ];
    if layout == crate::context::VertexLayout::Skinned {
        layouts.push(AnimationData::desc());
    }
    debug_assert!(layouts.len() <= slot::vertex::COUNT);
    layouts
}

/// An indexed sub-range of a drawable's geometry drawn with one material.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub name: String,
    pub num_indices: u32,
    pub base_index: u32,
    pub base_vertex: i32,
    pub material_index: usize,
}

impl Mesh {
    /// A mesh covering `num_indices` indices from the start of the buffers.
    pub fn whole(name: &str, num_indices: u32) -> Self {
        Self {
            name: name.to_string(),
            num_indices,
            base_index: 0,
            base_vertex: 0,
            material_index: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Material {
    pub name: String,
    pub diffuse: Option<Arc<Texture>>,
    pub normal: Option<Arc<Texture>>,
}

impl Material {
    pub fn new(name: &str, diffuse: Option<Arc<Texture>>, normal: Option<Arc<Texture>>) -> Self {
        Self {
            name: name.to_string(),
            diffuse,
            normal,
        }
    }
}
