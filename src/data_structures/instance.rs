//! Per-instance transforms for instanced drawing.
//!
//! Every drawable owns an instance buffer in vertex slot 2. Ordinary
//! drawables hold a single identity instance, voxels hold one entry per
//! cube so a whole group is drawn with one instanced call.

use cgmath::{Matrix, One};

use crate::data_structures::model;

/// Per-instance transformation: position, rotation (as quaternion), and scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Create a new instance with identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// The GPU representation, transposed like every other uploaded matrix.
    pub fn to_raw(&self) -> InstanceRaw {
        InstanceRaw {
            model: self.to_matrix().transpose().into(),
        }
    }
}

impl From<cgmath::Vector3<f32>> for Instance {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * The raw instance is the actual data stored on the GPU
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
}

impl InstanceRaw {
    pub fn identity() -> Self {
        Instance::new().to_raw()
    }
}

/**
 * Stride layout here: the transposed world matrix as four 4d vectors,
 * shader locations 5 to 8.
 */
impl model::Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // A mat4 takes up 4 vertex slots as it is technically 4 vec4s.
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Rad, Rotation3, SquareMatrix, Vector3};

    #[test]
    fn raw_instance_is_transposed() {
        let instance = Instance::from(Vector3::new(1.0, 2.0, 3.0));
        let raw = instance.to_raw();
        // translation ends up in the last row of the uploaded matrix
        assert_eq!(raw.model[0][3], 1.0);
        assert_eq!(raw.model[1][3], 2.0);
        assert_eq!(raw.model[2][3], 3.0);
        assert_eq!(raw.model[3], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn matrix_applies_scale_then_rotation_then_translation() {
        let instance = Instance {
            position: Vector3::new(0.0, 5.0, 0.0),
            rotation: cgmath::Quaternion::from_angle_y(Rad(std::f32::consts::FRAC_PI_2)),
            scale: Vector3::new(2.0, 2.0, 2.0),
        };
        let moved = instance.to_matrix() * cgmath::Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert!((moved.x - 0.0).abs() < 1e-5);
        assert!((moved.y - 5.0).abs() < 1e-5);
        assert!((moved.z + 2.0).abs() < 1e-5);
        assert!(Instance::new().to_matrix().is_identity());
    }
}
