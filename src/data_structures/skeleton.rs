//! Bone hierarchies and keyframed animation for skinned models.
//!
//! # Key types
//! - [`Skeleton`]: node hierarchy, joints and inverse bind matrices
//! - [`AnimationClip`]: keyframe channels sampled into a node pose
//! - [`SkinningUniform`]: the bone palette constant buffer (slot 4)

use cgmath::{Matrix, Matrix4, Quaternion, SquareMatrix, Vector3, VectorSpace};

use crate::data_structures::instance::Instance;

/// Bones a skinned vertex shader can address.
pub const MAX_NUM_BONES: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum Keyframes {
    Translation(Vec<Vector3<f32>>),
    Rotation(Vec<Quaternion<f32>>),
    Scale(Vec<Vector3<f32>>),
    Other,
}

/// Keyframes driving one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub node: usize,
    pub timestamps: Vec<f32>,
    pub keyframes: Keyframes,
}

impl Channel {
    /// Index of the keyframe at or before `time` and the blend factor
    /// towards the next one.
    fn locate(&self, time: f32) -> Option<(usize, usize, f32)> {
        let last = self.timestamps.len().checked_sub(1)?;
        if time <= self.timestamps[0] {
            return Some((0, 0, 0.0));
        }
        if time >= self.timestamps[last] {
            return Some((last, last, 0.0));
        }
        let next = self.timestamps.partition_point(|&t| t <= time);
        let prev = next - 1;
        let span = self.timestamps[next] - self.timestamps[prev];
        let factor = if span > 0.0 {
            (time - self.timestamps[prev]) / span
        } else {
            0.0
        };
        Some((prev, next, factor))
    }

    fn apply(&self, time: f32, pose: &mut Instance) {
        let Some((prev, next, factor)) = self.locate(time) else {
            return;
        };
        match &self.keyframes {
            Keyframes::Translation(values) => {
                if let (Some(a), Some(b)) = (values.get(prev), values.get(next)) {
                    pose.position = a.lerp(*b, factor);
                }
            }
            Keyframes::Rotation(values) => {
                if let (Some(a), Some(b)) = (values.get(prev), values.get(next)) {
                    pose.rotation = a.slerp(*b, factor);
                }
            }
            Keyframes::Scale(values) => {
                if let (Some(a), Some(b)) = (values.get(prev), values.get(next)) {
                    pose.scale = a.lerp(*b, factor);
                }
            }
            Keyframes::Other => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub channels: Vec<Channel>,
}

impl AnimationClip {
    pub fn new(name: &str, channels: Vec<Channel>) -> Self {
        Self {
            name: name.to_string(),
            channels,
        }
    }

    /// Time of the last keyframe of any channel.
    pub fn duration(&self) -> f32 {
        self.channels
            .iter()
            .filter_map(|c| c.timestamps.last())
            .fold(0.0, |a, &b| a.max(b))
    }

    /// Writes the animated transforms at `time` into `pose`, looping past
    /// the end of the clip.
    pub fn sample(&self, time: f32, pose: &mut [Instance]) {
        let duration = self.duration();
        let time = if duration > 0.0 {
            time.rem_euclid(duration)
        } else {
            0.0
        };
        for channel in &self.channels {
            if let Some(node) = pose.get_mut(channel.node) {
                channel.apply(time, node);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    pub parent: Option<usize>,
    pub rest: Instance,
}

/// A node hierarchy where every parent precedes its children.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Skeleton {
    pub nodes: Vec<Node>,
    /// Node index of each bone.
    pub joints: Vec<usize>,
    pub inverse_bind: Vec<Matrix4<f32>>,
}

impl Skeleton {
    pub fn rest_pose(&self) -> Vec<Instance> {
        self.nodes.iter().map(|n| n.rest.clone()).collect()
    }

    /// Bone matrices for `pose`: global joint transform times inverse bind.
    pub fn bone_transforms(&self, pose: &[Instance]) -> Vec<Matrix4<f32>> {
        let mut globals: Vec<Matrix4<f32>> = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            let local = pose.get(i).unwrap_or(&node.rest).to_matrix();
            let global = match node.parent {
                Some(parent) if parent < i => globals[parent] * local,
                _ => local,
            };
            globals.push(global);
        }
        self.joints
            .iter()
            .take(MAX_NUM_BONES)
            .enumerate()
            .map(|(bone, &joint)| {
                let inverse_bind = self
                    .inverse_bind
                    .get(bone)
                    .copied()
                    .unwrap_or_else(Matrix4::identity);
                globals.get(joint).copied().unwrap_or_else(Matrix4::identity) * inverse_bind
            })
            .collect()
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SkinningUniform {
    pub bones: [[[f32; 4]; 4]; MAX_NUM_BONES],
}

impl SkinningUniform {
    /// Transposed bone palette, identity for unused bones.
    pub fn new(bones: &[Matrix4<f32>]) -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        let mut uniform = Self {
            bones: [identity; MAX_NUM_BONES],
        };
        for (slot, bone) in uniform.bones.iter_mut().zip(bones) {
            *slot = bone.transpose().into();
        }
        uniform
    }
}

impl Default for SkinningUniform {
    fn default() -> Self {
        Self::new(&[])
    }
}
