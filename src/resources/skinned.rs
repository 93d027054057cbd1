//! glTF documents to skinned [`Drawable`]s.
//!
//! Only the first skin is used, together with the mesh it is attached to.
//! The node hierarchy is flattened so parents precede their children, and
//! all positions, transforms and keyframes are mirrored into the engine's
//! left-handed space.

use std::collections::HashMap;

use anyhow::{Context, bail};
use cgmath::{Matrix4, Quaternion, Vector3};
use gltf::animation::Interpolation;
use gltf::animation::util::ReadOutputs;

use crate::data_structures::drawable::{Drawable, Geometry, Skinning};
use crate::data_structures::instance::Instance;
use crate::data_structures::model::{AnimationData, Material, Mesh, SimpleVertex};
use crate::data_structures::skeleton::{
    AnimationClip, Channel, Keyframes, MAX_NUM_BONES, Node, Skeleton,
};
use crate::resources::mesh::{absolute_indices, compute_normal_data, to_left_handed};

fn mirror_translation(t: [f32; 3]) -> Vector3<f32> {
    Vector3::new(t[0], t[1], -t[2])
}

fn mirror_rotation(q: [f32; 4]) -> Quaternion<f32> {
    Quaternion::new(q[3], -q[0], -q[1], q[2])
}

fn mirror_matrix(m: [[f32; 4]; 4]) -> Matrix4<f32> {
    let mirror = Matrix4::from_nonuniform_scale(1.0, 1.0, -1.0);
    mirror * Matrix4::from(m) * mirror
}

/// Cubic spline samplers store in-tangent, value and out-tangent per key.
fn key_values<T>(values: impl Iterator<Item = T>, interpolation: Interpolation) -> Vec<T> {
    match interpolation {
        Interpolation::CubicSpline => values.skip(1).step_by(3).collect(),
        _ => values.collect(),
    }
}

struct Hierarchy {
    skeleton_nodes: Vec<Node>,
    index_of: HashMap<usize, usize>,
}

fn flatten_hierarchy(document: &gltf::Document) -> Hierarchy {
    let nodes: Vec<gltf::Node> = document.nodes().collect();
    let mut parent = vec![None; nodes.len()];
    for node in &nodes {
        for child in node.children() {
            parent[child.index()] = Some(node.index());
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut index_of = HashMap::new();
    let mut stack: Vec<usize> = (0..nodes.len()).filter(|&i| parent[i].is_none()).rev().collect();
    while let Some(i) = stack.pop() {
        if index_of.contains_key(&i) {
            continue;
        }
        index_of.insert(i, order.len());
        order.push(i);
        let children: Vec<usize> = nodes[i].children().map(|c| c.index()).collect();
        stack.extend(children.into_iter().rev());
    }

    let skeleton_nodes = order
        .iter()
        .map(|&i| {
            let node = &nodes[i];
            let (translation, rotation, scale) = node.transform().decomposed();
            Node {
                name: node
                    .name()
                    .map_or_else(|| format!("node-{}", i), str::to_string),
                parent: parent[i].and_then(|p| index_of.get(&p).copied()),
                rest: Instance {
                    position: mirror_translation(translation),
                    rotation: mirror_rotation(rotation),
                    scale: scale.into(),
                },
            }
        })
        .collect();
    Hierarchy {
        skeleton_nodes,
        index_of,
    }
}

fn read_skeleton(
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    hierarchy: Hierarchy,
) -> anyhow::Result<Skeleton> {
    let Some(skin) = document.skins().next() else {
        return Ok(Skeleton {
            nodes: hierarchy.skeleton_nodes,
            ..Default::default()
        });
    };
    let joints = skin
        .joints()
        .map(|joint| {
            hierarchy
                .index_of
                .get(&joint.index())
                .copied()
                .with_context(|| format!("joint node {} is not part of the hierarchy", joint.index()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if joints.len() > MAX_NUM_BONES {
        log::warn!(
            "skin has {} joints, only the first {} are animated",
            joints.len(),
            MAX_NUM_BONES
        );
    }
    let inverse_bind = skin
        .reader(|b| buffers.get(b.index()).map(Vec::as_slice))
        .read_inverse_bind_matrices()
        .map(|matrices| matrices.map(mirror_matrix).collect())
        .unwrap_or_default();
    Ok(Skeleton {
        nodes: hierarchy.skeleton_nodes,
        joints,
        inverse_bind,
    })
}

fn read_clips(
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    index_of: &HashMap<usize, usize>,
) -> Vec<AnimationClip> {
    document
        .animations()
        .map(|animation| {
            let channels = animation
                .channels()
                .filter_map(|channel| {
                    let node = *index_of.get(&channel.target().node().index())?;
                    let interpolation = channel.sampler().interpolation();
                    let reader = channel.reader(|b| buffers.get(b.index()).map(Vec::as_slice));
                    let timestamps: Vec<f32> = reader.read_inputs()?.collect();
                    let keyframes = match reader.read_outputs()? {
                        ReadOutputs::Translations(values) => Keyframes::Translation(key_values(
                            values.map(mirror_translation),
                            interpolation,
                        )),
                        ReadOutputs::Rotations(values) => Keyframes::Rotation(key_values(
                            values.into_f32().map(mirror_rotation),
                            interpolation,
                        )),
                        ReadOutputs::Scales(values) => Keyframes::Scale(key_values(
                            values.map(Vector3::from),
                            interpolation,
                        )),
                        ReadOutputs::MorphTargetWeights(_) => Keyframes::Other,
                    };
                    Some(Channel {
                        node,
                        timestamps,
                        keyframes,
                    })
                })
                .collect();
            let name = animation
                .name()
                .map_or_else(|| format!("animation-{}", animation.index()), str::to_string);
            AnimationClip::new(&name, channels)
        })
        .collect()
}

/// Builds a skinned model from a parsed document. `buffers` holds the
/// contents of every buffer in document order, `materials` every material.
pub fn build_skinned_model(
    name: &str,
    document: &gltf::Document,
    buffers: &[Vec<u8>],
    mut materials: Vec<Material>,
) -> anyhow::Result<Drawable> {
    let mesh = document
        .nodes()
        .find(|n| n.skin().is_some() && n.mesh().is_some())
        .and_then(|n| n.mesh())
        .or_else(|| document.meshes().next());
    let Some(mesh) = mesh else {
        bail!("`{}` contains no mesh", name);
    };

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut animation_data = Vec::new();
    let mut meshes = Vec::new();
    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            log::warn!("skipping non-triangle primitive {} of `{}`", primitive.index(), name);
            continue;
        }
        let reader = primitive.reader(|b| buffers.get(b.index()).map(Vec::as_slice));
        let Some(positions) = reader.read_positions() else {
            log::warn!("primitive {} of `{}` has no positions", primitive.index(), name);
            continue;
        };
        let positions: Vec<[f32; 3]> = positions.collect();
        let normals: Vec<[f32; 3]> = reader
            .read_normals()
            .map(|n| n.collect())
            .unwrap_or_default();
        let tex_coords: Vec<[f32; 2]> = reader
            .read_tex_coords(0)
            .map(|t| t.into_f32().collect())
            .unwrap_or_default();
        let joints: Vec<[u16; 4]> = reader
            .read_joints(0)
            .map(|j| j.into_u16().collect())
            .unwrap_or_default();
        let weights: Vec<[f32; 4]> = reader
            .read_weights(0)
            .map(|w| w.into_f32().collect())
            .unwrap_or_default();

        let base_vertex = vertices.len() as i32;
        let base_index = indices.len() as u32;
        for (i, position) in positions.iter().enumerate() {
            vertices.push(SimpleVertex::new(
                *position,
                tex_coords.get(i).copied().unwrap_or_default(),
                normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            ));
            animation_data.push(AnimationData {
                bone_indices: joints.get(i).map(|j| j.map(u32::from)).unwrap_or_default(),
                bone_weights: weights.get(i).copied().unwrap_or_default(),
            });
        }
        let primitive_indices: Vec<u32> = reader
            .read_indices()
            .map(|i| i.into_u32().collect())
            .unwrap_or_else(|| (0..positions.len() as u32).collect());
        meshes.push(Mesh {
            name: format!("{}-{}", mesh.name().unwrap_or(name), primitive.index()),
            num_indices: primitive_indices.len() as u32,
            base_index,
            base_vertex,
            material_index: primitive.material().index().unwrap_or(0),
        });
        indices.extend(primitive_indices);
    }
    if meshes.is_empty() {
        bail!("`{}` contains no triangle primitives", name);
    }

    to_left_handed(&mut vertices, &mut indices);
    let normal_data = compute_normal_data(&vertices, &absolute_indices(&meshes, &indices));
    let geometry = Geometry::new(vertices, indices)
        .with_normal_data(normal_data)
        .with_animation_data(animation_data);

    let hierarchy = flatten_hierarchy(document);
    let clips = read_clips(document, buffers, &hierarchy.index_of);
    let skeleton = read_skeleton(document, buffers, hierarchy)?;
    log::debug!(
        "`{}`: {} vertices, {} bones, {} clips",
        name,
        geometry.vertices.len(),
        skeleton.joints.len(),
        clips.len()
    );

    if materials.is_empty() {
        materials.push(Material::default());
    }
    Ok(Drawable::model(name, geometry, Skinning::new(skeleton, clips)).with_materials(materials, meshes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::drawable::DrawableKind;

    const DOCUMENT: &str = r#"{
        "asset": { "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [
            { "name": "root", "children": [1, 2] },
            { "name": "body", "mesh": 0, "skin": 0 },
            { "name": "bone", "translation": [0, 1, 2] }
        ],
        "meshes": [{
            "name": "tri",
            "primitives": [{ "attributes": { "POSITION": 0, "JOINTS_0": 2, "WEIGHTS_0": 3 }, "indices": 1 }]
        }],
        "skins": [{ "joints": [2], "inverseBindMatrices": 4 }],
        "animations": [{
            "name": "wave",
            "channels": [{ "sampler": 0, "target": { "node": 2, "path": "translation" } }],
            "samplers": [{ "input": 5, "output": 6 }]
        }],
        "buffers": [{ "byteLength": 200 }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 },
            { "buffer": 0, "byteOffset": 44, "byteLength": 12 },
            { "buffer": 0, "byteOffset": 56, "byteLength": 48 },
            { "buffer": 0, "byteOffset": 104, "byteLength": 64 },
            { "buffer": 0, "byteOffset": 168, "byteLength": 8 },
            { "buffer": 0, "byteOffset": 176, "byteLength": 24 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0, 0, 0], "max": [1, 1, 0] },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" },
            { "bufferView": 2, "componentType": 5121, "count": 3, "type": "VEC4" },
            { "bufferView": 3, "componentType": 5126, "count": 3, "type": "VEC4" },
            { "bufferView": 4, "componentType": 5126, "count": 1, "type": "MAT4" },
            { "bufferView": 5, "componentType": 5126, "count": 2, "type": "SCALAR", "min": [0], "max": [1] },
            { "bufferView": 6, "componentType": 5126, "count": 2, "type": "VEC3" }
        ]
    }"#;

    fn binary_chunk() -> Vec<u8> {
        let mut bin = Vec::new();
        let positions = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        bin.extend_from_slice(bytemuck::cast_slice(&positions));
        bin.extend_from_slice(bytemuck::cast_slice(&[0u16, 1, 2, 0]));
        bin.extend_from_slice(&[0u8; 12]);
        let weights = [1.0f32, 0.0, 0.0, 0.0];
        for _ in 0..3 {
            bin.extend_from_slice(bytemuck::cast_slice(&weights));
        }
        let inverse_bind: [[f32; 4]; 4] =
            Matrix4::from_translation(Vector3::new(0.0, -1.0, -2.0)).into();
        bin.extend_from_slice(bytemuck::cast_slice(&inverse_bind));
        bin.extend_from_slice(bytemuck::cast_slice(&[0.0f32, 1.0]));
        bin.extend_from_slice(bytemuck::cast_slice(&[0.0f32, 1.0, 2.0, 0.0, 3.0, 2.0]));
        assert_eq!(bin.len(), 200);
        bin
    }

    fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&json);
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(b"BIN\0");
        out.extend_from_slice(bin);
        out
    }

    fn load() -> Drawable {
        let gltf = gltf::Gltf::from_slice(&glb(DOCUMENT, &binary_chunk())).unwrap();
        let buffers = vec![gltf.blob.clone().unwrap()];
        build_skinned_model("rig", &gltf.document, &buffers, Vec::new()).unwrap()
    }

    #[test]
    fn geometry_is_mirrored_and_skinned() {
        let model = load();
        let geometry = model.geometry();
        assert_eq!(geometry.vertices.len(), 3);
        assert_eq!(geometry.indices, vec![0, 2, 1]);
        let animation = geometry.animation_data.as_ref().unwrap();
        assert_eq!(animation[1].bone_weights, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(model.meshes()[0].num_indices, 3);
        assert_eq!(model.materials().len(), 1);
        assert!(matches!(model.kind(), DrawableKind::Skinned(_)));
    }

    #[test]
    fn hierarchy_puts_parents_first() {
        let model = load();
        let skeleton = &model.skinning().unwrap().skeleton;
        let names: Vec<&str> = skeleton.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["root", "body", "bone"]);
        assert_eq!(skeleton.nodes[2].parent, Some(0));
        assert_eq!(skeleton.joints, vec![2]);
        assert_eq!(skeleton.nodes[2].rest.position, Vector3::new(0.0, 1.0, -2.0));
    }

    #[test]
    fn bind_pose_cancels_and_animation_moves_the_bone() {
        let mut model = load();
        let skinning = model.skinning().unwrap();
        assert_eq!(skinning.active_clip().unwrap().name, "wave");
        let rest = skinning.bones()[0].w.truncate();
        assert!(rest.x.abs() < 1e-5 && rest.y.abs() < 1e-5 && rest.z.abs() < 1e-5);

        model.update(0.5);
        let moved = model.skinning().unwrap().bones()[0].w.truncate();
        assert!((moved.y - 1.0).abs() < 1e-5);
        assert!(moved.z.abs() < 1e-5);
    }

    #[test]
    fn documents_without_meshes_fail() {
        let json = r#"{ "asset": { "version": "2.0" }, "nodes": [{ "name": "empty" }] }"#;
        let gltf = gltf::Gltf::from_slice(json.as_bytes()).unwrap();
        assert!(build_skinned_model("empty", &gltf.document, &[], Vec::new()).is_err());
    }
}
