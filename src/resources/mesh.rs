use cgmath::{InnerSpace, Vector2, Vector3};

use crate::data_structures::drawable::Geometry;
use crate::data_structures::model::{Mesh, NormalData, SimpleVertex};

/// Per-vertex tangent frames averaged over the triangles sharing a vertex.
///
/// Obj files and the built-in primitives don't come with tangents, so they
/// have to be derived from positions and texture coordinates for normal maps
/// to work.
pub fn compute_normal_data(vertices: &[SimpleVertex], indices: &[u32]) -> Vec<NormalData> {
    let mut tangents = vec![Vector3::new(0.0f32, 0.0, 0.0); vertices.len()];
    let mut bitangents = tangents.clone();
    let mut triangles_included = vec![0u32; vertices.len()];

    for c in indices.chunks_exact(3) {
        let [i0, i1, i2] = [c[0] as usize, c[1] as usize, c[2] as usize];
        let (Some(v0), Some(v1), Some(v2)) = (vertices.get(i0), vertices.get(i1), vertices.get(i2))
        else {
            continue;
        };

        let pos0: Vector3<f32> = v0.position.into();
        let uv0: Vector2<f32> = v0.tex_coords.into();
        let delta_pos1 = Vector3::from(v1.position) - pos0;
        let delta_pos2 = Vector3::from(v2.position) - pos0;
        let delta_uv1 = Vector2::from(v1.tex_coords) - uv0;
        let delta_uv2 = Vector2::from(v2.tex_coords) - uv0;

        // delta_pos1 = delta_uv1.x * T + delta_uv1.y * B
        // delta_pos2 = delta_uv2.x * T + delta_uv2.y * B
        let det = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let tangent = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
        // flipped for wgpu's top-left texture origin
        let bitangent = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * -r;

        for i in [i0, i1, i2] {
            tangents[i] += tangent;
            bitangents[i] += bitangent;
            triangles_included[i] += 1;
        }
    }

    tangents
        .into_iter()
        .zip(bitangents)
        .zip(triangles_included)
        .map(|((tangent, bitangent), n)| {
            if n == 0 {
                return NormalData::default();
            }
            NormalData {
                tangent: tangent.normalize().into(),
                bitangent: bitangent.normalize().into(),
            }
        })
        .collect()
}

/// Indices of every mesh offset by its base vertex, for passes that work
/// on the merged vertex list.
pub fn absolute_indices(meshes: &[Mesh], indices: &[u32]) -> Vec<u32> {
    meshes
        .iter()
        .flat_map(|mesh| {
            let start = mesh.base_index as usize;
            let end = (start + mesh.num_indices as usize).min(indices.len());
            indices[start.min(end)..end]
                .iter()
                .map(move |i| (*i as i64 + mesh.base_vertex as i64) as u32)
        })
        .collect()
}

/// Converts right-handed asset data to the engine's left-handed space by
/// mirroring z. Mirroring flips the on-screen winding, so every triangle's
/// last two indices are swapped to keep front faces clockwise.
pub fn to_left_handed(vertices: &mut [SimpleVertex], indices: &mut [u32]) {
    for v in vertices.iter_mut() {
        v.position[2] = -v.position[2];
        v.normal[2] = -v.normal[2];
    }
    for triangle in indices.chunks_exact_mut(3) {
        triangle.swap(1, 2);
    }
}

/// Merges the meshes of an obj file into one geometry. Each tobj model
/// becomes a [`Mesh`] addressing its own index range.
pub fn merge_obj_meshes(models: &[tobj::Model], file_name: &str) -> (Geometry, Vec<Mesh>) {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    let mut meshes = Vec::with_capacity(models.len());

    for m in models {
        let mesh = &m.mesh;
        let base_vertex = vertices.len() as i32;
        let base_index = indices.len() as u32;
        vertices.extend((0..mesh.positions.len() / 3).map(|i| SimpleVertex {
            position: [
                mesh.positions[i * 3],
                mesh.positions[i * 3 + 1],
                mesh.positions[i * 3 + 2],
            ],
            tex_coords: [
                mesh.texcoords.get(i * 2).map_or(0.0, |f| *f),
                1.0 - mesh.texcoords.get(i * 2 + 1).map_or(0.0, |f| *f),
            ],
            normal: [
                mesh.normals.get(i * 3).map_or(0.0, |f| *f),
                mesh.normals.get(i * 3 + 1).map_or(0.0, |f| *f),
                mesh.normals.get(i * 3 + 2).map_or(0.0, |f| *f),
            ],
        }));
        indices.extend_from_slice(&mesh.indices);
        meshes.push(Mesh {
            name: if m.name.is_empty() {
                file_name.to_string()
            } else {
                m.name.clone()
            },
            num_indices: mesh.indices.len() as u32,
            base_index,
            base_vertex,
            material_index: mesh.material_id.unwrap_or(0),
        });
    }

    to_left_handed(&mut vertices, &mut indices);

    let normal_data = compute_normal_data(&vertices, &absolute_indices(&meshes, &indices));
    (
        Geometry::new(vertices, indices).with_normal_data(normal_data),
        meshes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<SimpleVertex>, Vec<u32>) {
        let n = [0.0, 0.0, -1.0];
        (
            vec![
                SimpleVertex::new([-1.0, 1.0, 0.0], [0.0, 0.0], n),
                SimpleVertex::new([1.0, 1.0, 0.0], [1.0, 0.0], n),
                SimpleVertex::new([1.0, -1.0, 0.0], [1.0, 1.0], n),
                SimpleVertex::new([-1.0, -1.0, 0.0], [0.0, 1.0], n),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn tangent_follows_u() {
        let (vertices, indices) = quad();
        let frames = compute_normal_data(&vertices, &indices);
        assert_eq!(frames.len(), 4);
        for frame in frames {
            assert!((frame.tangent[0] - 1.0).abs() < 1e-5);
            assert!((frame.bitangent[1] - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn degenerate_uvs_leave_default_frames() {
        let (mut vertices, indices) = quad();
        for v in &mut vertices {
            v.tex_coords = [0.5, 0.5];
        }
        let frames = compute_normal_data(&vertices, &indices);
        assert!(frames.iter().all(|f| *f == NormalData::default()));
    }

    #[test]
    fn merged_meshes_keep_their_ranges() {
        let mesh = |indices: Vec<u32>, material_id| tobj::Model {
            mesh: tobj::Mesh {
                positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                texcoords: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
                indices,
                material_id,
                ..Default::default()
            },
            name: String::new(),
        };
        let models = vec![mesh(vec![0, 1, 2], Some(1)), mesh(vec![2, 1, 0], None)];
        let (geometry, meshes) = merge_obj_meshes(&models, "pair.obj");
        assert_eq!(geometry.vertices.len(), 6);
        assert_eq!(geometry.indices.len(), 6);
        assert_eq!(meshes[1].base_index, 3);
        assert_eq!(meshes[1].base_vertex, 3);
        assert_eq!(meshes[0].material_index, 1);
        assert_eq!(meshes[1].material_index, 0);
        assert_eq!(meshes[0].name, "pair.obj");
        // flipped v coordinate
        assert_eq!(geometry.vertices[2].tex_coords, [0.0, 0.0]);
        assert_eq!(&geometry.indices[..3], &[0, 2, 1]);
    }

    #[test]
    fn left_handed_conversion_mirrors_z() {
        let mut vertices = vec![SimpleVertex::new([1.0, 2.0, 3.0], [0.0, 0.0], [0.0, 0.0, 1.0])];
        let mut indices = vec![0, 1, 2, 3, 4, 5];
        to_left_handed(&mut vertices, &mut indices);
        assert_eq!(vertices[0].position, [1.0, 2.0, -3.0]);
        assert_eq!(vertices[0].normal, [0.0, 0.0, -1.0]);
        assert_eq!(indices, vec![0, 2, 1, 3, 5, 4]);
    }
}
