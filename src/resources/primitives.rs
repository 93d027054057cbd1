//! Built-in geometry.

use cgmath::Vector3;

use crate::data_structures::drawable::Geometry;
use crate::data_structures::model::SimpleVertex;
use crate::resources::mesh::compute_normal_data;

/// Outward normal and up direction of each cube face.
const FACES: [([f32; 3], [f32; 3]); 6] = [
    ([0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 1.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, -1.0, 0.0], [0.0, 0.0, -1.0]),
];

fn cube_faces(inward: bool) -> (Vec<SimpleVertex>, Vec<u32>) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up) in FACES {
        let n = Vector3::from(normal);
        let v = Vector3::from(up);
        // screen right when looking at the face from outside (left-handed)
        let u = n.cross(v);
        let center = n * 0.5;
        let corners = [
            (center + (v - u) * 0.5, [0.0, 0.0]),
            (center + (u + v) * 0.5, [1.0, 0.0]),
            (center + (u - v) * 0.5, [1.0, 1.0]),
            (center - (u + v) * 0.5, [0.0, 1.0]),
        ];
        let base = vertices.len() as u32;
        let facing = if inward { -n } else { n };
        vertices.extend(
            corners
                .iter()
                .map(|(p, uv)| SimpleVertex::new((*p).into(), *uv, facing.into())),
        );
        // clockwise seen from the side the face points to
        let quad = if inward {
            [0, 2, 1, 0, 3, 2]
        } else {
            [0, 1, 2, 0, 2, 3]
        };
        indices.extend(quad.iter().map(|i| base + i));
    }
    (vertices, indices)
}

/// A unit cube centred on the origin with per-face normals and tangents.
pub fn cube() -> Geometry {
    let (vertices, indices) = cube_faces(false);
    let normal_data = compute_normal_data(&vertices, &indices);
    Geometry::new(vertices, indices).with_normal_data(normal_data)
}

/// A unit cube seen from inside.
pub fn sky_cube() -> Geometry {
    let (vertices, indices) = cube_faces(true);
    Geometry::new(vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::InnerSpace;

    fn winding_normal(vertices: &[SimpleVertex], tri: &[u32]) -> Vector3<f32> {
        let p = |i: u32| Vector3::from(vertices[i as usize].position);
        let (a, b, c) = (p(tri[0]), p(tri[1]), p(tri[2]));
        // points towards the side the triangle is clockwise from
        (b - a).cross(c - a)
    }

    #[test]
    fn cube_triangles_face_outward() {
        let geometry = cube();
        assert_eq!(geometry.vertices.len(), 24);
        assert_eq!(geometry.indices.len(), 36);
        for tri in geometry.indices.chunks(3) {
            let facing = winding_normal(&geometry.vertices, tri);
            let normal = Vector3::from(geometry.vertices[tri[0] as usize].normal);
            assert!(facing.dot(normal) > 0.0);
        }
    }

    #[test]
    fn sky_cube_faces_inward() {
        let geometry = sky_cube();
        assert!(geometry.normal_data.is_none());
        for tri in geometry.indices.chunks(3) {
            let facing = winding_normal(&geometry.vertices, tri);
            let corner = Vector3::from(geometry.vertices[tri[0] as usize].position);
            assert!(facing.dot(corner) < 0.0);
            let normal = Vector3::from(geometry.vertices[tri[0] as usize].normal);
            assert!(normal.dot(corner) < 0.0);
        }
    }

    #[test]
    fn cube_tangents_are_unit_length() {
        let geometry = cube();
        let frames = geometry.normal_data.unwrap();
        assert_eq!(frames.len(), 24);
        for frame in frames {
            assert!((Vector3::from(frame.tangent).magnitude() - 1.0).abs() < 1e-4);
        }
    }
}
