//! Procedural meshes used by the viewer and the tests.

use glam::{Vec2, Vec3};

use super::{Model, Shape};

/// Axis-aligned cube centred on the origin, with face normals and per-face UVs.
pub fn cube(size: f32) -> Shape {
    let h = size * 0.5;
    // (normal, u axis, v axis) per face; corners are n*h ± u*h ± v*h.
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(36);
    let mut normals = Vec::with_capacity(36);
    let mut uvs = Vec::with_capacity(36);

    for (n, u, v) in faces {
        let corner = |a: f32, b: f32| (n + u * a + v * b) * h;
        let quad = [
            (corner(-1.0, -1.0), Vec2::new(0.0, 0.0)),
            (corner(1.0, -1.0), Vec2::new(1.0, 0.0)),
            (corner(1.0, 1.0), Vec2::new(1.0, 1.0)),
            (corner(-1.0, 1.0), Vec2::new(0.0, 1.0)),
        ];
        for i in [0, 1, 2, 0, 2, 3] {
            vertices.push(quad[i].0);
            normals.push(n);
            uvs.push(quad[i].1);
        }
    }

    Shape::from_trusted("cube", vertices, normals, uvs)
}

/// Square on the XZ plane facing +Y, without normals or UVs.
pub fn plane(size: f32) -> Shape {
    let h = size * 0.5;
    let a = Vec3::new(-h, 0.0, h);
    let b = Vec3::new(h, 0.0, h);
    let c = Vec3::new(h, 0.0, -h);
    let d = Vec3::new(-h, 0.0, -h);
    Shape::from_trusted("plane", vec![a, b, c, a, c, d], vec![], vec![])
}

/// Single-shape model wrapping [`cube`].
pub fn cube_model(name: &str, size: f32) -> Model {
    Model::new(name, vec![cube(size)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_all_channels() {
        let c = cube(2.0);
        assert_eq!(c.vertex_count(), 36);
        assert_eq!(c.normals().len(), 36);
        assert_eq!(c.tex_coords().len(), 36);
        assert!(c.vertices().iter().all(|v| v.abs().max_element() <= 1.0 + 1e-6));
    }

    #[test]
    fn cube_faces_wind_outward() {
        let c = cube(1.0);
        for (tri, n) in c.vertices().chunks_exact(3).zip(c.normals().iter().step_by(3)) {
            let face = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize();
            assert!(face.dot(*n) > 0.99, "{face:?} vs {n:?}");
        }
    }

    #[test]
    fn plane_is_positions_only() {
        let p = plane(4.0);
        assert_eq!(p.vertex_count(), 6);
        assert!(p.normals().is_empty());
        assert!(p.tex_coords().is_empty());
    }
}
