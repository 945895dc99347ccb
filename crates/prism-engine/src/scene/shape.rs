use std::fmt;
use std::path::{Path, PathBuf};

use glam::{Vec2, Vec3};

/// Shape data rejected by [`Shape::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    /// Vertex count is not a multiple of 3.
    NotTriangleList { vertices: usize },
    NormalCountMismatch { vertices: usize, normals: usize },
    TexCoordCountMismatch { vertices: usize, tex_coords: usize },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::NotTriangleList { vertices } => {
                write!(f, "vertex count {vertices} is not a multiple of 3")
            }
            ShapeError::NormalCountMismatch { vertices, normals } => {
                write!(f, "{normals} normals for {vertices} vertices")
            }
            ShapeError::TexCoordCountMismatch { vertices, tex_coords } => {
                write!(f, "{tex_coords} texture coordinates for {vertices} vertices")
            }
        }
    }
}

impl std::error::Error for ShapeError {}

/// A triangle-list mesh with optional per-vertex normals and texture coordinates.
///
/// Optional channels are either empty or exactly as long as `vertices`.
#[derive(Debug, Clone)]
pub struct Shape {
    name: String,
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
    tex_coords: Vec<Vec2>,
    texture_path: Option<PathBuf>,
    visible: bool,
}

impl Shape {
    pub fn new(
        name: impl Into<String>,
        vertices: Vec<Vec3>,
        normals: Vec<Vec3>,
        tex_coords: Vec<Vec2>,
    ) -> Result<Self, ShapeError> {
        validate(&vertices, &normals, &tex_coords)?;
        Ok(Self::from_trusted(name, vertices, normals, tex_coords))
    }

    /// Skips validation; for meshes generated in-crate.
    pub(super) fn from_trusted(
        name: impl Into<String>,
        vertices: Vec<Vec3>,
        normals: Vec<Vec3>,
        tex_coords: Vec<Vec2>,
    ) -> Self {
        debug_assert!(validate(&vertices, &normals, &tex_coords).is_ok());
        Self {
            name: name.into(),
            vertices,
            normals,
            tex_coords,
            texture_path: None,
            visible: true,
        }
    }

    /// Builds a shape whose normals are the face normal of each triangle.
    ///
    /// Degenerate triangles get a zero normal; the shading programs derive a
    /// screen-space normal for those.
    pub fn with_flat_normals(
        name: impl Into<String>,
        vertices: Vec<Vec3>,
        tex_coords: Vec<Vec2>,
    ) -> Result<Self, ShapeError> {
        let normals = vertices
            .chunks_exact(3)
            .flat_map(|tri| {
                let n = (tri[1] - tri[0]).cross(tri[2] - tri[0]).normalize_or_zero();
                [n, n, n]
            })
            .collect();
        Self::new(name, vertices, normals, tex_coords)
    }

    pub fn with_texture(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.texture_path = if path.as_os_str().is_empty() { None } else { Some(path) };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn tex_coords(&self) -> &[Vec2] {
        &self.tex_coords
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Texture file for this shape. An empty path is stored as `None`.
    pub fn texture_path(&self) -> Option<&Path> {
        self.texture_path.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}

fn validate(vertices: &[Vec3], normals: &[Vec3], tex_coords: &[Vec2]) -> Result<(), ShapeError> {
    let n = vertices.len();
    if n % 3 != 0 {
        return Err(ShapeError::NotTriangleList { vertices: n });
    }
    if !normals.is_empty() && normals.len() != n {
        return Err(ShapeError::NormalCountMismatch { vertices: n, normals: normals.len() });
    }
    if !tex_coords.is_empty() && tex_coords.len() != n {
        return Err(ShapeError::TexCoordCountMismatch { vertices: n, tex_coords: tex_coords.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> Vec<Vec3> {
        vec![Vec3::ZERO, Vec3::X, Vec3::Y]
    }

    #[test]
    fn accepts_positions_only() {
        let s = Shape::new("t", tri(), vec![], vec![]).unwrap();
        assert_eq!(s.vertex_count(), 3);
        assert!(s.normals().is_empty());
        assert!(s.is_visible());
    }

    #[test]
    fn rejects_partial_triangle() {
        let err = Shape::new("t", vec![Vec3::ZERO, Vec3::X], vec![], vec![]).unwrap_err();
        assert_eq!(err, ShapeError::NotTriangleList { vertices: 2 });
    }

    #[test]
    fn rejects_mismatched_channels() {
        let err = Shape::new("t", tri(), vec![Vec3::Z], vec![]).unwrap_err();
        assert!(matches!(err, ShapeError::NormalCountMismatch { normals: 1, .. }));

        let err = Shape::new("t", tri(), vec![], vec![Vec2::ZERO; 4]).unwrap_err();
        assert!(matches!(err, ShapeError::TexCoordCountMismatch { tex_coords: 4, .. }));
    }

    #[test]
    fn flat_normals_follow_winding() {
        let s = Shape::with_flat_normals("t", tri(), vec![]).unwrap();
        assert_eq!(s.normals(), &[Vec3::Z, Vec3::Z, Vec3::Z]);
    }

    #[test]
    fn empty_texture_path_is_none() {
        let s = Shape::new("t", tri(), vec![], vec![]).unwrap().with_texture("");
        assert!(s.texture_path().is_none());

        let s = s.with_texture("wood.png");
        assert_eq!(s.texture_path(), Some(Path::new("wood.png")));
    }
}
