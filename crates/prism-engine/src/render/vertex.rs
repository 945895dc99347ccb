//! Interleaved vertex layout shared by both backends.
//!
//! Every shape is uploaded as one tightly packed buffer of
//! `position[3] | normal[3]? | tex_coord[2]?`. Channels a shape does not have
//! are read from a one-element per-instance buffer ([`DEFAULT_ATTRIBUTES`])
//! bound at slot 1, so all shading programs see the same three inputs.

use crate::scene::Shape;

pub const POSITION_LOCATION: u32 = 0;
pub const NORMAL_LOCATION: u32 = 1;
pub const TEX_COORD_LOCATION: u32 = 2;

/// Vertex buffer slot of the interleaved shape data.
pub const VERTEX_SLOT: u32 = 0;
/// Vertex buffer slot of [`DEFAULT_ATTRIBUTES`].
pub const DEFAULTS_SLOT: u32 = 1;

/// Values for absent channels: a zero normal and a (0, 0) texture coordinate.
pub const DEFAULT_ATTRIBUTES: [f32; 5] = [0.0; 5];
const DEFAULT_NORMAL_OFFSET: u32 = 0;
const DEFAULT_TEX_COORD_OFFSET: u32 = 12;
pub const DEFAULTS_STRIDE: u32 = std::mem::size_of::<[f32; 5]>() as u32;

const F32: u32 = std::mem::size_of::<f32>() as u32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AttributeFormat {
    Float32x2,
    Float32x3,
}

/// Where a shader input is read from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AttributeSlot {
    pub location: u32,
    /// [`VERTEX_SLOT`] or [`DEFAULTS_SLOT`].
    pub binding: u32,
    pub offset: u32,
    pub format: AttributeFormat,
}

/// Which optional channels a shape carries.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct VertexLayout {
    pub has_normals: bool,
    pub has_tex_coords: bool,
}

impl VertexLayout {
    /// Every layout; pipelines are prepared for each of them.
    pub const ALL: [VertexLayout; 4] = [
        VertexLayout { has_normals: false, has_tex_coords: false },
        VertexLayout { has_normals: true, has_tex_coords: false },
        VertexLayout { has_normals: false, has_tex_coords: true },
        VertexLayout { has_normals: true, has_tex_coords: true },
    ];

    pub fn of(shape: &Shape) -> Self {
        Self {
            has_normals: !shape.normals().is_empty(),
            has_tex_coords: !shape.tex_coords().is_empty(),
        }
    }

    /// 3, 5, 6 or 8.
    pub fn floats_per_vertex(self) -> u32 {
        3 + if self.has_normals { 3 } else { 0 } + if self.has_tex_coords { 2 } else { 0 }
    }

    /// Byte stride of the interleaved buffer.
    pub fn stride(self) -> u32 {
        self.floats_per_vertex() * F32
    }

    /// True when some input comes from the defaults buffer.
    pub fn needs_defaults(self) -> bool {
        !(self.has_normals && self.has_tex_coords)
    }

    /// Position, normal and texture coordinate inputs, in location order.
    pub fn attributes(self) -> [AttributeSlot; 3] {
        let position = AttributeSlot {
            location: POSITION_LOCATION,
            binding: VERTEX_SLOT,
            offset: 0,
            format: AttributeFormat::Float32x3,
        };

        let mut offset = 3 * F32;

        let normal = if self.has_normals {
            let slot = AttributeSlot {
                location: NORMAL_LOCATION,
                binding: VERTEX_SLOT,
                offset,
                format: AttributeFormat::Float32x3,
            };
            offset += 3 * F32;
            slot
        } else {
            AttributeSlot {
                location: NORMAL_LOCATION,
                binding: DEFAULTS_SLOT,
                offset: DEFAULT_NORMAL_OFFSET,
                format: AttributeFormat::Float32x3,
            }
        };

        let tex_coord = if self.has_tex_coords {
            AttributeSlot {
                location: TEX_COORD_LOCATION,
                binding: VERTEX_SLOT,
                offset,
                format: AttributeFormat::Float32x2,
            }
        } else {
            AttributeSlot {
                location: TEX_COORD_LOCATION,
                binding: DEFAULTS_SLOT,
                offset: DEFAULT_TEX_COORD_OFFSET,
                format: AttributeFormat::Float32x2,
            }
        };

        [position, normal, tex_coord]
    }
}

/// Packs a shape's channels into one interleaved float array.
pub fn interleave(shape: &Shape) -> Vec<f32> {
    let layout = VertexLayout::of(shape);
    let mut data = Vec::with_capacity(shape.vertex_count() * layout.floats_per_vertex() as usize);

    for (i, p) in shape.vertices().iter().enumerate() {
        data.extend_from_slice(&p.to_array());
        if let Some(n) = shape.normals().get(i) {
            data.extend_from_slice(&n.to_array());
        }
        if let Some(t) = shape.tex_coords().get(i) {
            data.extend_from_slice(&t.to_array());
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3};

    use super::*;

    fn shape(normals: bool, uvs: bool) -> Shape {
        let v = vec![Vec3::new(1.0, 2.0, 3.0), Vec3::X, Vec3::Y];
        let n = if normals { vec![Vec3::Z; 3] } else { vec![] };
        let t = if uvs { vec![Vec2::new(0.25, 0.75); 3] } else { vec![] };
        Shape::new("s", v, n, t).unwrap()
    }

    #[test]
    fn stride_follows_present_channels() {
        let strides: Vec<u32> = VertexLayout::ALL.iter().map(|l| l.floats_per_vertex()).collect();
        assert_eq!(strides, vec![3, 6, 5, 8]);
        assert_eq!(VertexLayout::of(&shape(true, true)).stride(), 32);
    }

    #[test]
    fn interleave_orders_position_normal_uv() {
        let data = interleave(&shape(true, true));
        assert_eq!(data.len(), 24);
        assert_eq!(&data[..8], &[1.0, 2.0, 3.0, 0.0, 0.0, 1.0, 0.25, 0.75]);

        let data = interleave(&shape(false, true));
        assert_eq!(&data[..5], &[1.0, 2.0, 3.0, 0.25, 0.75]);

        assert_eq!(interleave(&shape(false, false)).len(), 9);
    }

    #[test]
    fn missing_channels_read_from_defaults() {
        let [pos, normal, uv] = VertexLayout::of(&shape(false, true)).attributes();
        assert_eq!((pos.binding, pos.offset), (VERTEX_SLOT, 0));
        assert_eq!(normal.binding, DEFAULTS_SLOT);
        assert_eq!((uv.binding, uv.offset), (VERTEX_SLOT, 12));

        let [_, normal, uv] = VertexLayout::of(&shape(true, false)).attributes();
        assert_eq!((normal.binding, normal.offset), (VERTEX_SLOT, 12));
        assert_eq!((uv.binding, uv.offset), (DEFAULTS_SLOT, DEFAULT_TEX_COORD_OFFSET));

        assert!(!VertexLayout::of(&shape(true, true)).needs_defaults());
    }
}
