//! Mesh identities, vertex formats and spatial transforms.
//!
//! Geometry itself lives outside this crate (on the device, uploaded by the
//! host application). The scheduler only needs two things from a mesh:
//!
//! - [`MeshId`] - a stable identity, used to sort and batch drawables
//! - [`MeshFormat`] - the vertex layout, part of every pipeline identity
//!
//! [`MeshRegistry`] is the default [`MeshSource`]: a map from id to format.
//!
//! # Standard Vertex Layout
//!
//! [`MeshFormat::standard`] describes the interleaved layout most meshes use
//! (32 bytes per vertex):
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | normal    | Float32x3 | 12     | 1               |
//! | uv0       | Float32x2 | 24     | 2               |

use glam::{Mat4, Quat, Vec3};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Type-safe handle to a mesh owned by the host application.
///
/// This newtype wrapper prevents accidentally passing texture handles where
/// mesh handles are expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u64);

/// What a vertex attribute carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Normal,
    Tangent,
    Color,
    /// Texture coordinate set `n`.
    TexCoord(u32),
    Joints,
    Weights,
}

impl VertexSemantic {
    /// WGSL field name used by generated vertex input structs.
    pub fn field_name(&self) -> String {
        match self {
            Self::Position => "position".to_string(),
            Self::Normal => "normal".to_string(),
            Self::Tangent => "tangent".to_string(),
            Self::Color => "color".to_string(),
            Self::TexCoord(set) => format!("uv{set}"),
            Self::Joints => "joints".to_string(),
            Self::Weights => "weights".to_string(),
        }
    }
}

/// One attribute within an interleaved vertex buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: VertexSemantic,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
}

/// Vertex layout of a mesh. Part of every drawable's pipeline identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MeshFormat {
    pub attributes: SmallVec<[VertexAttribute; 6]>,
    pub stride: u64,
    pub topology: wgpu::PrimitiveTopology,
    pub index_format: Option<wgpu::IndexFormat>,
}

impl MeshFormat {
    /// Position, normal and one texcoord set, indexed with `u32`.
    pub fn standard() -> Self {
        Self::new()
            .attribute(VertexSemantic::Position, wgpu::VertexFormat::Float32x3)
            .attribute(VertexSemantic::Normal, wgpu::VertexFormat::Float32x3)
            .attribute(VertexSemantic::TexCoord(0), wgpu::VertexFormat::Float32x2)
            .indexed(wgpu::IndexFormat::Uint32)
    }

    /// An empty layout: no vertex buffers. Used by fullscreen passes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an attribute at the current end of the vertex.
    pub fn attribute(mut self, semantic: VertexSemantic, format: wgpu::VertexFormat) -> Self {
        self.attributes.push(VertexAttribute {
            semantic,
            format,
            offset: self.stride,
        });
        self.stride += format.size();
        self
    }

    pub fn indexed(mut self, format: wgpu::IndexFormat) -> Self {
        self.index_format = Some(format);
        self
    }

    pub fn topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Returns `true` if the layout has the given semantic.
    pub fn has(&self, semantic: VertexSemantic) -> bool {
        self.attributes.iter().any(|a| a.semantic == semantic)
    }

    /// Number of texture coordinate sets present.
    pub fn texcoord_sets(&self) -> u32 {
        self.attributes
            .iter()
            .filter_map(|a| match a.semantic {
                VertexSemantic::TexCoord(set) => Some(set + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// wgpu attributes with shader locations assigned in declaration order.
    pub fn wgpu_attributes(&self) -> Vec<wgpu::VertexAttribute> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(location, a)| wgpu::VertexAttribute {
                format: a.format,
                offset: a.offset,
                shader_location: location as u32,
            })
            .collect()
    }
}

/// Looks up the vertex format of a mesh.
pub trait MeshSource: Sync {
    fn mesh_format(&self, mesh: MeshId) -> Option<&MeshFormat>;
}

/// Map from [`MeshId`] to [`MeshFormat`].
///
/// # Example
///
/// ```
/// use phalanx::{MeshFormat, MeshRegistry, MeshSource};
///
/// let mut meshes = MeshRegistry::new();
/// let cube = meshes.add(MeshFormat::standard());
/// assert_eq!(meshes.mesh_format(cube), Some(&MeshFormat::standard()));
/// ```
#[derive(Default)]
pub struct MeshRegistry {
    formats: FxHashMap<MeshId, MeshFormat>,
    next_id: u64,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mesh format under a freshly allocated id.
    pub fn add(&mut self, format: MeshFormat) -> MeshId {
        let id = MeshId(self.next_id);
        self.next_id += 1;
        self.formats.insert(id, format);
        id
    }

    /// Registers a mesh format under an id chosen by the caller.
    pub fn insert(&mut self, id: MeshId, format: MeshFormat) {
        self.next_id = self.next_id.max(id.0 + 1);
        self.formats.insert(id, format);
    }

    pub fn remove(&mut self, id: MeshId) -> Option<MeshFormat> {
        self.formats.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl MeshSource for MeshRegistry {
    fn mesh_format(&self, mesh: MeshId) -> Option<&MeshFormat> {
        self.formats.get(&mesh)
    }
}

/// Position, rotation and scale of a drawable in world space.
///
/// ```
/// use phalanx::Transform;
/// use glam::{Quat, Vec3};
///
/// let transform = Transform::new()
///     .position(Vec3::new(0.0, 2.0, -5.0))
///     .rotation(Quat::from_rotation_y(0.5))
///     .uniform_scale(2.0);
/// assert_eq!(transform.scale, Vec3::splat(2.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Model matrix, applied as scale, then rotation, then translation.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_format_offsets() {
        let format = MeshFormat::standard();
        let offsets: Vec<u64> = format.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(format.stride, 32);
        assert_eq!(format.texcoord_sets(), 1);
    }

    #[test]
    fn formats_differ_by_attributes() {
        let with_color = MeshFormat::standard()
            .attribute(VertexSemantic::Color, wgpu::VertexFormat::Float32x4);
        assert_ne!(with_color, MeshFormat::standard());
        assert!(with_color.has(VertexSemantic::Color));
    }

    #[test]
    fn registry_insert_keeps_ids_unique() {
        let mut meshes = MeshRegistry::new();
        meshes.insert(MeshId(10), MeshFormat::standard());
        let next = meshes.add(MeshFormat::empty());
        assert_eq!(next, MeshId(11));
        assert_eq!(meshes.len(), 2);
    }

    #[test]
    fn transform_matrix_translates() {
        let t = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        let p = t.matrix().transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 2.0, 3.0));
    }
}
