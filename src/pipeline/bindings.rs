//! Buffer bindings of a pipeline: record layouts and bind group layouts.
//!
//! Each pipeline reads two buffers:
//!
//! | Group | Binding | Contents                                   | Scope      |
//! |-------|---------|--------------------------------------------|------------|
//! | 0     | 0       | `array<ObjectData>`, one record per object | per-object |
//! | 0     | 1..n    | feature textures, then one sampler         | per-object |
//! | 1     | 0       | `ViewData` (view, projection, camera, time)| per-view   |
//!
//! Records use WGSL host-shareable layout rules: every field is aligned to
//! its type's alignment and the record stride is rounded up to the largest
//! field alignment, so a record array can be indexed by sorted drawable
//! index on the shader side.

use rustc_hash::FxHashMap;

use crate::error::PipelineError;
use crate::feature::{FeatureRef, ParameterType, ParameterValue};
use glam::{Mat4, Vec3};

/// Name of the per-object world transform.
pub const WORLD: &str = "world";

/// Built-in per-view fields, in record order.
pub const VIEW_FIELDS: [(&str, ParameterType); 5] = [
    ("view", ParameterType::Mat4),
    ("projection", ParameterType::Mat4),
    ("view_projection", ParameterType::Mat4),
    ("camera_position", ParameterType::Vec3),
    ("time", ParameterType::Float),
];

/// Bumped whenever the built-in binding set changes, so pipeline identities
/// computed against an older set never collide with new ones.
pub const BUILTIN_VERSION: u32 = 1;

/// Buffer a field is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferScope {
    PerObject,
    PerView,
}

/// Where a field's value comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldSource {
    Builtin,
    Feature(String),
}

/// One field of a buffer record.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferField {
    pub name: String,
    pub ty: ParameterType,
    pub offset: u64,
    pub default: ParameterValue,
    pub source: FieldSource,
}

/// Field offsets, record size and array stride of one buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferLayout {
    pub fields: Vec<BufferField>,
    /// Bytes up to the end of the last field.
    pub size: u64,
    /// Distance between consecutive records.
    pub stride: u64,
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

impl BufferLayout {
    /// Lays out `(name, default, source)` fields in order.
    pub fn new(fields: impl IntoIterator<Item = (String, ParameterValue, FieldSource)>) -> Self {
        let mut out = Vec::new();
        let mut cursor = 0;
        let mut max_align = 4;
        for (name, default, source) in fields {
            let ty = default.ty();
            let offset = align_up(cursor, ty.align());
            cursor = offset + ty.size();
            max_align = max_align.max(ty.align());
            out.push(BufferField {
                name,
                ty,
                offset,
                default,
                source,
            });
        }
        Self {
            fields: out,
            size: cursor,
            stride: align_up(cursor, max_align),
        }
    }

    pub fn field(&self, name: &str) -> Option<&BufferField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Re-lays out the layout keeping only fields `keep` accepts.
    pub fn retain(&self, mut keep: impl FnMut(&BufferField) -> bool) -> Self {
        Self::new(
            self.fields
                .iter()
                .filter(|f| keep(f))
                .map(|f| (f.name.clone(), f.default, f.source.clone())),
        )
    }

    /// One record filled with every field's default.
    pub fn default_record(&self) -> Vec<u8> {
        let mut record = vec![0u8; self.stride as usize];
        for field in &self.fields {
            let start = field.offset as usize;
            field
                .default
                .write_to(&mut record[start..start + field.ty.size() as usize]);
        }
        record
    }
}

/// A texture slot with the texcoord set it samples.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureSlot {
    pub name: String,
    pub texcoord: u32,
}

/// All bindings a pipeline can read, before or after unused ones are dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingSet {
    pub object: BufferLayout,
    pub view: BufferLayout,
    pub textures: Vec<TextureSlot>,
}

impl BindingSet {
    /// Names of every field and texture, for usage analysis.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.object
            .fields
            .iter()
            .chain(&self.view.fields)
            .map(|f| f.name.as_str())
            .chain(self.textures.iter().map(|t| t.name.as_str()))
    }

    /// Drops fields and textures `used` rejects. Built-in per-view fields stay,
    /// since the per-view buffer is shared by every pipeline.
    pub fn optimize(&self, used: impl Fn(&str) -> bool) -> Self {
        Self {
            object: self.object.retain(|f| used(&f.name)),
            view: self.view.clone(),
            textures: self
                .textures
                .iter()
                .filter(|t| used(&t.name))
                .cloned()
                .collect(),
        }
    }

    /// Bind group 0: object records, textures and one sampler.
    pub fn object_group(&self) -> Vec<LayoutEntry> {
        let mut entries = Vec::new();
        let mut binding = 0;
        if !self.object.is_empty() {
            entries.push(LayoutEntry {
                binding,
                kind: BindingKind::ObjectBuffer {
                    stride: self.object.stride,
                },
            });
            binding += 1;
        }
        for texture in &self.textures {
            entries.push(LayoutEntry {
                binding,
                kind: BindingKind::Texture {
                    name: texture.name.clone(),
                },
            });
            binding += 1;
        }
        if !self.textures.is_empty() {
            entries.push(LayoutEntry {
                binding,
                kind: BindingKind::Sampler,
            });
        }
        entries
    }

    /// Bind group 1: the per-view uniform buffer.
    pub fn view_group(&self) -> Vec<LayoutEntry> {
        vec![LayoutEntry {
            binding: 0,
            kind: BindingKind::ViewBuffer {
                size: self.view.stride,
            },
        }]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Read-only storage buffer of object records.
    ObjectBuffer { stride: u64 },
    /// Uniform buffer of per-view data.
    ViewBuffer { size: u64 },
    Texture { name: String },
    Sampler,
}

/// One entry of a bind group layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LayoutEntry {
    pub binding: u32,
    pub kind: BindingKind,
}

/// Per-view record layout shared by all pipelines.
pub fn view_layout() -> BufferLayout {
    BufferLayout::new(VIEW_FIELDS.iter().map(|(name, ty)| {
        let default = match ty {
            ParameterType::Mat4 => ParameterValue::Mat4(Mat4::IDENTITY),
            ParameterType::Vec3 => ParameterValue::Vec3(Vec3::ZERO),
            _ => ParameterValue::Float(0.0),
        };
        (name.to_string(), default, FieldSource::Builtin)
    }))
}

/// Collects built-ins, then feature parameters in feature order.
///
/// `per_object_builtins` adds the world transform; fullscreen pipelines have
/// no object transform. A parameter redeclared with the same type keeps its
/// first position and takes the later default.
///
/// # Errors
///
/// [`PipelineError::ParameterConflict`] when two features, or a feature and
/// a built-in, declare the same name with different types.
pub fn collect_bindings(features: &[FeatureRef], per_object_builtins: bool) -> Result<BindingSet, PipelineError> {
    let view = view_layout();
    let mut fields: Vec<(String, ParameterValue, FieldSource)> = Vec::new();
    let mut index: FxHashMap<String, usize> = FxHashMap::default();

    if per_object_builtins {
        index.insert(WORLD.to_string(), 0);
        fields.push((
            WORLD.to_string(),
            ParameterValue::Mat4(Mat4::IDENTITY),
            FieldSource::Builtin,
        ));
    }

    for feature in features {
        for param in feature.parameters() {
            if let Some(builtin) = view.field(&param.name) {
                if builtin.ty != param.ty() {
                    return Err(conflict(&param.name, builtin.ty, "built-in", param.ty(), feature.name()));
                }
                continue;
            }
            match index.get(&param.name) {
                Some(&i) => {
                    let (_, existing, source) = &fields[i];
                    if existing.ty() != param.ty() {
                        let owner = match source {
                            FieldSource::Builtin => "built-in",
                            FieldSource::Feature(name) => name.as_str(),
                        };
                        return Err(conflict(&param.name, existing.ty(), owner, param.ty(), feature.name()));
                    }
                    if fields[i].2 != FieldSource::Builtin {
                        fields[i].1 = param.default;
                        fields[i].2 = FieldSource::Feature(feature.name().to_string());
                    }
                }
                None => {
                    index.insert(param.name.clone(), fields.len());
                    fields.push((
                        param.name.clone(),
                        param.default,
                        FieldSource::Feature(feature.name().to_string()),
                    ));
                }
            }
        }
    }

    Ok(BindingSet {
        object: BufferLayout::new(fields),
        view,
        textures: collect_textures(features),
    })
}

/// Texture slots of `features`, deduplicated by name; a later declaration
/// overrides the texcoord set.
pub fn collect_textures(features: &[FeatureRef]) -> Vec<TextureSlot> {
    let mut slots: Vec<TextureSlot> = Vec::new();
    for feature in features {
        for texture in feature.textures() {
            match slots.iter_mut().find(|s| s.name == texture.name) {
                Some(slot) => slot.texcoord = texture.default_texcoord,
                None => slots.push(TextureSlot {
                    name: texture.name.clone(),
                    texcoord: texture.default_texcoord,
                }),
            }
        }
    }
    slots
}

fn conflict(name: &str, first: ParameterType, first_feature: &str, second: ParameterType, second_feature: &str) -> PipelineError {
    PipelineError::ParameterConflict {
        name: name.to_string(),
        first: first.to_string(),
        first_feature: first_feature.to_string(),
        second: second.to_string(),
        second_feature: second_feature.to_string(),
    }
}
