//! Features: reusable bundles of parameters, shader code and pipeline state.
//!
//! A [`Feature`] can be attached to a whole drawables step or to a single
//! drawable. It declares:
//!
//! - **Parameters** - named scalar/vector/matrix values with defaults, packed
//!   per object into the parameter buffer
//! - **Textures** - named texture slots with a default texcoord set
//! - **Entry points** - shader snippets with named dependencies on other
//!   entry points, handed to the shader generator in dependency order
//! - **Pipeline state** - partial depth/blend/cull settings, combined across
//!   all features of a pipeline
//!
//! Features are immutable once built and carry a precomputed content hash,
//! so pipeline identities never depend on pointer identity.
//!
//! # Example
//!
//! ```
//! use phalanx::{EntryPoint, Feature, ParameterValue, PipelineState, ShaderStage, Toggle};
//! use glam::Vec4;
//!
//! let tint = Feature::builder("tint")
//!     .parameter("tint_color", ParameterValue::Vec4(Vec4::ONE))
//!     .texture("albedo", 0)
//!     .entry_point(EntryPoint::new("apply_tint", ShaderStage::Fragment, "color = color * tint_color;"))
//!     .state(PipelineState::default().depth_write(Toggle::Enable))
//!     .build();
//! assert_eq!(tint.parameters().len(), 1);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::hash::{Hash128, hash_f32_slice};

/// Shared, immutable feature reference.
pub type FeatureRef = Arc<Feature>;

/// Type of a feature parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl ParameterType {
    /// Size in bytes of the packed value.
    pub fn size(self) -> u64 {
        match self {
            Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }

    /// Storage-buffer alignment in bytes (WGSL host-shareable rules).
    pub fn align(self) -> u64 {
        match self {
            Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }

    pub fn wgsl(self) -> &'static str {
        match self {
            Self::Float => "f32",
            Self::Vec2 => "vec2<f32>",
            Self::Vec3 => "vec3<f32>",
            Self::Vec4 => "vec4<f32>",
            Self::Mat4 => "mat4x4<f32>",
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wgsl())
    }
}

/// A parameter value, either a declared default or a per-drawable override.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParameterValue {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl ParameterValue {
    pub fn ty(&self) -> ParameterType {
        match self {
            Self::Float(_) => ParameterType::Float,
            Self::Vec2(_) => ParameterType::Vec2,
            Self::Vec3(_) => ParameterType::Vec3,
            Self::Vec4(_) => ParameterType::Vec4,
            Self::Mat4(_) => ParameterType::Mat4,
        }
    }

    /// Writes the value into `dst` as little-endian floats.
    ///
    /// `dst` must be exactly `self.ty().size()` bytes long.
    pub fn write_to(&self, dst: &mut [u8]) {
        match self {
            Self::Float(v) => dst.copy_from_slice(bytemuck::bytes_of(v)),
            Self::Vec2(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Vec3(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Vec4(v) => dst.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            Self::Mat4(m) => dst.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }

    fn floats(&self) -> Vec<f32> {
        match self {
            Self::Float(v) => vec![*v],
            Self::Vec2(v) => v.to_array().to_vec(),
            Self::Vec3(v) => v.to_array().to_vec(),
            Self::Vec4(v) => v.to_array().to_vec(),
            Self::Mat4(m) => m.to_cols_array().to_vec(),
        }
    }
}

impl Hash for ParameterValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty().hash(state);
        hash_f32_slice(&self.floats(), state);
    }
}

/// A named parameter with its default value. The type is the default's type.
#[derive(Clone, Debug, PartialEq, Hash)]
pub struct ParameterDecl {
    pub name: String,
    pub default: ParameterValue,
}

impl ParameterDecl {
    pub fn ty(&self) -> ParameterType {
        self.default.ty()
    }
}

/// A named texture slot sampled with `default_texcoord` unless the drawable
/// binds it to another set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureDecl {
    pub name: String,
    pub default_texcoord: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// A shader snippet contributed by a feature.
///
/// `dependencies` name other entry points (from any feature in the same
/// pipeline) that must run before this one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStage,
    pub dependencies: Vec<String>,
    pub source: String,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage,
            dependencies: Vec::new(),
            source: source.into(),
        }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// Tri-state flag used when combining pipeline state across features.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Toggle {
    /// Leave the flag to other features.
    #[default]
    Inherit,
    Enable,
    /// Forces the flag off regardless of other features.
    Disable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Alpha,
    Premultiplied,
    Additive,
}

impl BlendMode {
    pub fn to_wgpu(self) -> Option<wgpu::BlendState> {
        match self {
            Self::Opaque => None,
            Self::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
            Self::Premultiplied => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            Self::Additive => Some(wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

impl CullMode {
    pub fn to_wgpu(self) -> Option<wgpu::Face> {
        match self {
            Self::None => None,
            Self::Front => Some(wgpu::Face::Front),
            Self::Back => Some(wgpu::Face::Back),
        }
    }
}

/// Partial pipeline state contributed by one feature.
///
/// `None` / [`Toggle::Inherit`] fields leave the setting to other features.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub depth_write: Toggle,
    pub depth_test: Toggle,
    pub depth_compare: Option<wgpu::CompareFunction>,
    pub blend: Option<BlendMode>,
    pub color_write: Option<wgpu::ColorWrites>,
    pub cull: Option<CullMode>,
}

impl PipelineState {
    pub fn depth_write(mut self, toggle: Toggle) -> Self {
        self.depth_write = toggle;
        self
    }

    pub fn depth_test(mut self, toggle: Toggle) -> Self {
        self.depth_test = toggle;
        self
    }

    pub fn depth_compare(mut self, compare: wgpu::CompareFunction) -> Self {
        self.depth_compare = Some(compare);
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn color_write(mut self, mask: wgpu::ColorWrites) -> Self {
        self.color_write = Some(mask);
        self
    }

    pub fn cull(mut self, cull: CullMode) -> Self {
        self.cull = Some(cull);
        self
    }
}

/// An immutable feature. Build one with [`Feature::builder`].
#[derive(Debug)]
pub struct Feature {
    name: String,
    parameters: Vec<ParameterDecl>,
    textures: Vec<TextureDecl>,
    entry_points: Vec<EntryPoint>,
    state: PipelineState,
    content_hash: Hash128,
}

impl Feature {
    pub fn builder(name: impl Into<String>) -> FeatureBuilder {
        FeatureBuilder {
            name: name.into(),
            parameters: Vec::new(),
            textures: Vec::new(),
            entry_points: Vec::new(),
            state: PipelineState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterDecl] {
        &self.parameters
    }

    pub fn textures(&self) -> &[TextureDecl] {
        &self.textures
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Deterministic hash of everything the feature declares.
    pub fn content_hash(&self) -> Hash128 {
        self.content_hash
    }
}

impl Hash for Feature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.content_hash.hash(state);
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash == other.content_hash
    }
}

impl Eq for Feature {}

/// Fluent builder for [`Feature`].
pub struct FeatureBuilder {
    name: String,
    parameters: Vec<ParameterDecl>,
    textures: Vec<TextureDecl>,
    entry_points: Vec<EntryPoint>,
    state: PipelineState,
}

impl FeatureBuilder {
    /// Declares a parameter. Re-declaring a name replaces the earlier declaration.
    pub fn parameter(mut self, name: impl Into<String>, default: ParameterValue) -> Self {
        let name = name.into();
        self.parameters.retain(|p| p.name != name);
        self.parameters.push(ParameterDecl { name, default });
        self
    }

    pub fn texture(mut self, name: impl Into<String>, default_texcoord: u32) -> Self {
        let name = name.into();
        self.textures.retain(|t| t.name != name);
        self.textures.push(TextureDecl {
            name,
            default_texcoord,
        });
        self
    }

    pub fn entry_point(mut self, entry_point: EntryPoint) -> Self {
        self.entry_points.push(entry_point);
        self
    }

    pub fn state(mut self, state: PipelineState) -> Self {
        self.state = state;
        self
    }

    pub fn build(self) -> FeatureRef {
        let content_hash = Hash128::of(&(
            &self.name,
            &self.parameters,
            &self.textures,
            &self.entry_points,
            &self.state,
        ));
        Arc::new(Feature {
            name: self.name,
            parameters: self.parameters,
            textures: self.textures,
            entry_points: self.entry_points,
            state: self.state,
            content_hash,
        })
    }
}
