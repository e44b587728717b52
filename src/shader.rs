//! Shader generation interface and a reference WGSL generator.
//!
//! The pipeline builder treats shader generation as an external collaborator
//! with two phases:
//!
//! 1. [`ShaderGenerator::index`] reports which declared bindings the entry
//!    points actually reference, so unused buffer fields can be dropped
//! 2. [`ShaderGenerator::generate`] emits source for the final, minimal
//!    binding set
//!
//! [`WgslGenerator`] is a small generator that inlines each entry point's
//! source into `vs_main`/`fs_main` in dependency order. Entry points see:
//!
//! | Stage    | Variables                                                     |
//! |----------|---------------------------------------------------------------|
//! | vertex   | `world_position`, `normal` (when the mesh has normals)        |
//! | fragment | `color`, `world_position`, `uv0..uvN`, every object field     |
//!
//! plus `view_data` and every texture with `material_sampler`. Each texture
//! also gets `<name>_uv`, the texcoord set its slot samples; a set the mesh
//! lacks reads as zero.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::error::PipelineError;
use crate::feature::{EntryPoint, ShaderStage};
use crate::mesh::{MeshFormat, VertexSemantic};
use crate::pipeline::bindings::{BindingSet, FieldSource, WORLD};
use crate::pipeline::identity::PipelineKind;
use crate::render_graph::RenderTargetLayout;

/// Everything a generator sees for one pipeline.
pub struct ShaderRequest<'a> {
    pub kind: PipelineKind,
    pub bindings: &'a BindingSet,
    /// Sorted so every dependency precedes its dependents.
    pub entry_points: &'a [&'a EntryPoint],
    pub mesh: &'a MeshFormat,
    pub targets: &'a RenderTargetLayout,
}

/// Names of bindings referenced by a shader.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingUsage {
    pub names: BTreeSet<String>,
}

impl BindingUsage {
    pub fn uses(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Generated source plus reflection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedShader {
    pub source: String,
    pub vertex_entry: String,
    /// `None` for depth-only pipelines.
    pub fragment_entry: Option<String>,
    pub usage: BindingUsage,
}

/// Produces shader source for a binding set and sorted entry points.
pub trait ShaderGenerator: Send + Sync {
    /// Reports which bindings of `request.bindings` the shader would use.
    fn index(&self, request: &ShaderRequest<'_>) -> Result<BindingUsage, PipelineError>;

    /// Emits the shader for an already minimized binding set.
    fn generate(&self, request: &ShaderRequest<'_>) -> Result<GeneratedShader, PipelineError>;
}

/// Reference WGSL generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct WgslGenerator;

fn identifiers(source: &str) -> impl Iterator<Item = &str> {
    source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
}

fn vertex_type(format: wgpu::VertexFormat) -> Result<&'static str, PipelineError> {
    use wgpu::VertexFormat as F;
    Ok(match format {
        F::Float32 => "f32",
        F::Float32x2 | F::Unorm16x2 | F::Snorm16x2 | F::Float16x2 => "vec2<f32>",
        F::Float32x3 => "vec3<f32>",
        F::Float32x4 | F::Unorm8x4 | F::Snorm8x4 | F::Unorm16x4 | F::Float16x4 => "vec4<f32>",
        F::Uint32 => "u32",
        F::Uint8x4 | F::Uint16x4 | F::Uint32x4 => "vec4<u32>",
        other => {
            return Err(PipelineError::ShaderGeneration(format!(
                "unsupported vertex format {other:?}"
            )));
        }
    })
}

impl WgslGenerator {
    fn emit_bindings(out: &mut String, bindings: &BindingSet) -> Result<(), std::fmt::Error> {
        let mut binding = 0;
        if !bindings.object.is_empty() {
            writeln!(out, "struct ObjectData {{")?;
            for field in &bindings.object.fields {
                writeln!(out, "    {}: {},", field.name, field.ty.wgsl())?;
            }
            writeln!(out, "}};")?;
            writeln!(out, "@group(0) @binding({binding}) var<storage, read> objects: array<ObjectData>;")?;
            binding += 1;
        }
        for texture in &bindings.textures {
            writeln!(out, "@group(0) @binding({binding}) var {}: texture_2d<f32>;", texture.name)?;
            binding += 1;
        }
        if !bindings.textures.is_empty() {
            writeln!(out, "@group(0) @binding({binding}) var material_sampler: sampler;")?;
        }
        writeln!(out)?;
        writeln!(out, "struct ViewData {{")?;
        for field in &bindings.view.fields {
            writeln!(out, "    {}: {},", field.name, field.ty.wgsl())?;
        }
        writeln!(out, "}};")?;
        writeln!(out, "@group(1) @binding(0) var<uniform> view_data: ViewData;")?;
        writeln!(out)
    }

    fn emit_snippets(out: &mut String, entry_points: &[&EntryPoint], stage: ShaderStage) -> Result<(), std::fmt::Error> {
        for entry in entry_points.iter().filter(|e| e.stage == stage) {
            writeln!(out, "    // {}", entry.name)?;
            writeln!(out, "    {{")?;
            for line in entry.source.lines() {
                writeln!(out, "        {line}")?;
            }
            writeln!(out, "    }}")?;
        }
        Ok(())
    }

    fn emit(&self, request: &ShaderRequest<'_>) -> Result<String, PipelineError> {
        let texcoords = request.mesh.texcoord_sets();
        let has_normal = request.mesh.has(VertexSemantic::Normal);
        if request.kind == PipelineKind::Drawables && !request.mesh.has(VertexSemantic::Position) {
            return Err(PipelineError::ShaderGeneration(
                "mesh format has no position attribute".to_string(),
            ));
        }

        let mut inputs = Vec::new();
        for (location, attribute) in request.mesh.attributes.iter().enumerate() {
            inputs.push((location, attribute.semantic.field_name(), vertex_type(attribute.format)?));
        }

        let mut out = String::new();
        let fmt = |e: std::fmt::Error| PipelineError::ShaderGeneration(e.to_string());
        Self::emit_bindings(&mut out, request.bindings).map_err(fmt)?;
        self.emit_stages(&mut out, request, &inputs, texcoords, has_normal)
            .map_err(fmt)?;
        Ok(out)
    }

    fn emit_stages(
        &self,
        out: &mut String,
        request: &ShaderRequest<'_>,
        inputs: &[(usize, String, &str)],
        texcoords: u32,
        has_normal: bool,
    ) -> Result<(), std::fmt::Error> {
        let drawables = request.kind == PipelineKind::Drawables;
        let has_objects = !request.bindings.object.is_empty();

        // Vertex output.
        writeln!(out, "struct VertexOutput {{")?;
        writeln!(out, "    @builtin(position) clip_position: vec4<f32>,")?;
        writeln!(out, "    @location(0) @interpolate(flat) instance: u32,")?;
        writeln!(out, "    @location(1) world_position: vec3<f32>,")?;
        writeln!(out, "    @location(2) normal: vec3<f32>,")?;
        let uv_sets = if drawables { texcoords } else { 1 };
        for set in 0..uv_sets {
            writeln!(out, "    @location({}) uv{set}: vec2<f32>,", 3 + set)?;
        }
        writeln!(out, "}};")?;
        writeln!(out)?;

        if drawables {
            writeln!(out, "struct VertexInput {{")?;
            for (location, name, ty) in inputs {
                writeln!(out, "    @location({location}) {name}: {ty},")?;
            }
            writeln!(out, "}};")?;
            writeln!(out)?;
            writeln!(out, "@vertex")?;
            writeln!(out, "fn vs_main(in: VertexInput, @builtin(instance_index) instance: u32) -> VertexOutput {{")?;
            writeln!(out, "    let object = objects[instance];")?;
            writeln!(out, "    var world_position = (object.{WORLD} * vec4<f32>(in.position, 1.0)).xyz;")?;
            if has_normal {
                writeln!(out, "    var normal = normalize((object.{WORLD} * vec4<f32>(in.normal, 0.0)).xyz);")?;
            } else {
                writeln!(out, "    var normal = vec3<f32>(0.0, 0.0, 1.0);")?;
            }
            Self::emit_snippets(out, request.entry_points, ShaderStage::Vertex)?;
            writeln!(out, "    var out: VertexOutput;")?;
            writeln!(out, "    out.clip_position = view_data.view_projection * vec4<f32>(world_position, 1.0);")?;
            writeln!(out, "    out.instance = instance;")?;
            writeln!(out, "    out.world_position = world_position;")?;
            writeln!(out, "    out.normal = normal;")?;
            for set in 0..uv_sets {
                writeln!(out, "    out.uv{set} = in.uv{set};")?;
            }
            writeln!(out, "    return out;")?;
            writeln!(out, "}}")?;
        } else {
            writeln!(out, "@vertex")?;
            writeln!(out, "fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {{")?;
            writeln!(out, "    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));")?;
            writeln!(out, "    var out: VertexOutput;")?;
            writeln!(out, "    out.clip_position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);")?;
            writeln!(out, "    out.instance = 0u;")?;
            writeln!(out, "    out.world_position = vec3<f32>(0.0);")?;
            writeln!(out, "    out.normal = vec3<f32>(0.0, 0.0, 1.0);")?;
            writeln!(out, "    out.uv0 = uv;")?;
            writeln!(out, "    return out;")?;
            writeln!(out, "}}")?;
        }
        writeln!(out)?;

        if request.targets.colors.is_empty() {
            return Ok(());
        }

        writeln!(out, "struct FragmentOutput {{")?;
        for (i, _) in request.targets.colors.iter().enumerate() {
            writeln!(out, "    @location({i}) target{i}: vec4<f32>,")?;
        }
        writeln!(out, "}};")?;
        writeln!(out)?;
        writeln!(out, "@fragment")?;
        writeln!(out, "fn fs_main(in: VertexOutput) -> FragmentOutput {{")?;
        if has_objects {
            writeln!(out, "    let object = objects[in.instance];")?;
            for field in &request.bindings.object.fields {
                if matches!(field.source, FieldSource::Feature(_)) {
                    writeln!(out, "    let {0} = object.{0};", field.name)?;
                }
            }
        }
        writeln!(out, "    let world_position = in.world_position;")?;
        writeln!(out, "    let normal = in.normal;")?;
        for set in 0..uv_sets {
            writeln!(out, "    let uv{set} = in.uv{set};")?;
        }
        for texture in &request.bindings.textures {
            if texture.texcoord < uv_sets {
                writeln!(out, "    let {}_uv = uv{};", texture.name, texture.texcoord)?;
            } else {
                writeln!(out, "    let {}_uv = vec2<f32>(0.0);", texture.name)?;
            }
        }
        writeln!(out, "    var color = vec4<f32>(1.0);")?;
        Self::emit_snippets(out, request.entry_points, ShaderStage::Fragment)?;
        writeln!(out, "    var out: FragmentOutput;")?;
        for (i, _) in request.targets.colors.iter().enumerate() {
            writeln!(out, "    out.target{i} = color;")?;
        }
        writeln!(out, "    return out;")?;
        writeln!(out, "}}")
    }
}

impl ShaderGenerator for WgslGenerator {
    fn index(&self, request: &ShaderRequest<'_>) -> Result<BindingUsage, PipelineError> {
        let referenced: BTreeSet<&str> = request
            .entry_points
            .iter()
            .flat_map(|e| identifiers(&e.source))
            .flat_map(|id| [Some(id), id.strip_suffix("_uv")])
            .flatten()
            .collect();
        let mut names: BTreeSet<String> = request
            .bindings
            .names()
            .filter(|name| referenced.contains(name))
            .map(str::to_string)
            .collect();
        if request.kind == PipelineKind::Drawables {
            names.insert(WORLD.to_string());
            names.insert("view_projection".to_string());
        }
        Ok(BindingUsage { names })
    }

    fn generate(&self, request: &ShaderRequest<'_>) -> Result<GeneratedShader, PipelineError> {
        let source = self.emit(request)?;
        Ok(GeneratedShader {
            source,
            vertex_entry: "vs_main".to_string(),
            fragment_entry: (!request.targets.colors.is_empty()).then(|| "fs_main".to_string()),
            usage: self.index(request)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, ParameterValue};
    use crate::pipeline::bindings::collect_bindings;
    use crate::render_graph::{AttachmentLayout, LoadOp, StoreOp};
    use glam::Vec4;
    use smallvec::smallvec;

    fn targets() -> RenderTargetLayout {
        RenderTargetLayout {
            colors: smallvec![AttachmentLayout {
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                load: LoadOp::Clear,
                store: StoreOp::Store,
            }],
            depth: None,
            sample_count: 1,
        }
    }

    #[test]
    fn index_reports_referenced_bindings() {
        let feature = Feature::builder("tint")
            .parameter("tint", ParameterValue::Vec4(Vec4::ONE))
            .parameter("unused_gloss", ParameterValue::Float(0.5))
            .texture("albedo", 0)
            .build();
        let entry = EntryPoint::new(
            "shade",
            ShaderStage::Fragment,
            "color = textureSample(albedo, material_sampler, uv0) * tint;",
        );
        let bindings = collect_bindings(std::slice::from_ref(&feature), true).unwrap();
        let mesh = MeshFormat::standard();
        let targets = targets();
        let request = ShaderRequest {
            kind: PipelineKind::Drawables,
            bindings: &bindings,
            entry_points: &[&entry],
            mesh: &mesh,
            targets: &targets,
        };
        let usage = WgslGenerator.index(&request).unwrap();
        assert!(usage.uses("tint"));
        assert!(usage.uses("albedo"));
        assert!(usage.uses("world"));
        assert!(!usage.uses("unused_gloss"));
    }

    #[test]
    fn generates_both_stages() {
        let bindings = collect_bindings(&[], true).unwrap();
        let mesh = MeshFormat::standard();
        let targets = targets();
        let request = ShaderRequest {
            kind: PipelineKind::Drawables,
            bindings: &bindings,
            entry_points: &[],
            mesh: &mesh,
            targets: &targets,
        };
        let shader = WgslGenerator.generate(&request).unwrap();
        assert!(shader.source.contains("fn vs_main"));
        assert!(shader.source.contains("fn fs_main"));
        assert!(shader.source.contains("@location(2) uv0: vec2<f32>"));
        assert_eq!(shader.fragment_entry.as_deref(), Some("fs_main"));
    }

    #[test]
    fn drawables_need_positions() {
        let bindings = collect_bindings(&[], true).unwrap();
        let mesh = MeshFormat::empty();
        let targets = targets();
        let request = ShaderRequest {
            kind: PipelineKind::Drawables,
            bindings: &bindings,
            entry_points: &[],
            mesh: &mesh,
            targets: &targets,
        };
        assert!(matches!(
            WgslGenerator.generate(&request),
            Err(PipelineError::ShaderGeneration(_))
        ));
    }

    fn albedo_source(texcoord: u32) -> String {
        let feature = Feature::builder("albedo").texture("albedo", texcoord).build();
        let entry = EntryPoint::new(
            "sample",
            ShaderStage::Fragment,
            "color = textureSample(albedo, material_sampler, albedo_uv);",
        );
        let bindings = collect_bindings(std::slice::from_ref(&feature), true).unwrap();
        let mesh = MeshFormat::standard().attribute(VertexSemantic::TexCoord(1), wgpu::VertexFormat::Float32x2);
        let targets = targets();
        let request = ShaderRequest {
            kind: PipelineKind::Drawables,
            bindings: &bindings,
            entry_points: &[&entry],
            mesh: &mesh,
            targets: &targets,
        };
        WgslGenerator.generate(&request).unwrap().source
    }

    #[test]
    fn texture_slots_sample_their_texcoord_set() {
        let first = albedo_source(0);
        let second = albedo_source(1);
        assert_ne!(first, second);
        assert!(first.contains("let albedo_uv = uv0;"));
        assert!(second.contains("let albedo_uv = uv1;"));
        assert!(!albedo_source(5).contains("let albedo_uv = uv"));
    }

    #[test]
    fn texcoord_alias_counts_as_texture_use() {
        let feature = Feature::builder("albedo").texture("albedo", 0).build();
        let entry = EntryPoint::new("uv_only", ShaderStage::Fragment, "color = vec4<f32>(albedo_uv, 0.0, 1.0);");
        let bindings = collect_bindings(std::slice::from_ref(&feature), true).unwrap();
        let mesh = MeshFormat::standard();
        let targets = targets();
        let request = ShaderRequest {
            kind: PipelineKind::Drawables,
            bindings: &bindings,
            entry_points: &[&entry],
            mesh: &mesh,
            targets: &targets,
        };
        assert!(WgslGenerator.index(&request).unwrap().uses("albedo"));
    }
}
