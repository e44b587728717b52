//! Builds one GPU pipeline for a pipeline key.

use std::sync::Arc;

use crate::device::{GpuDevice, PipelineDescriptor, PipelineHandle};
use crate::error::PipelineError;
use crate::hash::Hash128;
use crate::shader::{ShaderGenerator, ShaderRequest, WgslGenerator};

use super::bindings::{BufferLayout, TextureSlot, collect_bindings};
use super::entry_points::{collect_entry_points, sort_entry_points};
use super::identity::{PipelineKey, PipelineKind};
use super::state::{ResolvedState, combine_features};

/// A built pipeline and the layouts its draws must follow.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub handle: PipelineHandle,
    pub identity: Hash128,
    pub kind: PipelineKind,
    /// Per-object record layout after unused fields were dropped.
    pub object_layout: BufferLayout,
    pub view_layout: BufferLayout,
    /// Texture slots in binding order.
    pub textures: Vec<TextureSlot>,
    pub state: ResolvedState,
}

/// Turns pipeline keys into device pipelines.
///
/// # Build Steps
///
/// 1. Collect bindings: built-ins, then feature parameters
/// 2. Collect entry points and sort them by dependency
/// 3. Ask the generator which bindings the entry points use
/// 4. Drop unused object fields and textures
/// 5. Derive the two bind group layouts
/// 6. Generate the shader, combine feature state and create the pipeline
#[derive(Clone)]
pub struct PipelineBuilder {
    generator: Arc<dyn ShaderGenerator>,
    optimize_buffer_layouts: bool,
}

impl PipelineBuilder {
    pub fn new(generator: Arc<dyn ShaderGenerator>) -> Self {
        Self {
            generator,
            optimize_buffer_layouts: true,
        }
    }

    /// Keep every declared binding instead of only the referenced ones.
    pub fn optimize_buffer_layouts(mut self, optimize: bool) -> Self {
        self.optimize_buffer_layouts = optimize;
        self
    }

    /// Runs every build step for `key` and creates the pipeline on `device`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::ParameterConflict`] on incompatible parameter types
    /// - [`PipelineError::CyclicDependency`] on cyclic entry points
    /// - [`PipelineError::ShaderGeneration`] if the generator fails
    /// - [`PipelineError::PipelineCreationFailed`] if the device refuses
    pub fn build<D: GpuDevice + ?Sized>(&self, device: &D, key: &PipelineKey, identity: Hash128) -> Result<Pipeline, PipelineError> {
        let mut bindings = collect_bindings(&key.features, key.kind == PipelineKind::Drawables)?;
        bindings.textures = key
            .texcoords
            .iter()
            .map(|(name, texcoord)| TextureSlot {
                name: name.clone(),
                texcoord: *texcoord,
            })
            .collect();

        let entry_points = collect_entry_points(&key.features);
        let sorted = sort_entry_points(&entry_points).map_err(PipelineError::CyclicDependency)?;

        if self.optimize_buffer_layouts {
            let usage = self.generator.index(&ShaderRequest {
                kind: key.kind,
                bindings: &bindings,
                entry_points: &sorted,
                mesh: &key.mesh_format,
                targets: &key.layout,
            })?;
            bindings = bindings.optimize(|name| usage.uses(name));
        }

        let shader = self.generator.generate(&ShaderRequest {
            kind: key.kind,
            bindings: &bindings,
            entry_points: &sorted,
            mesh: &key.mesh_format,
            targets: &key.layout,
        })?;
        let state = combine_features(&key.features);

        let label = key
            .features
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join("+");
        let descriptor = PipelineDescriptor {
            identity,
            label: if label.is_empty() { format!("{:?}", key.kind) } else { label },
            kind: key.kind,
            shader,
            vertex: key.mesh_format.clone(),
            object_group: bindings.object_group(),
            view_group: bindings.view_group(),
            state,
            targets: key.layout.clone(),
        };
        let handle = device
            .create_pipeline(&descriptor)
            .map_err(|e| PipelineError::PipelineCreationFailed {
                identity,
                message: e.to_string(),
            })?;

        log::debug!(
            "built pipeline {} '{}': {} object fields ({} bytes), {} textures",
            identity,
            descriptor.label,
            bindings.object.fields.len(),
            bindings.object.stride,
            bindings.textures.len()
        );
        Ok(Pipeline {
            handle,
            identity,
            kind: key.kind,
            object_layout: bindings.object,
            view_layout: bindings.view,
            textures: bindings.textures,
            state,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new(Arc::new(WgslGenerator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingDevice;
    use crate::drawable::Drawable;
    use crate::feature::{EntryPoint, Feature, ParameterValue, ShaderStage};
    use crate::mesh::{MeshFormat, MeshId};
    use crate::render_graph::{AttachmentLayout, LoadOp, RenderTargetLayout, StoreOp};
    use glam::Vec4;
    use smallvec::smallvec;

    fn layout() -> RenderTargetLayout {
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

    fn tinted() -> crate::feature::FeatureRef {
        Feature::builder("tint")
            .parameter("tint", ParameterValue::Vec4(Vec4::ONE))
            .parameter("unused", ParameterValue::Float(3.0))
            .entry_point(EntryPoint::new("apply", ShaderStage::Fragment, "color = color * tint;"))
            .build()
    }

    fn key(features: Vec<crate::feature::FeatureRef>) -> PipelineKey {
        PipelineKey::for_drawable(&features, &Drawable::new(MeshId(0)), &MeshFormat::standard(), &layout())
    }

    #[test]
    fn unused_fields_are_dropped() {
        let device = RecordingDevice::new();
        let key = key(vec![tinted()]);
        let pipeline = PipelineBuilder::default()
            .build(&device, &key, key.identity())
            .unwrap();
        let names: Vec<&str> = pipeline.object_layout.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["world", "tint"]);
        assert_eq!(device.pipelines_created(), 1);
    }

    #[test]
    fn unoptimized_layouts_keep_every_field() {
        let device = RecordingDevice::new();
        let key = key(vec![tinted()]);
        let pipeline = PipelineBuilder::default()
            .optimize_buffer_layouts(false)
            .build(&device, &key, key.identity())
            .unwrap();
        assert_eq!(pipeline.object_layout.fields.len(), 3);
    }

    #[test]
    fn cyclic_entry_points_fail() {
        let device = RecordingDevice::new();
        let looped = Feature::builder("loop")
            .entry_point(EntryPoint::new("a", ShaderStage::Fragment, "").after("b"))
            .entry_point(EntryPoint::new("b", ShaderStage::Fragment, "").after("a"))
            .build();
        let key = key(vec![looped]);
        let err = PipelineBuilder::default()
            .build(&device, &key, key.identity())
            .unwrap_err();
        assert_eq!(err, PipelineError::CyclicDependency("a".to_string()));
        assert_eq!(device.pipelines_created(), 0);
    }

    #[test]
    fn device_failures_surface_as_creation_failures() {
        let device = RecordingDevice::new();
        device.fail_pipelines(true);
        let key = key(vec![tinted()]);
        let err = PipelineBuilder::default()
            .build(&device, &key, key.identity())
            .unwrap_err();
        assert!(matches!(err, PipelineError::PipelineCreationFailed { identity, .. } if identity == key.identity()));
    }

    #[test]
    fn fullscreen_inputs_become_texture_slots() {
        let device = RecordingDevice::new();
        let effect = Feature::builder("blit")
            .entry_point(EntryPoint::new(
                "sample",
                ShaderStage::Fragment,
                "color = textureSample(input0, material_sampler, uv0);",
            ))
            .build();
        let key = PipelineKey::for_fullscreen(&effect, 1, &layout());
        let pipeline = PipelineBuilder::default()
            .build(&device, &key, key.identity())
            .unwrap();
        assert_eq!(pipeline.textures.len(), 1);
        assert_eq!(pipeline.textures[0].name, "input0");
        assert!(pipeline.object_layout.is_empty());
    }
}
