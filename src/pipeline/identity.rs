//! Pipeline identities: which GPU pipeline a drawable needs.
//!
//! A [`PipelineKey`] holds everything that decides a pipeline:
//!
//! - the effective feature set, step features first, then drawable features
//! - the mesh vertex format
//! - the texcoord set each texture slot samples
//! - the enclosing [`RenderTargetLayout`]
//!
//! Its 128-bit hash is the pipeline identity. Features contribute their
//! content hash, never their address.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::drawable::Drawable;
use crate::feature::FeatureRef;
use crate::hash::Hash128;
use crate::mesh::MeshFormat;
use crate::render_graph::RenderTargetLayout;

use super::bindings::{BUILTIN_VERSION, collect_textures};

/// What kind of geometry a pipeline draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Mesh instances with per-object records.
    Drawables,
    /// One fullscreen triangle without vertex buffers.
    Fullscreen,
}

pub type FeatureList = SmallVec<[FeatureRef; 8]>;

/// Everything that decides a pipeline.
#[derive(Clone, Debug)]
pub struct PipelineKey {
    pub kind: PipelineKind,
    pub features: FeatureList,
    pub mesh_format: MeshFormat,
    /// `(texture name, texcoord set)` in slot order.
    pub texcoords: SmallVec<[(String, u32); 4]>,
    pub layout: RenderTargetLayout,
}

impl PipelineKey {
    /// Key of a drawable rendered by a drawables step.
    pub fn for_drawable(
        step_features: &[FeatureRef],
        drawable: &Drawable,
        mesh_format: &MeshFormat,
        layout: &RenderTargetLayout,
    ) -> Self {
        let features = effective_features(step_features, &drawable.features);
        let texcoords = collect_textures(&features)
            .into_iter()
            .map(|slot| {
                let set = drawable
                    .textures
                    .iter()
                    .find(|b| b.name == slot.name)
                    .and_then(|b| b.texcoord)
                    .unwrap_or(slot.texcoord);
                (slot.name, set)
            })
            .collect();
        Self {
            kind: PipelineKind::Drawables,
            features,
            mesh_format: mesh_format.clone(),
            texcoords,
            layout: layout.clone(),
        }
    }

    /// Key of a fullscreen effect sampling `inputs` textures.
    ///
    /// Inputs bind to the effect's texture slots in order; inputs beyond the
    /// declared slots are named `input{n}`.
    pub fn for_fullscreen(effect: &FeatureRef, inputs: usize, layout: &RenderTargetLayout) -> Self {
        let mut texcoords: SmallVec<[(String, u32); 4]> = effect
            .textures()
            .iter()
            .map(|t| (t.name.clone(), 0))
            .collect();
        for n in texcoords.len()..inputs {
            texcoords.push((format!("input{n}"), 0));
        }
        Self {
            kind: PipelineKind::Fullscreen,
            features: SmallVec::from_elem(effect.clone(), 1),
            mesh_format: MeshFormat::empty(),
            texcoords,
            layout: layout.clone(),
        }
    }

    pub fn identity(&self) -> Hash128 {
        Hash128::of(self)
    }
}

impl Hash for PipelineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        BUILTIN_VERSION.hash(state);
        self.kind.hash(state);
        self.features.len().hash(state);
        for feature in &self.features {
            feature.content_hash().hash(state);
        }
        self.mesh_format.hash(state);
        self.texcoords.hash(state);
        self.layout.hash(state);
    }
}

/// Step features followed by drawable features, each feature once.
pub fn effective_features(step: &[FeatureRef], drawable: &[FeatureRef]) -> FeatureList {
    let mut out = FeatureList::new();
    for feature in step.iter().chain(drawable) {
        if !out.iter().any(|f| f.content_hash() == feature.content_hash()) {
            out.push(feature.clone());
        }
    }
    out
}
