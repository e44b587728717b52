//! Groups a draw queue into pipeline buckets.

use rustc_hash::FxHashMap;

use crate::drawable::Drawable;
use crate::feature::FeatureRef;
use crate::hash::Hash128;
use crate::mesh::{MeshId, MeshSource};
use crate::pipeline::PipelineKey;
use crate::render_graph::RenderTargetLayout;

/// Drawables that share one pipeline identity, in queue order.
#[derive(Debug)]
pub struct PipelineBucket<'a> {
    pub identity: Hash128,
    pub key: PipelineKey,
    /// `(queue index, drawable)` pairs.
    pub drawables: Vec<(usize, &'a Drawable)>,
}

/// Buckets of one drawables node, ordered by first appearance in the queue.
#[derive(Debug, Default)]
pub struct PipelineDrawableCache<'a> {
    buckets: Vec<PipelineBucket<'a>>,
    index: FxHashMap<Hash128, usize>,
}

impl<'a> PipelineDrawableCache<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `drawable` to the bucket of `key`, creating it if absent.
    pub fn insert(&mut self, key: PipelineKey, queue_index: usize, drawable: &'a Drawable) {
        let identity = key.identity();
        let slot = *self.index.entry(identity).or_insert_with(|| {
            self.buckets.push(PipelineBucket {
                identity,
                key,
                drawables: Vec::new(),
            });
            self.buckets.len() - 1
        });
        self.buckets[slot].drawables.push((queue_index, drawable));
    }

    pub fn get(&self, identity: Hash128) -> Option<&PipelineBucket<'a>> {
        self.index.get(&identity).map(|&i| &self.buckets[i])
    }

    pub fn buckets(&self) -> &[PipelineBucket<'a>] {
        &self.buckets
    }

    pub fn into_buckets(self) -> Vec<PipelineBucket<'a>> {
        self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Hashes each drawable of a drawables node into its pipeline bucket.
pub struct DrawableGrouper<'g> {
    pub step_features: &'g [FeatureRef],
    pub layout: &'g RenderTargetLayout,
}

impl<'g> DrawableGrouper<'g> {
    pub fn new(step_features: &'g [FeatureRef], layout: &'g RenderTargetLayout) -> Self {
        Self {
            step_features,
            layout,
        }
    }

    /// Groups `drawables` by pipeline identity.
    ///
    /// # Errors
    ///
    /// Returns the first mesh `meshes` has no format for.
    pub fn group<'a>(&self, drawables: &'a [Drawable], meshes: &dyn MeshSource) -> Result<PipelineDrawableCache<'a>, MeshId> {
        let mut cache = PipelineDrawableCache::new();
        for (i, drawable) in drawables.iter().enumerate() {
            let format = meshes.mesh_format(drawable.mesh).ok_or(drawable.mesh)?;
            let key = PipelineKey::for_drawable(self.step_features, drawable, format, self.layout);
            cache.insert(key, i, drawable);
        }
        Ok(cache)
    }
}
