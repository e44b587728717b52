//! Build-once cache of render graphs keyed by step and output hashes.

use std::sync::Arc;

use crate::cache::OnceCache;
use crate::error::GraphBuildError;
use crate::hash::Hash128;
use crate::step::{RenderStep, steps_hash};

use super::frame::OutputBinding;
use super::graph::RenderGraph;

/// Cache key: `(steps_hash, outputs_hash)`.
pub type GraphKey = (Hash128, Hash128);

/// Computes the cache key of a step list and its output bindings.
pub fn graph_key(steps: &[RenderStep], outputs: &[OutputBinding]) -> GraphKey {
    (steps_hash(steps), Hash128::of(outputs))
}

/// Shares built graphs between identical step lists.
///
/// Building the same steps against the same outputs returns the same
/// `Arc<RenderGraph>`. A failed build is not cached.
pub struct RenderGraphCache {
    graphs: OnceCache<GraphKey, RenderGraph>,
}

impl RenderGraphCache {
    /// Creates a cache holding at most `capacity` graphs.
    pub fn new(capacity: usize) -> Self {
        Self {
            graphs: OnceCache::with_capacity(capacity),
        }
    }

    /// Returns the cached graph for `steps`/`outputs`, building it on a miss.
    pub fn get_or_build(
        &self,
        steps: &[RenderStep],
        outputs: &[OutputBinding],
    ) -> Result<Arc<RenderGraph>, GraphBuildError> {
        let key = graph_key(steps, outputs);
        let (graph, built) = self
            .graphs
            .get_or_try_build(key, || RenderGraph::build(steps, outputs))
            .inspect_err(|e| log::warn!("render graph build failed: {e}"))?;
        if built {
            log::debug!("graph cache miss: built {} ({} nodes)", key.0, graph.nodes().len());
        } else {
            log::trace!("graph cache hit: {}", key.0);
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn clear(&self) {
        self.graphs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepOutput;

    fn steps(name: &str) -> Vec<RenderStep> {
        vec![RenderStep::clear("clear").output(StepOutput::new(name))]
    }

    #[test]
    fn same_steps_return_same_graph() {
        let cache = RenderGraphCache::new(8);
        let outputs = [OutputBinding::new("color", 0)];
        let a = cache.get_or_build(&steps("color"), &outputs).unwrap();
        let b = cache.get_or_build(&steps("color"), &outputs).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn changed_output_name_rebuilds() {
        let cache = RenderGraphCache::new(8);
        let a = cache.get_or_build(&steps("color"), &[]).unwrap();
        let b = cache.get_or_build(&steps("albedo"), &[]).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let cache = RenderGraphCache::new(8);
        let bad = [OutputBinding::new("missing", 0)];
        assert!(cache.get_or_build(&steps("color"), &bad).is_err());
        assert!(cache.is_empty());
    }
}
