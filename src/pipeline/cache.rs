//! Build-once pipeline cache keyed by pipeline identity.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cache::OnceCache;
use crate::device::GpuDevice;
use crate::error::PipelineError;
use crate::hash::Hash128;

use super::builder::{Pipeline, PipelineBuilder};
use super::identity::PipelineKey;

/// Pipelines built so far, one per identity.
///
/// Concurrent requests for the same identity share a single build. Failed
/// builds are not remembered, so an identical later request builds again.
pub struct PipelineCache {
    builder: PipelineBuilder,
    pipelines: OnceCache<Hash128, Pipeline>,
    builds: AtomicUsize,
}

impl PipelineCache {
    pub fn new(builder: PipelineBuilder) -> Self {
        Self {
            builder,
            pipelines: OnceCache::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns the pipeline for `key`, building it on `device` on a miss.
    pub fn get_or_build<D: GpuDevice + ?Sized>(&self, device: &D, key: &PipelineKey) -> Result<Arc<Pipeline>, PipelineError> {
        let identity = key.identity();
        let (pipeline, built) = self
            .pipelines
            .get_or_try_build(identity, || {
                self.builds.fetch_add(1, Ordering::Relaxed);
                self.builder.build(device, key, identity)
            })
            .inspect_err(|e| log::warn!("pipeline {identity} build failed: {e}"))?;
        if built {
            log::debug!("pipeline {:016x} built", identity.short());
        } else {
            log::trace!("pipeline cache hit: {:016x}", identity.short());
        }
        Ok(pipeline)
    }

    pub fn get(&self, identity: Hash128) -> Option<Arc<Pipeline>> {
        self.pipelines.get(&identity)
    }

    /// Number of build attempts so far, including failed ones.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Forgets every pipeline, e.g. after the device was lost.
    pub fn clear(&self) {
        self.pipelines.clear();
    }
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new(PipelineBuilder::default())
    }
}
