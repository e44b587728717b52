//! From an unordered draw queue to pipeline-grouped, batched draws.
//!
//! ```text
//! DrawQueue ──group──▶ buckets (one per pipeline identity)
//!                        │  per bucket, optionally in parallel:
//!                        ├─ PipelineCache::get_or_build
//!                        ├─ sort_and_batch_drawables
//!                        └─ pack_object_records
//!                        ▼
//!                   PreparedBucket
//! ```
//!
//! Buckets are independent: each worker only reads drawables and owns the
//! bucket it prepares until the results are collected back in bucket order.

mod grouper;
mod params;
mod sort;

use std::sync::Arc;

use rayon::prelude::*;

use crate::device::GpuDevice;
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineCache};

pub use grouper::{DrawableGrouper, PipelineBucket, PipelineDrawableCache};
pub use params::{default_records, pack_object_records};
pub use sort::{DrawGroup, PipelineDrawables, TextureSet, sort_and_batch_drawables, texture_set};

/// A bucket ready to record: its pipeline, draw order and object records.
#[derive(Debug)]
pub struct PreparedBucket<'a> {
    pub pipeline: Arc<Pipeline>,
    pub drawables: PipelineDrawables<'a>,
    pub object_data: Vec<u8>,
}

fn prepare_bucket<'a, D: GpuDevice + ?Sized>(
    bucket: &PipelineBucket<'a>,
    device: &D,
    pipelines: &PipelineCache,
) -> Result<PreparedBucket<'a>, PipelineError> {
    let pipeline = pipelines.get_or_build(device, &bucket.key)?;
    let drawables = sort_and_batch_drawables(bucket, &pipeline.textures);
    let object_data = pack_object_records(&pipeline.object_layout, &drawables.drawables_sorted);
    Ok(PreparedBucket {
        pipeline,
        drawables,
        object_data,
    })
}

/// Ensures pipelines exist for every bucket, then sorts, batches and packs
/// each one. Results keep bucket order whether or not `parallel` is set.
pub fn prepare_buckets<'a, D: GpuDevice + ?Sized>(
    buckets: &[PipelineBucket<'a>],
    device: &D,
    pipelines: &PipelineCache,
    parallel: bool,
) -> Result<Vec<PreparedBucket<'a>>, PipelineError> {
    if parallel && buckets.len() > 1 {
        buckets
            .par_iter()
            .map(|bucket| prepare_bucket(bucket, device, pipelines))
            .collect()
    } else {
        buckets
            .iter()
            .map(|bucket| prepare_bucket(bucket, device, pipelines))
            .collect()
    }
}
