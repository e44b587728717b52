//! Pipeline identities and lazily built, cached GPU pipelines.
//!
//! ```text
//! Drawable + step features + mesh format + target layout
//!        │
//!        ▼
//!   PipelineKey ──hash──▶ identity ──▶ PipelineCache ──miss──▶ PipelineBuilder
//!                                             │                     │
//!                                             ◀──── Arc<Pipeline> ──┘
//! ```

pub mod bindings;
mod builder;
mod cache;
pub mod entry_points;
pub mod identity;
pub mod state;

pub use bindings::{BindingKind, BindingSet, BufferField, BufferLayout, FieldSource, LayoutEntry, TextureSlot};
pub use builder::{Pipeline, PipelineBuilder};
pub use cache::PipelineCache;
pub use identity::{FeatureList, PipelineKey, PipelineKind, effective_features};
pub use state::{ResolvedState, combine_states};
