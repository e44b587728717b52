//! Render graph: steps in, an evaluated sequence of passes out.
//!
//! A render graph is built from an ordered list of [`RenderStep`](crate::RenderStep)s
//! and a set of named output bindings. Building resolves every named frame,
//! inserts conversion nodes where a step reads a frame in a different shape
//! than it was written, and decides load/store operations for every
//! attachment. The result is immutable and hashable, so identical step lists
//! share one graph through [`RenderGraphCache`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   build   ┌──────────────┐  evaluate  ┌──────────────┐
//! │ RenderStep  │──────────▶│ RenderGraph  │───────────▶│  GpuDevice   │
//! │ RenderStep  │           │  frames      │            │  passes      │
//! │ ...         │           │  nodes       │            │  draws       │
//! └─────────────┘           │  outputs     │            │  submit      │
//!                           └──────────────┘            └──────────────┘
//!                                  ▲                           ▲
//!                           RenderGraphCache           TexturePool, PipelineCache
//! ```
//!
//! # Node Types
//!
//! - Clear: clears its outputs and draws nothing
//! - Fullscreen: one triangle with an effect feature, sampling its inputs
//! - Drawables: draws a queue with the step's features plus each drawable's own
//! - Conversion: copy, resize or resolve between two frames, inserted by the builder
//!
//! # Example
//!
//! ```
//! use phalanx::{DrawQueueId, Feature, OutputBinding, RenderGraph, RenderStep, StepInput, StepOutput};
//!
//! let graph = RenderGraph::build(
//!     &[
//!         RenderStep::clear("clear").output(StepOutput::new("color")),
//!         RenderStep::drawables("opaque", DrawQueueId(0), vec![])
//!             .output(StepOutput::new("color")),
//!         RenderStep::fullscreen("tonemap", Feature::builder("tonemap").build())
//!             .input(StepInput::new("color"))
//!             .output(StepOutput::new("screen")),
//!     ],
//!     &[OutputBinding::new("screen", 0)],
//! )
//! .unwrap();
//!
//! assert_eq!(graph.nodes().len(), 3);
//! assert_eq!(graph.pass_groups(true).len(), 2);
//! ```

mod builder;
mod evaluator;
mod frame;
mod graph;
mod graph_cache;
mod node;
mod texture_pool;

pub use builder::RenderGraphBuilder;
pub use evaluator::{
    EvaluatorOptions, ExternalTexture, FrameInputs, FrameReport, NodeReport, RenderGraphEvaluator,
};
pub use frame::{
    AttachmentLayout, Frame, FrameIndex, GraphOutput, LoadOp, OutputBinding, RenderTargetLayout,
    StoreOp,
};
pub use graph::RenderGraph;
pub use graph_cache::{GraphKey, RenderGraphCache, graph_key};
pub use node::{ConversionKind, NodeKind, RenderGraphNode};
pub use texture_pool::TexturePool;
