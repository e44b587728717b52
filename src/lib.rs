//! # Phalanx
//!
//! **Render-graph scheduling and pipeline-batched drawing on top of wgpu.**
//!
//! Describe a frame as an ordered list of steps reading and writing named
//! frames. Phalanx turns the steps into a render graph once, caches it, and
//! evaluates it every frame: transient targets come from a pool, drawables
//! are grouped by pipeline, pipelines are generated and built once, and each
//! group is sorted and batched into instanced draws.
//!
//! ## Quick Start
//!
//! ```
//! use phalanx::*;
//!
//! let lit = Feature::builder("lit")
//!     .parameter("tint", ParameterValue::Vec4(Vec4::ONE))
//!     .build();
//! let steps = [
//!     RenderStep::clear("clear")
//!         .output(StepOutput::new("color").cleared(ClearValue::color(0.1, 0.1, 0.15, 1.0)))
//!         .output(StepOutput::new("depth").format(wgpu::TextureFormat::Depth32Float)),
//!     RenderStep::drawables("opaque", DrawQueueId(0), vec![lit])
//!         .output(StepOutput::new("color"))
//!         .output(StepOutput::new("depth")),
//! ];
//!
//! let mut meshes = MeshRegistry::new();
//! let cube = meshes.add(MeshFormat::standard());
//! let mut queues = DrawQueues::new();
//! queues
//!     .queue_mut(DrawQueueId(0))
//!     .draw(cube, Transform::from_position(Vec3::new(0.0, 0.0, -5.0)));
//!
//! let device = RecordingDevice::new();
//! let screen = device
//!     .create_texture(&TextureDesc::render_target("screen", DEFAULT_COLOR_FORMAT, (800, 600), 1))
//!     .unwrap();
//! let mut renderer = Renderer::new(device, RendererConfig::new());
//! renderer.attach_output(0, ExternalTexture::new(screen, DEFAULT_COLOR_FORMAT, 800, 600));
//!
//! let report = renderer
//!     .render(
//!         &View::new(800, 600),
//!         &steps,
//!         &[OutputBinding::new("color", 0)],
//!         &queues,
//!         &meshes,
//!     )
//!     .unwrap();
//! assert_eq!(report.draw_calls, 1);
//! ```
//!
//! ## Philosophy
//!
//! - **Build once** - graphs and pipelines are keyed by structural hashes and built a single time.
//! - **Devices are a seam** - [`WgpuDevice`] drives a GPU, [`RecordingDevice`] runs anywhere.
//! - **No panics** - every failure is a typed error; a failed frame submits nothing.

mod cache;
mod device;
mod drawable;
mod ecs;
mod error;
mod feature;
mod gpu;
mod hash;
mod mesh;
mod renderer;
mod shader;
mod step;
mod view;

pub mod batching;
pub mod pipeline;
pub mod render_graph;

pub use cache::OnceCache;
pub use device::{
    ColorAttachment, ConversionCommand, DepthAttachment, DeviceCommand, DrawCommand, GpuDevice,
    LoadAction, PassDescriptor, PipelineDescriptor, PipelineHandle, RecordingDevice, TextureDesc,
    TextureHandle,
};
pub use drawable::{DrawQueue, DrawQueues, Drawable, TextureBinding};
pub use error::{DeviceError, EvaluateError, GraphBuildError, PipelineError, RenderError};
pub use feature::{
    BlendMode, CullMode, EntryPoint, Feature, FeatureBuilder, FeatureRef, ParameterDecl,
    ParameterType, ParameterValue, PipelineState, ShaderStage, TextureDecl, Toggle,
};
pub use gpu::WgpuDevice;
pub use hash::Hash128;
pub use mesh::{MeshFormat, MeshId, MeshRegistry, MeshSource, Transform, VertexAttribute, VertexSemantic};
pub use render_graph::{
    ExternalTexture, FrameReport, NodeReport, OutputBinding, RenderGraph, RenderGraphBuilder,
    RenderGraphCache, RenderGraphEvaluator,
};
pub use renderer::{Renderer, RendererConfig};
pub use shader::{BindingUsage, GeneratedShader, ShaderGenerator, ShaderRequest, WgslGenerator};
pub use step::{
    ClearValue, DEFAULT_COLOR_FORMAT, DrawQueueId, RenderStep, SizePolicy, StepInput, StepKind,
    StepOutput, steps_hash,
};
pub use view::{View, ViewUniforms};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

// ECS support
pub use ecs::{RenderDrawable, extract_draw_queue, extract_draw_queues};
pub use hecs::{Entity, World};
