//! Error types for graph building, pipeline building and evaluation.

use thiserror::Error;

use crate::hash::Hash128;

/// A step list could not be connected into a render graph.
///
/// The graph is not cached; the caller must fix the step list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphBuildError {
    /// A step reads a frame name no earlier step produced.
    #[error("step {step} reads '{name}' but no earlier step writes it")]
    DanglingInput { step: usize, name: String },
    /// A frame cannot be reused or converted to the shape a step requires.
    #[error("step {step}: frame '{name}' {reason}")]
    FormatMismatch {
        step: usize,
        name: String,
        reason: String,
    },
    /// A step's shader entry points depend on each other in a cycle.
    #[error("step {step}: shader entry point '{entry_point}' is part of a dependency cycle")]
    CyclicDependency { step: usize, entry_point: String },
    /// An output was attached to a frame name that has not been produced yet.
    #[error("cannot attach output slot {slot}: no step has written '{name}' yet")]
    UnknownOutput { slot: u32, name: String },
}

/// A GPU pipeline could not be built for a pipeline identity.
///
/// Failures are not cached; an identical later request retries the build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Two features declare the same parameter name with different types.
    #[error("parameter '{name}' declared as {first} by '{first_feature}' and {second} by '{second_feature}'")]
    ParameterConflict {
        name: String,
        first: String,
        first_feature: String,
        second: String,
        second_feature: String,
    },
    /// Entry points of the combined feature set depend on each other in a cycle.
    #[error("shader entry point '{0}' is part of a dependency cycle")]
    CyclicDependency(String),
    /// The shader generator rejected the binding set or entry points.
    #[error("shader generation failed: {0}")]
    ShaderGeneration(String),
    /// The device refused to create the pipeline object.
    #[error("pipeline {identity} creation failed: {message}")]
    PipelineCreationFailed { identity: Hash128, message: String },
}

/// Errors reported by a [`GpuDevice`](crate::device::GpuDevice).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("command recorded outside of a render pass")]
    NoActivePass,
    #[error("draw recorded before a pipeline was set")]
    NoPipeline,
    #[error("device initialization failed: {0}")]
    Initialization(String),
}

/// A graph evaluation failed. The graph stays cached and valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluateError {
    /// An externally supplied texture does not match the frame it is bound to.
    #[error(
        "output slot {slot}: external texture is {actual_format:?} {actual_width}x{actual_height}, frame expects {expected_format:?} {expected_width}x{expected_height}"
    )]
    OutputShapeMismatch {
        slot: u32,
        expected_format: wgpu::TextureFormat,
        expected_width: u32,
        expected_height: u32,
        actual_format: wgpu::TextureFormat,
        actual_width: u32,
        actual_height: u32,
    },
    /// The graph has an output slot with no external texture attached.
    #[error("output slot {0} has no external texture attached")]
    MissingOutput(u32),
    /// Two output slots name the same frame but carry different textures.
    #[error("output slots {first} and {second} bind different textures to the same frame")]
    ConflictingOutputs { first: u32, second: u32 },
    /// A drawables step references a draw queue that was not supplied.
    #[error("draw queue {0} was not supplied")]
    MissingDrawQueue(u32),
    /// A drawable references a mesh the mesh source does not know.
    #[error("draw queue {queue}: mesh {mesh} has no registered vertex format")]
    UnknownMesh { queue: u32, mesh: u64 },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Anything that can fail inside [`Renderer::render`](crate::Renderer::render).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error(transparent)]
    Build(#[from] GraphBuildError),
    #[error(transparent)]
    Evaluate(#[from] EvaluateError),
}
