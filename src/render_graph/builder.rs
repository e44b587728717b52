//! Connects an ordered step list into a render graph.

use rustc_hash::FxHashMap;
use smallvec::{SmallVec, smallvec};

use crate::error::GraphBuildError;
use crate::hash::Hash128;
use crate::pipeline::entry_points::{collect_entry_points, sort_entry_points};
use crate::step::{ClearValue, DEFAULT_COLOR_FORMAT, RenderStep, SizePolicy, StepInput, StepKind, StepOutput};

use super::frame::{
    AttachmentLayout, Frame, FrameIndex, GraphOutput, LoadOp, RenderTargetLayout, StoreOp,
};
use super::graph::RenderGraph;
use super::node::{ConversionKind, NodeKind, RenderGraphNode};

/// A frame plus the shape a consumer asked for. Identifies a conversion that
/// can be shared by several consumers until the source is written again.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct ConversionKey {
    source: FrameIndex,
    format: wgpu::TextureFormat,
    size: SizePolicy,
    sample_count: u32,
}

/// Builder for [`RenderGraph`]s.
///
/// Steps are processed in the order they are added and never reordered.
/// Each input resolves to the most recent prior writer of its name; each
/// output either aliases that writer's frame or allocates a new one.
///
/// Every method consumes the builder, so a failed step cannot leave a
/// half-connected graph behind.
///
/// # Example
///
/// ```
/// use phalanx::{RenderGraph, RenderStep, StepInput, StepOutput};
///
/// let graph = RenderGraph::builder()
///     .step(RenderStep::clear("clear").output(StepOutput::new("color")))?
///     .step(
///         RenderStep::clear("again")
///             .input(StepInput::new("color"))
///             .output(StepOutput::new("color")),
///     )?
///     .attach_output("color", 0)?
///     .build();
///
/// assert_eq!(graph.nodes().len(), 2);
/// assert_eq!(graph.frames().len(), 1);
/// # Ok::<(), phalanx::GraphBuildError>(())
/// ```
pub struct RenderGraphBuilder {
    steps: usize,
    frames: Vec<Frame>,
    nodes: Vec<RenderGraphNode>,
    outputs: Vec<GraphOutput>,
    latest: FxHashMap<String, FrameIndex>,
    conversions: FxHashMap<ConversionKey, FrameIndex>,
}

/// Where a step output lands.
enum OutputTarget {
    Existing(FrameIndex),
    New(Frame),
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self {
            steps: 0,
            frames: Vec::new(),
            nodes: Vec::new(),
            outputs: Vec::new(),
            latest: FxHashMap::default(),
            conversions: FxHashMap::default(),
        }
    }

    /// Adds the next step.
    ///
    /// # Errors
    ///
    /// - [`GraphBuildError::DanglingInput`] if an input names a frame no
    ///   earlier step wrote
    /// - [`GraphBuildError::FormatMismatch`] if an input cannot be converted
    ///   to the requested shape, or a loaded output changes shape
    /// - [`GraphBuildError::CyclicDependency`] if the step's feature entry
    ///   points depend on each other in a cycle
    pub fn step(mut self, step: RenderStep) -> Result<Self, GraphBuildError> {
        let index = self.steps;
        self.steps += 1;

        let entry_points = collect_entry_points(step.features());
        sort_entry_points(&entry_points).map_err(|entry_point| {
            GraphBuildError::CyclicDependency {
                step: index,
                entry_point,
            }
        })?;

        for (i, output) in step.outputs.iter().enumerate() {
            if step.outputs[..i].iter().any(|o| o.name == output.name) {
                return Err(GraphBuildError::FormatMismatch {
                    step: index,
                    name: output.name.clone(),
                    reason: "is written twice by the same step".to_string(),
                });
            }
        }

        let mut inputs: SmallVec<[FrameIndex; 4]> = SmallVec::new();
        for input in &step.inputs {
            let Some(&frame) = self.latest.get(&input.name) else {
                return Err(GraphBuildError::DanglingInput {
                    step: index,
                    name: input.name.clone(),
                });
            };
            inputs.push(self.convert_input(index, frame, input)?);
        }

        let mut targets = Vec::with_capacity(step.outputs.len());
        for (i, output) in step.outputs.iter().enumerate() {
            targets.push(self.resolve_output(index, output, step.clears_output(i))?);
        }

        let mut outputs: SmallVec<[FrameIndex; 4]> = SmallVec::new();
        let mut clear_values: SmallVec<[ClearValue; 4]> = SmallVec::new();
        let mut layout = RenderTargetLayout::default();
        for (i, ((target, load), output)) in targets.into_iter().zip(&step.outputs).enumerate() {
            let frame = match target {
                OutputTarget::Existing(frame) => frame,
                OutputTarget::New(frame) => self.push_frame(frame),
            };
            let desc = &self.frames[frame.index()];
            if i > 0 && desc.sample_count != layout.sample_count {
                return Err(GraphBuildError::FormatMismatch {
                    step: index,
                    name: output.name.clone(),
                    reason: format!(
                        "has {} samples but earlier attachments have {}",
                        desc.sample_count, layout.sample_count
                    ),
                });
            }
            layout.sample_count = desc.sample_count;
            let attachment = AttachmentLayout {
                format: desc.format,
                load,
                store: StoreOp::Discard,
            };
            if desc.is_depth() {
                if layout.depth.is_some() {
                    return Err(GraphBuildError::FormatMismatch {
                        step: index,
                        name: output.name.clone(),
                        reason: "is a second depth attachment".to_string(),
                    });
                }
                layout.depth = Some(attachment);
            } else {
                layout.colors.push(attachment);
            }
            outputs.push(frame);
            clear_values.push(output.clear_value);
        }
        if layout.sample_count == 0 {
            layout.sample_count = 1;
        }

        for (output, &frame) in step.outputs.iter().zip(&outputs) {
            self.latest.insert(output.name.clone(), frame);
            self.conversions.retain(|key, _| key.source != frame);
        }

        let kind = match &step.kind {
            StepKind::Clear => NodeKind::Clear,
            StepKind::Fullscreen { effect } => NodeKind::Fullscreen {
                effect: effect.clone(),
            },
            StepKind::Drawables { queue, features } => NodeKind::Drawables {
                queue: *queue,
                features: features.iter().cloned().collect(),
            },
        };

        log::trace!(
            "graph step {index} '{}': {} inputs, {} outputs",
            step.label,
            inputs.len(),
            outputs.len()
        );
        self.nodes.push(RenderGraphNode {
            label: step.label,
            kind,
            step: Some(index),
            inputs,
            input_names: step.inputs.iter().map(|i| i.name.clone()).collect(),
            outputs,
            clear_values,
            layout,
        });
        Ok(self)
    }

    /// Binds the latest writer of `name` to external texture `slot`.
    ///
    /// Binding a slot twice keeps the later binding.
    pub fn attach_output(mut self, name: &str, slot: u32) -> Result<Self, GraphBuildError> {
        let Some(&frame) = self.latest.get(name) else {
            return Err(GraphBuildError::UnknownOutput {
                slot,
                name: name.to_string(),
            });
        };
        self.outputs.retain(|o| o.slot != slot);
        self.outputs.push(GraphOutput { frame, slot });
        Ok(self)
    }

    /// Finalizes store ops and hashes the graph.
    pub fn build(mut self) -> RenderGraph {
        self.outputs.sort_by_key(|o| o.slot);
        self.finalize_store_ops();
        let hash = Hash128::of(&(&self.frames, &self.nodes, &self.outputs));
        log::debug!(
            "built render graph {}: {} frames, {} nodes, {} outputs",
            hash,
            self.frames.len(),
            self.nodes.len(),
            self.outputs.len()
        );
        RenderGraph::from_parts(self.frames, self.nodes, self.outputs, hash)
    }

    fn push_frame(&mut self, frame: Frame) -> FrameIndex {
        let index = FrameIndex(self.frames.len() as u32);
        self.frames.push(frame);
        index
    }

    fn resolve_output(
        &self,
        step: usize,
        output: &StepOutput,
        clears: bool,
    ) -> Result<(OutputTarget, LoadOp), GraphBuildError> {
        let fresh = |base: Option<&Frame>| Frame {
            name: output.name.clone(),
            format: output
                .format
                .or(base.map(|f| f.format))
                .unwrap_or(DEFAULT_COLOR_FORMAT),
            size: output.size.or(base.map(|f| f.size)).unwrap_or_default(),
            sample_count: output
                .sample_count
                .or(base.map(|f| f.sample_count))
                .unwrap_or(1)
                .max(1),
        };

        let Some(&existing) = self.latest.get(&output.name) else {
            return Ok((OutputTarget::New(fresh(None)), LoadOp::Clear));
        };
        let frame = &self.frames[existing.index()];
        let wanted = fresh(Some(frame));
        if wanted.format == frame.format
            && wanted.size == frame.size
            && wanted.sample_count == frame.sample_count
        {
            let load = if clears { LoadOp::Clear } else { LoadOp::Load };
            return Ok((OutputTarget::Existing(existing), load));
        }
        if clears {
            return Ok((OutputTarget::New(wanted), LoadOp::Clear));
        }
        Err(GraphBuildError::FormatMismatch {
            step,
            name: output.name.clone(),
            reason: format!(
                "is loaded as {:?} {:?} x{} but was written as {:?} {:?} x{}",
                wanted.format,
                wanted.size,
                wanted.sample_count,
                frame.format,
                frame.size,
                frame.sample_count
            ),
        })
    }

    /// Returns `frame`, or a converted copy matching the input's requirements.
    fn convert_input(
        &mut self,
        step: usize,
        frame: FrameIndex,
        input: &StepInput,
    ) -> Result<FrameIndex, GraphBuildError> {
        let source = self.frames[frame.index()].clone();
        let format = input.format.unwrap_or(source.format);
        let size = input.size.unwrap_or(source.size);
        let sample_count = input.sample_count.unwrap_or(source.sample_count);
        if format == source.format && size == source.size && sample_count == source.sample_count {
            return Ok(frame);
        }

        let mismatch = |reason: String| GraphBuildError::FormatMismatch {
            step,
            name: input.name.clone(),
            reason,
        };
        if source.is_depth() || format.is_depth_stencil_format() {
            return Err(mismatch(format!(
                "cannot be converted from {:?} to {:?}: depth frames are not convertible",
                source.format, format
            )));
        }
        if sample_count > source.sample_count {
            return Err(mismatch(format!(
                "cannot raise sample count from {} to {}",
                source.sample_count, sample_count
            )));
        }
        if source.sample_count > 1 && sample_count != 1 {
            return Err(mismatch(format!(
                "has {} samples and can only be resolved to 1, not {}",
                source.sample_count, sample_count
            )));
        }

        let key = ConversionKey {
            source: frame,
            format,
            size,
            sample_count,
        };
        if let Some(&converted) = self.conversions.get(&key) {
            return Ok(converted);
        }

        let mut current = frame;
        if sample_count != source.sample_count {
            current = self.push_conversion(
                ConversionKind::Resolve,
                current,
                Frame {
                    name: format!("{}:resolved", source.name),
                    format: source.format,
                    size: source.size,
                    sample_count: 1,
                },
            );
        }
        if size != source.size {
            current = self.push_conversion(
                ConversionKind::Resize,
                current,
                Frame {
                    name: format!("{}:resized", source.name),
                    format,
                    size,
                    sample_count: 1,
                },
            );
        } else if format != source.format {
            current = self.push_conversion(
                ConversionKind::Copy,
                current,
                Frame {
                    name: format!("{}:{:?}", source.name, format),
                    format,
                    size,
                    sample_count: 1,
                },
            );
        }

        self.conversions.insert(key, current);
        Ok(current)
    }

    fn push_conversion(&mut self, kind: ConversionKind, source: FrameIndex, frame: Frame) -> FrameIndex {
        let label = format!("{kind:?} {}", frame.name);
        let source_name = self.frames[source.index()].name.clone();
        let format = frame.format;
        let sample_count = frame.sample_count;
        let target = self.push_frame(frame);
        log::trace!("inserted {label} (frame {} -> {})", source.0, target.0);
        self.nodes.push(RenderGraphNode {
            label,
            kind: NodeKind::Conversion(kind),
            step: None,
            inputs: smallvec![source],
            input_names: smallvec![source_name],
            outputs: smallvec![target],
            clear_values: smallvec![ClearValue::default()],
            layout: RenderTargetLayout {
                colors: smallvec![AttachmentLayout {
                    format,
                    load: LoadOp::Clear,
                    store: StoreOp::Discard,
                }],
                depth: None,
                sample_count,
            },
        });
        target
    }

    /// An attachment is stored when a later node reads or loads it, or when
    /// it is bound to an external output and nothing overwrites it.
    fn finalize_store_ops(&mut self) {
        let external: Vec<FrameIndex> = self.outputs.iter().map(|o| o.frame).collect();
        let mut stores: Vec<SmallVec<[StoreOp; 4]>> = Vec::with_capacity(self.nodes.len());
        for (k, node) in self.nodes.iter().enumerate() {
            let ops = node
                .outputs
                .iter()
                .map(|&frame| {
                    for later in &self.nodes[k + 1..] {
                        if later.inputs.contains(&frame) {
                            return StoreOp::Store;
                        }
                        if later.outputs.contains(&frame) {
                            return match load_op(later, &self.frames, frame) {
                                Some(LoadOp::Load) => StoreOp::Store,
                                _ => StoreOp::Discard,
                            };
                        }
                    }
                    if external.contains(&frame) {
                        StoreOp::Store
                    } else {
                        StoreOp::Discard
                    }
                })
                .collect();
            stores.push(ops);
        }

        for (node, ops) in self.nodes.iter_mut().zip(stores) {
            let frames = &self.frames;
            let mut color = 0;
            for (&frame, store) in node.outputs.iter().zip(ops) {
                let attachment = if frames[frame.index()].is_depth() {
                    node.layout.depth.as_mut()
                } else {
                    color += 1;
                    node.layout.colors.get_mut(color - 1)
                };
                if let Some(attachment) = attachment {
                    attachment.store = store;
                }
            }
        }
    }
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load op with which `node` writes `frame`, if it writes it at all.
fn load_op(node: &RenderGraphNode, frames: &[Frame], frame: FrameIndex) -> Option<LoadOp> {
    let mut color = 0;
    for &out in &node.outputs {
        let is_depth = frames[out.index()].is_depth();
        if out == frame {
            return if is_depth {
                node.layout.depth.map(|d| d.load)
            } else {
                node.layout.colors.get(color).map(|c| c.load)
            };
        }
        if !is_depth {
            color += 1;
        }
    }
    None
}
