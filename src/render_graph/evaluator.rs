//! Evaluates a built render graph against real textures and draw queues.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::batching::{DrawableGrouper, PreparedBucket, default_records, prepare_buckets};
use crate::device::{
    ColorAttachment, ConversionCommand, DepthAttachment, DrawCommand, GpuDevice, LoadAction,
    PassDescriptor, TextureDesc, TextureHandle,
};
use crate::drawable::DrawQueues;
use crate::error::EvaluateError;
use crate::hash::Hash128;
use crate::mesh::MeshSource;
use crate::pipeline::{Pipeline, PipelineCache, PipelineKey};
use crate::step::ClearValue;
use crate::view::View;

use super::frame::{AttachmentLayout, FrameIndex, LoadOp};
use super::graph::RenderGraph;
use super::node::{NodeKind, RenderGraphNode};
use super::texture_pool::TexturePool;

/// A texture owned by the caller, bound to an output slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalTexture {
    pub handle: TextureHandle,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

impl ExternalTexture {
    pub fn new(handle: TextureHandle, format: wgpu::TextureFormat, width: u32, height: u32) -> Self {
        Self {
            handle,
            format,
            width,
            height,
            sample_count: 1,
        }
    }
}

/// Per-evaluation inputs.
pub struct FrameInputs<'a> {
    pub view: &'a View,
    pub queues: &'a DrawQueues,
    pub meshes: &'a dyn MeshSource,
    /// Output textures used for this evaluation only, ahead of attached ones.
    pub outputs: &'a [(u32, ExternalTexture)],
}

/// What one node recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeReport {
    pub label: String,
    /// Pipeline identities in recording order.
    pub pipelines: Vec<Hash128>,
    /// `(start, count)` draw groups per pipeline, parallel to `pipelines`.
    pub draw_groups: Vec<Vec<(u32, u32)>>,
}

/// Summary of one evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub graph: Hash128,
    pub node_count: usize,
    /// Physical passes after merging, conversions included.
    pub pass_count: usize,
    pub draw_calls: usize,
    pub nodes: Vec<NodeReport>,
    pub submission: u64,
}

/// Work prepared on the CPU before any command is recorded.
enum NodeWork<'a> {
    None,
    Drawables(Vec<PreparedBucket<'a>>),
    Fullscreen {
        key: PipelineKey,
        pipeline: Arc<Pipeline>,
        object_data: Vec<u8>,
    },
}

/// Evaluator settings.
#[derive(Clone, Copy, Debug)]
pub struct EvaluatorOptions {
    pub merge_passes: bool,
    pub parallel_batching: bool,
    pub texture_idle_frames: u32,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            merge_passes: true,
            parallel_batching: true,
            texture_idle_frames: 8,
        }
    }
}

/// Persistent per-renderer evaluator.
///
/// Owns the texture pool and the external output bindings. One
/// [`evaluate`](Self::evaluate) call records and submits every node of a
/// graph in declaration order, or submits nothing if any step fails:
///
/// 1. bind external outputs and check their shape
/// 2. check every draw queue is present
/// 3. group, build pipelines, sort, batch and pack on the CPU
/// 4. acquire pooled textures for the remaining frames
/// 5. record passes and conversions, then submit
pub struct RenderGraphEvaluator {
    options: EvaluatorOptions,
    pool: TexturePool,
    outputs: FxHashMap<u32, ExternalTexture>,
    evaluations: u64,
}

impl RenderGraphEvaluator {
    pub fn new(options: EvaluatorOptions) -> Self {
        Self {
            options,
            pool: TexturePool::new(),
            outputs: FxHashMap::default(),
            evaluations: 0,
        }
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    /// Binds `texture` to output `slot` for every later evaluation.
    pub fn attach_output(&mut self, slot: u32, texture: ExternalTexture) {
        self.outputs.insert(slot, texture);
    }

    pub fn detach_output(&mut self, slot: u32) -> Option<ExternalTexture> {
        self.outputs.remove(&slot)
    }

    pub fn texture_pool(&self) -> &TexturePool {
        &self.pool
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Destroys every pooled texture.
    pub fn release_textures<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        self.pool.clear(device);
    }

    /// Records and submits `graph`.
    ///
    /// # Errors
    ///
    /// - [`EvaluateError::MissingOutput`] / [`EvaluateError::OutputShapeMismatch`]
    ///   if an output slot is unbound or bound to a texture of the wrong shape
    /// - [`EvaluateError::ConflictingOutputs`] if two slots bind different
    ///   textures to one frame
    /// - [`EvaluateError::MissingDrawQueue`] / [`EvaluateError::UnknownMesh`]
    ///   for incomplete draw inputs
    /// - [`EvaluateError::Pipeline`] if a pipeline cannot be built
    /// - [`EvaluateError::Device`] if recording fails; nothing is submitted
    pub fn evaluate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        pipelines: &PipelineCache,
        graph: &RenderGraph,
        inputs: &FrameInputs<'_>,
    ) -> Result<FrameReport, EvaluateError> {
        let extent = inputs.view.extent;
        let externals = self.bind_outputs(graph, extent, inputs.outputs)?;

        let missing = graph.nodes().iter().find_map(|node| match &node.kind {
            NodeKind::Drawables { queue, .. } if inputs.queues.get(*queue).is_none() => Some(queue.0),
            _ => None,
        });
        if let Some(queue) = missing {
            return Err(EvaluateError::MissingDrawQueue(queue));
        }

        let work = self.prepare(&*device, pipelines, graph, inputs)?;

        let mut textures: Vec<TextureHandle> = Vec::with_capacity(graph.frames().len());
        for (i, frame) in graph.frames().iter().enumerate() {
            let handle = match externals.get(&FrameIndex(i as u32)) {
                Some(&handle) => Ok(handle),
                None => self.pool.acquire(
                    &*device,
                    &TextureDesc::render_target(
                        frame.name.clone(),
                        frame.format,
                        frame.resolve_size(extent),
                        frame.sample_count,
                    ),
                ),
            };
            match handle {
                Ok(handle) => textures.push(handle),
                Err(e) => {
                    self.pool.cancel();
                    return Err(e.into());
                }
            }
        }

        let recorded = self.record(device, graph, inputs.view, &work, &textures);
        let (pass_count, draw_calls) = match recorded {
            Ok(counts) => counts,
            Err(e) => {
                log::warn!("evaluation of graph {} failed: {e}", graph.hash());
                device.discard();
                self.pool.cancel();
                return Err(e);
            }
        };

        let submission = device.submit();
        self.pool.release_all(submission);
        self.pool.trim(&*device, self.options.texture_idle_frames);
        self.evaluations += 1;
        log::debug!(
            "evaluated graph {}: {} nodes in {} passes, {} draws, submission {}",
            graph.hash(),
            graph.nodes().len(),
            pass_count,
            draw_calls,
            submission
        );

        Ok(FrameReport {
            graph: graph.hash(),
            node_count: graph.nodes().len(),
            pass_count,
            draw_calls,
            nodes: graph
                .nodes()
                .iter()
                .zip(&work)
                .map(|(node, work)| node_report(node, work))
                .collect(),
            submission,
        })
    }

    fn bind_outputs(
        &self,
        graph: &RenderGraph,
        extent: (u32, u32),
        overrides: &[(u32, ExternalTexture)],
    ) -> Result<FxHashMap<FrameIndex, TextureHandle>, EvaluateError> {
        let mut bound: FxHashMap<FrameIndex, (u32, TextureHandle)> = FxHashMap::default();
        for output in graph.outputs() {
            let texture = overrides
                .iter()
                .find(|(slot, _)| *slot == output.slot)
                .map(|(_, t)| t)
                .or_else(|| self.outputs.get(&output.slot))
                .ok_or(EvaluateError::MissingOutput(output.slot))?;
            let frame = graph.frame(output.frame);
            let (width, height) = frame.resolve_size(extent);
            if texture.format != frame.format
                || texture.width != width
                || texture.height != height
                || texture.sample_count != frame.sample_count
            {
                return Err(EvaluateError::OutputShapeMismatch {
                    slot: output.slot,
                    expected_format: frame.format,
                    expected_width: width,
                    expected_height: height,
                    actual_format: texture.format,
                    actual_width: texture.width,
                    actual_height: texture.height,
                });
            }
            match bound.get(&output.frame).copied() {
                Some((first, handle)) if handle != texture.handle => {
                    return Err(EvaluateError::ConflictingOutputs {
                        first,
                        second: output.slot,
                    });
                }
                Some(_) => {}
                None => {
                    bound.insert(output.frame, (output.slot, texture.handle));
                }
            }
        }
        Ok(bound.into_iter().map(|(frame, (_, handle))| (frame, handle)).collect())
    }

    fn prepare<'a, D: GpuDevice>(
        &self,
        device: &D,
        pipelines: &PipelineCache,
        graph: &RenderGraph,
        inputs: &FrameInputs<'a>,
    ) -> Result<Vec<NodeWork<'a>>, EvaluateError> {
        let mut work = Vec::with_capacity(graph.nodes().len());
        for node in graph.nodes() {
            work.push(match &node.kind {
                NodeKind::Clear | NodeKind::Conversion(_) => NodeWork::None,
                NodeKind::Drawables { queue, features } => {
                    let drawables = inputs
                        .queues
                        .get(*queue)
                        .ok_or(EvaluateError::MissingDrawQueue(queue.0))?
                        .as_slice();
                    let grouped = DrawableGrouper::new(features, &node.layout)
                        .group(drawables, inputs.meshes)
                        .map_err(|mesh| EvaluateError::UnknownMesh {
                            queue: queue.0,
                            mesh: mesh.0,
                        })?;
                    let prepared = prepare_buckets(
                        grouped.buckets(),
                        device,
                        pipelines,
                        self.options.parallel_batching,
                    )?;
                    log::trace!(
                        "node '{}': {} drawables in {} pipelines",
                        node.label,
                        drawables.len(),
                        prepared.len()
                    );
                    NodeWork::Drawables(prepared)
                }
                NodeKind::Fullscreen { effect } => {
                    let key = PipelineKey::for_fullscreen(effect, node.sampled_inputs().count(), &node.layout);
                    let pipeline = pipelines.get_or_build(device, &key)?;
                    let object_data = default_records(&pipeline.object_layout);
                    NodeWork::Fullscreen {
                        key,
                        pipeline,
                        object_data,
                    }
                }
            });
        }
        Ok(work)
    }

    /// Records every pass group. Returns `(pass count, draw calls)`.
    fn record<D: GpuDevice>(
        &self,
        device: &mut D,
        graph: &RenderGraph,
        view: &View,
        work: &[NodeWork<'_>],
        textures: &[TextureHandle],
    ) -> Result<(usize, usize), EvaluateError> {
        device.write_view_data(bytemuck::bytes_of(&view.uniforms()))?;

        let groups = graph.pass_groups(self.options.merge_passes);
        let mut draw_calls = 0;
        for group in &groups {
            let first = &graph.nodes()[group.start];
            if let NodeKind::Conversion(kind) = first.kind {
                log::trace!("conversion '{}'", first.label);
                device.convert(&ConversionCommand {
                    kind,
                    source: textures[first.inputs[0].index()],
                    destination: textures[first.outputs[0].index()],
                })?;
                continue;
            }

            let last = &graph.nodes()[group.end - 1];
            let pass = pass_descriptor(graph, first, last, &graph.nodes()[group.clone()], textures);
            log::trace!("pass '{}': {} nodes", pass.label, group.len());
            device.begin_pass(&pass)?;
            for (node, work) in graph.nodes()[group.clone()].iter().zip(&work[group.clone()]) {
                draw_calls += record_node(device, node, work, textures)?;
            }
            device.end_pass()?;
        }
        Ok((groups.len(), draw_calls))
    }
}

impl Default for RenderGraphEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorOptions::default())
    }
}

/// `(frame, attachment, clear value)` of each output, colors before depth.
fn attachments(graph: &RenderGraph, node: &RenderGraphNode) -> SmallVec<[(FrameIndex, AttachmentLayout, ClearValue); 5]> {
    let mut colors = node.layout.colors.iter();
    let mut out: SmallVec<[(FrameIndex, AttachmentLayout, ClearValue); 5]> = SmallVec::new();
    let mut depth = None;
    for (&frame, &clear) in node.outputs.iter().zip(&node.clear_values) {
        if graph.frame(frame).is_depth() {
            depth = node.layout.depth.map(|a| (frame, a, clear));
        } else if let Some(&a) = colors.next() {
            out.push((frame, a, clear));
        }
    }
    out.extend(depth);
    out
}

/// One pass for a run of merged nodes: the first node's load ops, the last
/// node's store ops.
fn pass_descriptor(
    graph: &RenderGraph,
    first: &RenderGraphNode,
    last: &RenderGraphNode,
    nodes: &[RenderGraphNode],
    textures: &[TextureHandle],
) -> PassDescriptor {
    let label = nodes
        .iter()
        .map(|n| n.label.as_str())
        .collect::<Vec<_>>()
        .join("+");
    let mut pass = PassDescriptor {
        label,
        colors: SmallVec::new(),
        depth: None,
        sample_count: first.layout.sample_count,
    };
    for ((frame, head, clear), (_, tail, _)) in attachments(graph, first)
        .into_iter()
        .zip(attachments(graph, last))
    {
        let load = match head.load {
            LoadOp::Load => LoadAction::Load,
            LoadOp::Clear => LoadAction::Clear(clear),
        };
        let texture = textures[frame.index()];
        if graph.frame(frame).is_depth() {
            pass.depth = Some(DepthAttachment {
                texture,
                load,
                store: tail.store,
            });
        } else {
            pass.colors.push(ColorAttachment {
                texture,
                load,
                store: tail.store,
            });
        }
    }
    pass
}

/// Records one node inside an open pass. Returns the number of draw calls.
fn record_node<D: GpuDevice>(
    device: &mut D,
    node: &RenderGraphNode,
    work: &NodeWork<'_>,
    textures: &[TextureHandle],
) -> Result<usize, EvaluateError> {
    match work {
        NodeWork::None => Ok(0),
        NodeWork::Drawables(buckets) => {
            let mut draws = 0;
            for bucket in buckets {
                // Frames the step samples take the slot of the same name.
                let frames: SmallVec<[Option<TextureHandle>; 4]> = bucket
                    .pipeline
                    .textures
                    .iter()
                    .map(|slot| node.sampled_input(&slot.name).map(|f| textures[f.index()]))
                    .collect();
                device.set_pipeline(bucket.pipeline.handle)?;
                if !bucket.object_data.is_empty() {
                    device.write_object_data(&bucket.object_data)?;
                }
                for group in &bucket.drawables.draw_groups {
                    device.draw(&DrawCommand::Mesh {
                        mesh: group.mesh,
                        first_instance: group.start,
                        instance_count: group.count,
                        textures: group
                            .textures
                            .iter()
                            .zip(&frames)
                            .map(|(&own, &frame)| frame.or(own))
                            .collect(),
                    })?;
                    draws += 1;
                }
            }
            Ok(draws)
        }
        NodeWork::Fullscreen {
            key,
            pipeline,
            object_data,
        } => {
            let sampled: SmallVec<[FrameIndex; 4]> = node.sampled_inputs().collect();
            let bound = pipeline
                .textures
                .iter()
                .map(|slot| {
                    key.texcoords
                        .iter()
                        .position(|(name, _)| *name == slot.name)
                        .and_then(|i| sampled.get(i))
                        .map(|frame| textures[frame.index()])
                })
                .collect();
            device.set_pipeline(pipeline.handle)?;
            if !object_data.is_empty() {
                device.write_object_data(object_data)?;
            }
            device.draw(&DrawCommand::Fullscreen { textures: bound })?;
            Ok(1)
        }
    }
}

fn node_report(node: &RenderGraphNode, work: &NodeWork<'_>) -> NodeReport {
    let (pipelines, draw_groups) = match work {
        NodeWork::None => (Vec::new(), Vec::new()),
        NodeWork::Drawables(buckets) => buckets
            .iter()
            .map(|b| (b.pipeline.identity, b.drawables.partition()))
            .unzip(),
        NodeWork::Fullscreen { pipeline, .. } => (vec![pipeline.identity], vec![vec![(0, 1)]]),
    };
    NodeReport {
        label: node.label.clone(),
        pipelines,
        draw_groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCommand, RecordingDevice};
    use crate::drawable::Drawable;
    use crate::feature::{EntryPoint, Feature, ShaderStage};
    use crate::mesh::{MeshFormat, MeshId, MeshRegistry, Transform};
    use crate::render_graph::{OutputBinding, StoreOp};
    use crate::step::{DrawQueueId, RenderStep, StepInput, StepOutput};

    const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    fn graph() -> RenderGraph {
        RenderGraph::build(
            &[
                RenderStep::clear("clear")
                    .output(StepOutput::new("color"))
                    .output(StepOutput::new("depth").format(wgpu::TextureFormat::Depth32Float)),
                RenderStep::drawables("opaque", DrawQueueId(0), vec![Feature::builder("lit").build()])
                    .output(StepOutput::new("color"))
                    .output(StepOutput::new("depth")),
                RenderStep::fullscreen("tonemap", Feature::builder("tonemap").build())
                    .input(StepInput::new("color"))
                    .output(StepOutput::new("ldr")),
            ],
            &[OutputBinding::new("ldr", 0)],
        )
        .unwrap()
    }

    struct Fixture {
        device: RecordingDevice,
        pipelines: PipelineCache,
        meshes: MeshRegistry,
        queues: DrawQueues,
        view: View,
        screen: ExternalTexture,
    }

    fn fixture() -> Fixture {
        let device = RecordingDevice::new();
        let screen = device
            .create_texture(&TextureDesc::render_target("screen", FORMAT, (320, 240), 1))
            .unwrap();
        let mut meshes = MeshRegistry::new();
        meshes.insert(MeshId(0), MeshFormat::standard());
        let mut queues = DrawQueues::new();
        queues.queue_mut(DrawQueueId(0)).draw(MeshId(0), Transform::new());
        queues.queue_mut(DrawQueueId(0)).draw(MeshId(0), Transform::new());
        Fixture {
            device,
            pipelines: PipelineCache::default(),
            meshes,
            queues,
            view: View::new(320, 240),
            screen: ExternalTexture::new(screen, FORMAT, 320, 240),
        }
    }

    #[test]
    fn records_one_pass_per_group() {
        let mut f = fixture();
        let graph = graph();
        let mut evaluator = RenderGraphEvaluator::default();
        evaluator.attach_output(0, f.screen);
        let inputs = FrameInputs {
            view: &f.view,
            queues: &f.queues,
            meshes: &f.meshes,
            outputs: &[],
        };
        let report = evaluator
            .evaluate(&mut f.device, &f.pipelines, &graph, &inputs)
            .unwrap();

        assert_eq!(report.node_count, 3);
        assert_eq!(report.pass_count, 2);
        assert_eq!(report.draw_calls, 2);
        assert_eq!(report.nodes[1].draw_groups, vec![vec![(0, 2)]]);

        let passes: Vec<&PassDescriptor> = f
            .device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::BeginPass(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(passes[0].label, "clear+opaque");
        assert!(matches!(passes[0].colors[0].load, LoadAction::Clear(_)));
        assert_eq!(passes[0].colors[0].store, StoreOp::Store);
        assert_eq!(passes[0].depth.map(|d| d.store), Some(StoreOp::Discard));
        assert_eq!(passes[1].colors[0].texture, f.screen.handle);
    }

    #[test]
    fn missing_outputs_fail_before_recording() {
        let mut f = fixture();
        let mut evaluator = RenderGraphEvaluator::default();
        let inputs = FrameInputs {
            view: &f.view,
            queues: &f.queues,
            meshes: &f.meshes,
            outputs: &[],
        };
        let err = evaluator
            .evaluate(&mut f.device, &f.pipelines, &graph(), &inputs)
            .unwrap_err();
        assert_eq!(err, EvaluateError::MissingOutput(0));
        assert!(f.device.commands().is_empty());
    }

    #[test]
    fn overrides_take_precedence_and_are_checked() {
        let mut f = fixture();
        let mut evaluator = RenderGraphEvaluator::default();
        evaluator.attach_output(0, f.screen);
        let small = ExternalTexture::new(f.screen.handle, FORMAT, 16, 16);
        let overrides = [(0, small)];
        let inputs = FrameInputs {
            view: &f.view,
            queues: &f.queues,
            meshes: &f.meshes,
            outputs: &overrides,
        };
        let err = evaluator
            .evaluate(&mut f.device, &f.pipelines, &graph(), &inputs)
            .unwrap_err();
        assert!(matches!(err, EvaluateError::OutputShapeMismatch { slot: 0, actual_width: 16, .. }));
    }

    #[test]
    fn unknown_meshes_fail_without_submitting() {
        let mut f = fixture();
        f.queues.queue_mut(DrawQueueId(0)).push(Drawable::new(MeshId(42)));
        let mut evaluator = RenderGraphEvaluator::default();
        evaluator.attach_output(0, f.screen);
        let inputs = FrameInputs {
            view: &f.view,
            queues: &f.queues,
            meshes: &f.meshes,
            outputs: &[],
        };
        let err = evaluator
            .evaluate(&mut f.device, &f.pipelines, &graph(), &inputs)
            .unwrap_err();
        assert_eq!(err, EvaluateError::UnknownMesh { queue: 0, mesh: 42 });
        assert!(f.device.commands().is_empty());
        assert_eq!(evaluator.texture_pool().active_count(), 0);
    }

    #[test]
    fn pooled_textures_are_reused_across_evaluations() {
        let mut f = fixture();
        let graph = graph();
        let mut evaluator = RenderGraphEvaluator::default();
        evaluator.attach_output(0, f.screen);
        for _ in 0..3 {
            let inputs = FrameInputs {
                view: &f.view,
                queues: &f.queues,
                meshes: &f.meshes,
                outputs: &[],
            };
            evaluator
                .evaluate(&mut f.device, &f.pipelines, &graph, &inputs)
                .unwrap();
        }
        // screen + color + depth
        assert_eq!(f.device.textures_created(), 3);
        assert_eq!(f.pipelines.len(), 2);
    }

    #[test]
    fn drawables_sample_their_step_inputs() {
        let mut f = fixture();
        let shadowed = Feature::builder("shadowed")
            .texture("shadow", 0)
            .entry_point(EntryPoint::new(
                "shade",
                ShaderStage::Fragment,
                "color = textureSample(shadow, material_sampler, shadow_uv);",
            ))
            .build();
        let graph = RenderGraph::build(
            &[
                RenderStep::clear("shadow pass").output(StepOutput::new("shadow")),
                RenderStep::drawables("lit", DrawQueueId(0), vec![shadowed])
                    .input(StepInput::new("shadow"))
                    .output(StepOutput::new("color")),
            ],
            &[OutputBinding::new("color", 0)],
        )
        .unwrap();
        let mut evaluator = RenderGraphEvaluator::default();
        evaluator.attach_output(0, f.screen);
        let inputs = FrameInputs {
            view: &f.view,
            queues: &f.queues,
            meshes: &f.meshes,
            outputs: &[],
        };
        evaluator
            .evaluate(&mut f.device, &f.pipelines, &graph, &inputs)
            .unwrap();

        let commands = f.device.commands();
        let shadow = commands
            .iter()
            .find_map(|c| match c {
                DeviceCommand::BeginPass(p) if p.label == "shadow pass" => Some(p.colors[0].texture),
                _ => None,
            })
            .unwrap();
        let bound = commands
            .iter()
            .find_map(|c| match c {
                DeviceCommand::Draw(DrawCommand::Mesh { textures, .. }) => Some(textures.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(bound.as_slice(), &[Some(shadow)]);
    }

    #[test]
    fn one_frame_cannot_take_two_textures() {
        let mut f = fixture();
        let other = f
            .device
            .create_texture(&TextureDesc::render_target("other", FORMAT, (320, 240), 1))
            .unwrap();
        let graph = RenderGraph::build(
            &[RenderStep::clear("clear").output(StepOutput::new("color"))],
            &[OutputBinding::new("color", 0), OutputBinding::new("color", 1)],
        )
        .unwrap();
        let mut evaluator = RenderGraphEvaluator::default();
        evaluator.attach_output(0, f.screen);
        evaluator.attach_output(1, ExternalTexture::new(other, FORMAT, 320, 240));
        let inputs = FrameInputs {
            view: &f.view,
            queues: &f.queues,
            meshes: &f.meshes,
            outputs: &[],
        };
        let err = evaluator
            .evaluate(&mut f.device, &f.pipelines, &graph, &inputs)
            .unwrap_err();
        assert_eq!(err, EvaluateError::ConflictingOutputs { first: 0, second: 1 });

        evaluator.attach_output(1, f.screen);
        assert!(evaluator.evaluate(&mut f.device, &f.pipelines, &graph, &inputs).is_ok());
    }
}
