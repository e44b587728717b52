//! The immutable render graph produced by [`RenderGraphBuilder`].

use std::ops::Range;

use crate::error::GraphBuildError;
use crate::hash::Hash128;
use crate::step::RenderStep;

use super::builder::RenderGraphBuilder;
use super::frame::{Frame, FrameIndex, GraphOutput, OutputBinding};
use super::node::RenderGraphNode;

/// Frames, nodes and output bindings of one connected step list.
///
/// Frames live in an arena owned by the graph and are referred to by
/// [`FrameIndex`]. Nothing here changes after construction; per-evaluation
/// state (physical textures, external outputs) lives in the evaluator.
///
/// ```text
///  frames:  [0 color] [1 depth] [2 ldr]
///  nodes:   clear(→0,1)  opaque(0,1→0,1)  tonemap(0→2)
///  outputs: frame 2 → slot 0
/// ```
#[derive(Debug)]
pub struct RenderGraph {
    frames: Vec<Frame>,
    nodes: Vec<RenderGraphNode>,
    outputs: Vec<GraphOutput>,
    hash: Hash128,
}

impl RenderGraph {
    /// Creates a new empty builder.
    pub fn builder() -> RenderGraphBuilder {
        RenderGraphBuilder::new()
    }

    /// Connects `steps` in order, then attaches `outputs`.
    pub fn build(steps: &[RenderStep], outputs: &[OutputBinding]) -> Result<Self, GraphBuildError> {
        let mut builder = RenderGraphBuilder::new();
        for step in steps {
            builder = builder.step(step.clone())?;
        }
        for output in outputs {
            builder = builder.attach_output(&output.name, output.slot)?;
        }
        Ok(builder.build())
    }

    pub(crate) fn from_parts(
        frames: Vec<Frame>,
        nodes: Vec<RenderGraphNode>,
        outputs: Vec<GraphOutput>,
        hash: Hash128,
    ) -> Self {
        Self {
            frames,
            nodes,
            outputs,
            hash,
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame(&self, index: FrameIndex) -> &Frame {
        &self.frames[index.index()]
    }

    pub fn nodes(&self) -> &[RenderGraphNode] {
        &self.nodes
    }

    /// External output bindings, sorted by slot.
    pub fn outputs(&self) -> &[GraphOutput] {
        &self.outputs
    }

    /// Frame bound to external `slot`, if any.
    pub fn output_frame(&self, slot: u32) -> Option<FrameIndex> {
        self.outputs.iter().find(|o| o.slot == slot).map(|o| o.frame)
    }

    /// Structural hash of frames, nodes and outputs.
    pub fn hash(&self) -> Hash128 {
        self.hash
    }

    /// Splits the node list into physical passes.
    ///
    /// Without merging every node is its own pass. With merging, a node joins
    /// the previous pass when it writes the same frames with the same
    /// attachment formats and loads every attachment, so the combined pass
    /// keeps the first node's load ops and the last node's store ops.
    /// Conversion nodes never merge.
    pub fn pass_groups(&self, merge: bool) -> Vec<Range<usize>> {
        let mut groups: Vec<Range<usize>> = Vec::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(last) = groups.last_mut().filter(|_| merge) {
                let head = &self.nodes[last.start];
                let mergeable = !node.kind.is_conversion()
                    && !head.kind.is_conversion()
                    && !node.outputs.is_empty()
                    && node.outputs == head.outputs
                    && node.layout.same_attachments(&head.layout)
                    && node.layout.loads_all();
                if mergeable {
                    last.end = i + 1;
                    continue;
                }
            }
            groups.push(i..i + 1);
        }
        groups
    }
}
