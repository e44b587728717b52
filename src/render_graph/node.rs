//! Render graph nodes: one per step, plus implicit conversion nodes.

use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use crate::feature::FeatureRef;
use crate::step::{ClearValue, DrawQueueId};

use super::frame::{FrameIndex, RenderTargetLayout};

/// How a conversion node reshapes its source frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    /// Same size, different format.
    Copy,
    /// Different size, optionally a different format.
    Resize,
    /// Multisampled to single-sampled.
    Resolve,
}

/// What a node does when evaluated.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Clear,
    Fullscreen {
        effect: FeatureRef,
    },
    Drawables {
        queue: DrawQueueId,
        features: SmallVec<[FeatureRef; 4]>,
    },
    /// Inserted by the builder between a producer and a consumer whose
    /// input requirements differ from the produced frame.
    Conversion(ConversionKind),
}

impl NodeKind {
    pub fn is_conversion(&self) -> bool {
        matches!(self, Self::Conversion(_))
    }
}

impl Hash for NodeKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Clear => {}
            Self::Fullscreen { effect } => effect.content_hash().hash(state),
            Self::Drawables { queue, features } => {
                queue.hash(state);
                features.len().hash(state);
                for f in features {
                    f.content_hash().hash(state);
                }
            }
            Self::Conversion(kind) => kind.hash(state),
        }
    }
}

/// One evaluated step.
///
/// `outputs[i]` is written with the clear value `clear_values[i]` when its
/// attachment's load op is `Clear`. An input that is also an output is
/// satisfied by loading the attachment and is not sampled.
#[derive(Clone, Debug)]
pub struct RenderGraphNode {
    pub label: String,
    pub kind: NodeKind,
    /// Index of the step this node came from. `None` for conversions.
    pub step: Option<usize>,
    pub inputs: SmallVec<[FrameIndex; 4]>,
    /// Names the step read each input under, parallel to `inputs`.
    pub input_names: SmallVec<[String; 4]>,
    pub outputs: SmallVec<[FrameIndex; 4]>,
    pub clear_values: SmallVec<[ClearValue; 4]>,
    pub layout: RenderTargetLayout,
}

impl RenderGraphNode {
    /// Inputs read through a texture binding rather than an attachment load.
    pub fn sampled_inputs(&self) -> impl Iterator<Item = FrameIndex> + '_ {
        self.inputs
            .iter()
            .copied()
            .filter(|i| !self.outputs.contains(i))
    }

    /// The frame sampled under `name`, if any.
    pub fn sampled_input(&self, name: &str) -> Option<FrameIndex> {
        self.inputs
            .iter()
            .zip(&self.input_names)
            .find(|(frame, input)| *input == name && !self.outputs.contains(frame))
            .map(|(&frame, _)| frame)
    }
}

impl Hash for RenderGraphNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.step.hash(state);
        self.inputs.hash(state);
        self.input_names.hash(state);
        self.outputs.hash(state);
        self.clear_values.hash(state);
        self.layout.hash(state);
    }
}
