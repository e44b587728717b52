//! Declarative render steps: the input to the render-graph builder.
//!
//! A frame is described as an ordered list of [`RenderStep`]s. Each step names
//! the frames it reads ([`StepInput`]) and writes ([`StepOutput`]); the builder
//! connects those names into a graph. Step order is a user-declared priority,
//! never rearranged.
//!
//! ```text
//!  clear ──▶ "color","depth"
//!  opaque  reads "depth"           writes "color","depth"   (loads)
//!  tonemap reads "color"           writes "ldr"
//! ```
//!
//! # Example
//!
//! ```
//! use phalanx::{DrawQueueId, RenderStep, StepInput, StepOutput};
//!
//! let steps = vec![
//!     RenderStep::clear("clear")
//!         .output(StepOutput::new("color"))
//!         .output(StepOutput::new("depth").format(wgpu::TextureFormat::Depth32Float)),
//!     RenderStep::drawables("opaque", DrawQueueId(0), vec![])
//!         .input(StepInput::new("depth"))
//!         .output(StepOutput::new("color"))
//!         .output(StepOutput::new("depth")),
//! ];
//! assert_eq!(steps[1].inputs.len(), 1);
//! ```

use std::hash::{Hash, Hasher};

use crate::feature::FeatureRef;
use crate::hash::{Hash128, hash_f32, hash_f32_slice};

/// Format given to new frames whose first writer does not name one.
pub const DEFAULT_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Identifies the draw queue a drawables step consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawQueueId(pub u32);

/// How a frame's size is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SizePolicy {
    /// Fixed size in pixels.
    Absolute { width: u32, height: u32 },
    /// `num / den` of the view extent on both axes.
    Relative { num: u32, den: u32 },
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self::full()
    }
}

impl SizePolicy {
    /// Same size as the view.
    pub fn full() -> Self {
        Self::Relative { num: 1, den: 1 }
    }

    pub fn scaled(num: u32, den: u32) -> Self {
        Self::Relative {
            num,
            den: den.max(1),
        }
    }

    pub fn absolute(width: u32, height: u32) -> Self {
        Self::Absolute { width, height }
    }

    /// Resolves to pixels against the view extent. Never returns a zero dimension.
    pub fn resolve(&self, extent: (u32, u32)) -> (u32, u32) {
        match *self {
            Self::Absolute { width, height } => (width.max(1), height.max(1)),
            Self::Relative { num, den } => {
                let den = den.max(1) as u64;
                let w = (extent.0 as u64 * num as u64 / den).max(1);
                let h = (extent.1 as u64 * num as u64 / den).max(1);
                (w as u32, h as u32)
            }
        }
    }
}

/// Values written when an attachment is cleared.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValue {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValue {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

impl ClearValue {
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            color: [r, g, b, a],
            ..Default::default()
        }
    }

    pub fn depth(depth: f32) -> Self {
        Self {
            depth,
            ..Default::default()
        }
    }
}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_f32_slice(&self.color, state);
        hash_f32(self.depth, state);
        self.stencil.hash(state);
    }
}

/// A named frame read by a step.
///
/// The optional requirements describe the shape the step needs; when the
/// producing frame differs, the builder inserts a conversion node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StepInput {
    pub name: String,
    pub format: Option<wgpu::TextureFormat>,
    pub size: Option<SizePolicy>,
    pub sample_count: Option<u32>,
}

impl StepInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            size: None,
            sample_count: None,
        }
    }

    pub fn format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn size(mut self, size: SizePolicy) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sample_count(mut self, samples: u32) -> Self {
        self.sample_count = Some(samples);
        self
    }
}

/// A named frame written by a step.
///
/// Unset `format`, `size` and `sample_count` inherit from the aliased frame, or
/// fall back to [`DEFAULT_COLOR_FORMAT`], full view size and one sample for a
/// new frame.
///
/// When an earlier step already wrote the name, the write aliases that frame:
/// with `clear_on_write == false` the previous contents are loaded; with
/// `clear_on_write == true` the slot is cleared to `clear_value`.
#[derive(Clone, Debug, PartialEq, Hash)]
pub struct StepOutput {
    pub name: String,
    pub format: Option<wgpu::TextureFormat>,
    pub size: Option<SizePolicy>,
    pub sample_count: Option<u32>,
    pub clear_on_write: bool,
    pub clear_value: ClearValue,
}

impl StepOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: None,
            size: None,
            sample_count: None,
            clear_on_write: false,
            clear_value: ClearValue::default(),
        }
    }

    pub fn format(mut self, format: wgpu::TextureFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn size(mut self, size: SizePolicy) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sample_count(mut self, samples: u32) -> Self {
        self.sample_count = Some(samples);
        self
    }

    /// Clears the frame before this write instead of loading it.
    pub fn cleared(mut self, value: ClearValue) -> Self {
        self.clear_on_write = true;
        self.clear_value = value;
        self
    }
}

/// What a step does once its frames are bound.
#[derive(Clone, Debug)]
pub enum StepKind {
    /// Clears every output; issues no draws.
    Clear,
    /// One fullscreen triangle shaded by `effect`, sampling the inputs.
    Fullscreen { effect: FeatureRef },
    /// Draws every drawable of `queue`, grouped by pipeline.
    Drawables {
        queue: DrawQueueId,
        features: Vec<FeatureRef>,
    },
}

impl Hash for StepKind {
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
        }
    }
}

/// One declarative pass.
///
/// `label` is for debugging only and does not take part in hashing.
#[derive(Clone, Debug)]
pub struct RenderStep {
    pub label: String,
    pub kind: StepKind,
    pub inputs: Vec<StepInput>,
    pub outputs: Vec<StepOutput>,
}

impl RenderStep {
    /// A clear-only step. Every output is cleared regardless of its
    /// `clear_on_write` flag.
    pub fn clear(label: impl Into<String>) -> Self {
        Self::with_kind(label, StepKind::Clear)
    }

    pub fn fullscreen(label: impl Into<String>, effect: FeatureRef) -> Self {
        Self::with_kind(label, StepKind::Fullscreen { effect })
    }

    pub fn drawables(label: impl Into<String>, queue: DrawQueueId, features: Vec<FeatureRef>) -> Self {
        Self::with_kind(label, StepKind::Drawables { queue, features })
    }

    fn with_kind(label: impl Into<String>, kind: StepKind) -> Self {
        Self {
            label: label.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: StepOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Features whose entry points this step compiles at the step level.
    pub fn features(&self) -> &[FeatureRef] {
        match &self.kind {
            StepKind::Clear => &[],
            StepKind::Fullscreen { effect } => std::slice::from_ref(effect),
            StepKind::Drawables { features, .. } => features,
        }
    }

    /// Whether the write to output `index` clears rather than loads.
    pub fn clears_output(&self, index: usize) -> bool {
        matches!(self.kind, StepKind::Clear)
            || self.outputs.get(index).is_some_and(|o| o.clear_on_write)
    }
}

impl Hash for RenderStep {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.inputs.hash(state);
        self.outputs.hash(state);
    }
}

/// Structural hash of an ordered step list.
pub fn steps_hash(steps: &[RenderStep]) -> Hash128 {
    Hash128::of(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;

    #[test]
    fn label_does_not_affect_hash() {
        let a = vec![RenderStep::clear("a").output(StepOutput::new("color"))];
        let b = vec![RenderStep::clear("b").output(StepOutput::new("color"))];
        assert_eq!(steps_hash(&a), steps_hash(&b));
    }

    #[test]
    fn output_names_affect_hash() {
        let a = vec![RenderStep::clear("c").output(StepOutput::new("color"))];
        let b = vec![RenderStep::clear("c").output(StepOutput::new("colour"))];
        assert_ne!(steps_hash(&a), steps_hash(&b));
    }

    #[test]
    fn features_hash_by_content() {
        let f1 = Feature::builder("fx").build();
        let f2 = Feature::builder("fx").build();
        let a = vec![RenderStep::fullscreen("fx", f1)];
        let b = vec![RenderStep::fullscreen("fx", f2)];
        assert_eq!(steps_hash(&a), steps_hash(&b));
    }

    #[test]
    fn relative_size_resolves_against_extent() {
        assert_eq!(SizePolicy::scaled(1, 2).resolve((1920, 1080)), (960, 540));
        assert_eq!(SizePolicy::scaled(1, 4096).resolve((100, 100)), (1, 1));
        assert_eq!(SizePolicy::absolute(64, 32).resolve((1920, 1080)), (64, 32));
    }

    #[test]
    fn clear_steps_always_clear() {
        let step = RenderStep::clear("c").output(StepOutput::new("color"));
        assert!(step.clears_output(0));
        let step = RenderStep::drawables("d", DrawQueueId(0), vec![]).output(StepOutput::new("color"));
        assert!(!step.clears_output(0));
    }
}
