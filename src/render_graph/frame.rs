//! Passive descriptors produced by the builder and consumed by the evaluator.

use std::hash::Hash;

use smallvec::SmallVec;

use crate::step::SizePolicy;

/// Index of a [`Frame`] inside its graph's frame arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameIndex(pub u32);

impl FrameIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A logical render-target slot, bound to a physical texture per evaluation.
///
/// `name` is for debugging; identity is the frame's position in the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub name: String,
    pub format: wgpu::TextureFormat,
    pub size: SizePolicy,
    pub sample_count: u32,
}

impl Frame {
    pub fn is_depth(&self) -> bool {
        self.format.is_depth_stencil_format()
    }

    /// Pixel size against the view extent.
    pub fn resolve_size(&self, extent: (u32, u32)) -> (u32, u32) {
        self.size.resolve(extent)
    }
}

impl Hash for Frame {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.format.hash(state);
        self.size.hash(state);
        self.sample_count.hash(state);
    }
}

/// What happens to an attachment's previous contents when a pass begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
}

/// Whether an attachment's contents survive the end of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    Discard,
}

impl StoreOp {
    pub fn to_wgpu(self) -> wgpu::StoreOp {
        match self {
            Self::Store => wgpu::StoreOp::Store,
            Self::Discard => wgpu::StoreOp::Discard,
        }
    }
}

/// One attachment of a [`RenderTargetLayout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentLayout {
    pub format: wgpu::TextureFormat,
    pub load: LoadOp,
    pub store: StoreOp,
}

/// Ordered attachment formats with load/store ops and a sample count.
///
/// Structural: two nodes with the same attachment sequence compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderTargetLayout {
    pub colors: SmallVec<[AttachmentLayout; 4]>,
    pub depth: Option<AttachmentLayout>,
    pub sample_count: u32,
}

impl RenderTargetLayout {
    pub fn color_formats(&self) -> impl Iterator<Item = wgpu::TextureFormat> + '_ {
        self.colors.iter().map(|c| c.format)
    }

    pub fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        self.depth.map(|d| d.format)
    }

    /// Same attachment formats and sample count, ignoring load/store ops.
    pub fn same_attachments(&self, other: &Self) -> bool {
        self.sample_count == other.sample_count
            && self.depth_format() == other.depth_format()
            && self.color_formats().eq(other.color_formats())
    }

    /// Returns `true` if every attachment loads its previous contents.
    pub fn loads_all(&self) -> bool {
        self.colors
            .iter()
            .chain(self.depth.iter())
            .all(|a| a.load == LoadOp::Load)
    }

    /// Attachments in declaration order: colors first, then depth.
    pub fn attachments_mut(&mut self) -> impl Iterator<Item = &mut AttachmentLayout> {
        self.colors.iter_mut().chain(self.depth.iter_mut())
    }
}

/// Binds a graph frame to an externally supplied texture slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GraphOutput {
    pub frame: FrameIndex,
    pub slot: u32,
}

/// A named output request handed to the builder: bind the latest writer of
/// `name` to external `slot`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutputBinding {
    pub name: String,
    pub slot: u32,
}

impl OutputBinding {
    pub fn new(name: impl Into<String>, slot: u32) -> Self {
        Self {
            name: name.into(),
            slot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn color(format: wgpu::TextureFormat, load: LoadOp) -> AttachmentLayout {
        AttachmentLayout {
            format,
            load,
            store: StoreOp::Store,
        }
    }

    #[test]
    fn same_attachments_ignores_ops() {
        let a = RenderTargetLayout {
            colors: smallvec![color(wgpu::TextureFormat::Rgba8Unorm, LoadOp::Clear)],
            depth: None,
            sample_count: 1,
        };
        let b = RenderTargetLayout {
            colors: smallvec![color(wgpu::TextureFormat::Rgba8Unorm, LoadOp::Load)],
            depth: None,
            sample_count: 1,
        };
        assert_ne!(a, b);
        assert!(a.same_attachments(&b));
        assert!(b.loads_all());
        assert!(!a.loads_all());
    }

    #[test]
    fn frame_name_is_not_identity() {
        use crate::hash::Hash128;
        let a = Frame {
            name: "a".into(),
            format: wgpu::TextureFormat::Rgba8Unorm,
            size: SizePolicy::full(),
            sample_count: 1,
        };
        let b = Frame {
            name: "b".into(),
            ..a.clone()
        };
        assert_eq!(Hash128::of(&a), Hash128::of(&b));
    }
}
