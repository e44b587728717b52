//! Combining partial pipeline state across features.

use crate::feature::{BlendMode, CullMode, FeatureRef, PipelineState, Toggle};

/// Fully resolved fixed-function state of one pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedState {
    pub depth_write: bool,
    pub depth_test: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub blend: BlendMode,
    pub color_write: wgpu::ColorWrites,
    pub cull: CullMode,
}

impl Default for ResolvedState {
    fn default() -> Self {
        Self {
            depth_write: false,
            depth_test: false,
            depth_compare: wgpu::CompareFunction::Less,
            blend: BlendMode::Opaque,
            color_write: wgpu::ColorWrites::ALL,
            cull: CullMode::Back,
        }
    }
}

impl ResolvedState {
    /// Depth-stencil state for a depth attachment of `format`.
    pub fn depth_stencil(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write,
            depth_compare: if self.depth_test {
                self.depth_compare
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

fn merge_toggle(acc: Toggle, next: Toggle) -> Toggle {
    match (acc, next) {
        (Toggle::Disable, _) | (_, Toggle::Disable) => Toggle::Disable,
        (Toggle::Enable, _) | (_, Toggle::Enable) => Toggle::Enable,
        _ => Toggle::Inherit,
    }
}

/// Combines feature states in order.
///
/// Flags are OR'd: any `Enable` turns a flag on unless some feature says
/// `Disable`. Scalar settings take the last feature that sets them.
pub fn combine_states<'a>(states: impl IntoIterator<Item = &'a PipelineState>) -> ResolvedState {
    let mut depth_write = Toggle::Inherit;
    let mut depth_test = Toggle::Inherit;
    let mut resolved = ResolvedState::default();
    for state in states {
        depth_write = merge_toggle(depth_write, state.depth_write);
        depth_test = merge_toggle(depth_test, state.depth_test);
        if let Some(compare) = state.depth_compare {
            resolved.depth_compare = compare;
        }
        if let Some(blend) = state.blend {
            resolved.blend = blend;
        }
        if let Some(mask) = state.color_write {
            resolved.color_write = mask;
        }
        if let Some(cull) = state.cull {
            resolved.cull = cull;
        }
    }
    resolved.depth_write = depth_write == Toggle::Enable;
    resolved.depth_test = depth_test == Toggle::Enable;
    resolved
}

/// Combined state of a feature list.
pub fn combine_features(features: &[FeatureRef]) -> ResolvedState {
    combine_states(features.iter().map(|f| f.state()))
}
