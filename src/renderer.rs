//! The top-level renderer: graph cache, pipeline cache and evaluator around
//! one device.

use std::sync::Arc;

use crate::device::GpuDevice;
use crate::drawable::DrawQueues;
use crate::error::RenderError;
use crate::mesh::MeshSource;
use crate::pipeline::{PipelineBuilder, PipelineCache};
use crate::render_graph::{
    EvaluatorOptions, ExternalTexture, FrameInputs, FrameReport, OutputBinding, RenderGraph,
    RenderGraphCache, RenderGraphEvaluator,
};
use crate::shader::{ShaderGenerator, WgslGenerator};
use crate::step::RenderStep;
use crate::view::View;

/// Renderer settings.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Merge consecutive nodes writing the same attachments into one pass.
    pub merge_passes: bool,
    /// Prepare pipeline buckets of a node on the rayon pool.
    pub parallel_batching: bool,
    /// Evaluations a pooled texture may sit unused before it is destroyed.
    pub texture_idle_frames: u32,
    /// Drop parameters and textures no shader code references.
    pub optimize_buffer_layouts: bool,
    /// Graphs kept before the oldest is evicted.
    pub graph_cache_capacity: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            merge_passes: true,
            parallel_batching: true,
            texture_idle_frames: 8,
            optimize_buffer_layouts: true,
            graph_cache_capacity: 64,
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_passes(mut self, merge: bool) -> Self {
        self.merge_passes = merge;
        self
    }

    pub fn parallel_batching(mut self, parallel: bool) -> Self {
        self.parallel_batching = parallel;
        self
    }

    pub fn texture_idle_frames(mut self, frames: u32) -> Self {
        self.texture_idle_frames = frames;
        self
    }

    pub fn optimize_buffer_layouts(mut self, optimize: bool) -> Self {
        self.optimize_buffer_layouts = optimize;
        self
    }

    pub fn graph_cache_capacity(mut self, capacity: usize) -> Self {
        self.graph_cache_capacity = capacity;
        self
    }

    fn evaluator_options(&self) -> EvaluatorOptions {
        EvaluatorOptions {
            merge_passes: self.merge_passes,
            parallel_batching: self.parallel_batching,
            texture_idle_frames: self.texture_idle_frames,
        }
    }
}

/// Builds, caches and evaluates render graphs on one device.
///
/// # Example
///
/// ```
/// use phalanx::*;
///
/// let device = RecordingDevice::new();
/// let screen = device
///     .create_texture(&TextureDesc::render_target("screen", DEFAULT_COLOR_FORMAT, (64, 64), 1))
///     .unwrap();
/// let mut renderer = Renderer::new(device, RendererConfig::new());
/// renderer.attach_output(0, ExternalTexture::new(screen, DEFAULT_COLOR_FORMAT, 64, 64));
///
/// let steps = [RenderStep::clear("clear").output(StepOutput::new("color"))];
/// let report = renderer
///     .render(
///         &View::new(64, 64),
///         &steps,
///         &[OutputBinding::new("color", 0)],
///         &DrawQueues::new(),
///         &MeshRegistry::new(),
///     )
///     .unwrap();
/// assert_eq!(report.pass_count, 1);
/// ```
pub struct Renderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    graphs: RenderGraphCache,
    pipelines: PipelineCache,
    evaluator: RenderGraphEvaluator,
}

impl<D: GpuDevice> Renderer<D> {
    /// Creates a renderer generating WGSL with [`WgslGenerator`].
    pub fn new(device: D, config: RendererConfig) -> Self {
        Self::with_generator(device, config, Arc::new(WgslGenerator))
    }

    pub fn with_generator(device: D, config: RendererConfig, generator: Arc<dyn ShaderGenerator>) -> Self {
        let builder = PipelineBuilder::new(generator).optimize_buffer_layouts(config.optimize_buffer_layouts);
        Self {
            device,
            graphs: RenderGraphCache::new(config.graph_cache_capacity),
            pipelines: PipelineCache::new(builder),
            evaluator: RenderGraphEvaluator::new(config.evaluator_options()),
            config,
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Binds `texture` to output `slot` for every later frame.
    pub fn attach_output(&mut self, slot: u32, texture: ExternalTexture) {
        self.evaluator.attach_output(slot, texture);
    }

    pub fn detach_output(&mut self, slot: u32) -> Option<ExternalTexture> {
        self.evaluator.detach_output(slot)
    }

    /// Returns the graph for `steps`, building it on first use.
    pub fn graph(&self, steps: &[RenderStep], outputs: &[OutputBinding]) -> Result<Arc<RenderGraph>, RenderError> {
        Ok(self.graphs.get_or_build(steps, outputs)?)
    }

    /// Renders one frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::Build`] if the steps do not form a valid graph,
    /// [`RenderError::Evaluate`] if evaluation fails. A failed frame submits
    /// nothing and leaves every cache usable.
    pub fn render(
        &mut self,
        view: &View,
        steps: &[RenderStep],
        outputs: &[OutputBinding],
        queues: &DrawQueues,
        meshes: &dyn MeshSource,
    ) -> Result<FrameReport, RenderError> {
        self.render_with(view, steps, outputs, queues, meshes, &[])
    }

    /// Renders one frame with per-frame output textures taking precedence
    /// over attached ones.
    pub fn render_with(
        &mut self,
        view: &View,
        steps: &[RenderStep],
        outputs: &[OutputBinding],
        queues: &DrawQueues,
        meshes: &dyn MeshSource,
        textures: &[(u32, ExternalTexture)],
    ) -> Result<FrameReport, RenderError> {
        let graph = self.graphs.get_or_build(steps, outputs)?;
        let inputs = FrameInputs {
            view,
            queues,
            meshes,
            outputs: textures,
        };
        Ok(self
            .evaluator
            .evaluate(&mut self.device, &self.pipelines, &graph, &inputs)?)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn graph_cache(&self) -> &RenderGraphCache {
        &self.graphs
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn evaluator(&self) -> &RenderGraphEvaluator {
        &self.evaluator
    }

    /// Destroys pooled textures and forgets cached graphs and pipelines.
    pub fn reset(&mut self) {
        self.evaluator.release_textures(&self.device);
        self.graphs.clear();
        self.pipelines.clear();
    }
}
