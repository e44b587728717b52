use std::sync::Arc;

use phalanx::pipeline::PipelineKey;
use phalanx::render_graph::{LoadOp, RenderTargetLayout};
use phalanx::*;

const FORMAT: wgpu::TextureFormat = DEFAULT_COLOR_FORMAT;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn shaded() -> FeatureRef {
    Feature::builder("shaded")
        .parameter("tint", ParameterValue::Vec4(Vec4::new(0.5, 0.5, 0.5, 1.0)))
        .parameter("gloss", ParameterValue::Float(0.25))
        .entry_point(EntryPoint::new(
            "shade",
            ShaderStage::Fragment,
            "color = color * tint * gloss;",
        ))
        .build()
}

fn forward_steps(features: Vec<FeatureRef>) -> Vec<RenderStep> {
    vec![
        RenderStep::clear("clear")
            .output(StepOutput::new("color"))
            .output(StepOutput::new("depth").format(wgpu::TextureFormat::Depth32Float)),
        RenderStep::drawables("opaque", DrawQueueId(0), features)
            .output(StepOutput::new("color"))
            .output(StepOutput::new("depth")),
    ]
}

fn outputs() -> [OutputBinding; 1] {
    [OutputBinding::new("color", 0)]
}

fn meshes() -> MeshRegistry {
    let mut meshes = MeshRegistry::new();
    meshes.insert(MeshId(0), MeshFormat::standard());
    meshes.insert(MeshId(1), MeshFormat::standard());
    meshes.insert(
        MeshId(2),
        MeshFormat::new().attribute(VertexSemantic::Position, wgpu::VertexFormat::Float32x3),
    );
    meshes
}

fn renderer(config: RendererConfig) -> Renderer<RecordingDevice> {
    init_logging();
    let device = RecordingDevice::new();
    let screen = device
        .create_texture(&TextureDesc::render_target("screen", FORMAT, (64, 64), 1))
        .unwrap();
    let mut renderer = Renderer::new(device, config);
    renderer.attach_output(0, ExternalTexture::new(screen, FORMAT, 64, 64));
    renderer
}

fn queue_of(drawables: impl IntoIterator<Item = Drawable>) -> DrawQueues {
    let mut queues = DrawQueues::new();
    for drawable in drawables {
        queues.queue_mut(DrawQueueId(0)).push(drawable);
    }
    queues
}

fn object_writes(device: &RecordingDevice) -> Vec<Vec<u8>> {
    device
        .commands()
        .iter()
        .filter_map(|c| match c {
            DeviceCommand::WriteObjectData(data) => Some(data.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn identical_steps_share_one_cached_graph() {
    let renderer = renderer(RendererConfig::new());
    let a = renderer.graph(&forward_steps(vec![]), &outputs()).unwrap();
    let b = renderer.graph(&forward_steps(vec![]), &outputs()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(renderer.graph_cache().len(), 1);

    let mut renamed = forward_steps(vec![]);
    renamed[1] = RenderStep::drawables("opaque", DrawQueueId(0), vec![])
        .output(StepOutput::new("color"))
        .output(StepOutput::new("depth"))
        .output(StepOutput::new("normals"));
    let c = renderer.graph(&renamed, &outputs()).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(renderer.graph_cache().len(), 2);
}

#[test]
fn rewritten_outputs_alias_the_first_writer() {
    let steps = [
        RenderStep::clear("a")
            .output(StepOutput::new("color"))
            .output(StepOutput::new("depth").format(wgpu::TextureFormat::Depth32Float)),
        RenderStep::drawables("b", DrawQueueId(0), vec![])
            .input(StepInput::new("color"))
            .input(StepInput::new("depth"))
            .output(StepOutput::new("color")),
    ];
    let graph = RenderGraph::build(&steps, &outputs()).unwrap();
    assert_eq!(graph.nodes().len(), 2);
    assert_eq!(graph.frames().len(), 2);

    let (a, b) = (&graph.nodes()[0], &graph.nodes()[1]);
    assert_eq!(b.inputs[0], a.outputs[0]);
    assert_eq!(b.outputs[0], a.outputs[0]);
    assert_eq!(b.layout.colors[0].load, LoadOp::Load);
}

#[test]
fn clearing_rewrite_reuses_the_frame_with_a_clear() {
    let steps = [
        RenderStep::clear("a").output(StepOutput::new("color")),
        RenderStep::drawables("b", DrawQueueId(0), vec![])
            .output(StepOutput::new("color").cleared(ClearValue::color(1.0, 0.0, 0.0, 1.0))),
    ];
    let graph = RenderGraph::build(&steps, &outputs()).unwrap();
    assert_eq!(graph.frames().len(), 1);
    assert_eq!(graph.nodes()[1].outputs[0], graph.nodes()[0].outputs[0]);
    assert_eq!(graph.nodes()[1].layout.colors[0].load, LoadOp::Clear);
}

#[test]
fn draw_groups_partition_the_sorted_drawables() {
    let mut renderer = renderer(RendererConfig::new());
    let queues = queue_of([1, 0, 1, 0, 0].map(|m| Drawable::new(MeshId(m))));
    let report = renderer
        .render(&View::new(64, 64), &forward_steps(vec![shaded()]), &outputs(), &queues, &meshes())
        .unwrap();

    let groups = &report.nodes[1].draw_groups;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0], vec![(0, 3), (3, 2)]);

    let mut next = 0;
    for &(start, count) in &groups[0] {
        assert_eq!(start, next);
        next += count;
    }
    assert_eq!(next, 5);
    assert_eq!(report.draw_calls, 2);
}

#[test]
fn buckets_follow_features_and_mesh_format() {
    let mut renderer = renderer(RendererConfig::new());
    let extra = Feature::builder("outline").build();
    let queues = queue_of([
        Drawable::new(MeshId(0)),
        Drawable::new(MeshId(1)),
        Drawable::new(MeshId(2)),
        Drawable::new(MeshId(0)).feature(extra),
    ]);
    let report = renderer
        .render(&View::new(64, 64), &forward_steps(vec![shaded()]), &outputs(), &queues, &meshes())
        .unwrap();

    // meshes 0 and 1 share a vertex format
    let pipelines = &report.nodes[1].pipelines;
    assert_eq!(pipelines.len(), 3);
    assert_eq!(report.nodes[1].draw_groups[0], vec![(0, 1), (1, 1)]);
}

#[test]
fn target_layout_is_part_of_pipeline_identity() {
    let hdr_steps = [RenderStep::drawables("opaque", DrawQueueId(0), vec![])
        .output(StepOutput::new("color").format(wgpu::TextureFormat::Rgba16Float))];
    let ldr_steps = [RenderStep::drawables("opaque", DrawQueueId(0), vec![]).output(StepOutput::new("color"))];
    let hdr = RenderGraph::build(&hdr_steps, &[]).unwrap();
    let ldr = RenderGraph::build(&ldr_steps, &[]).unwrap();

    let drawable = Drawable::new(MeshId(0));
    let format = MeshFormat::standard();
    let features = [shaded()];
    let a = PipelineKey::for_drawable(&features, &drawable, &format, &hdr.nodes()[0].layout);
    let b = PipelineKey::for_drawable(&features, &drawable, &format, &ldr.nodes()[0].layout);
    let c = PipelineKey::for_drawable(&features, &drawable, &format, &ldr.nodes()[0].layout);
    assert_ne!(a.identity(), b.identity());
    assert_eq!(b.identity(), c.identity());
}

#[test]
fn object_records_hold_defaults_for_unset_parameters() {
    let mut renderer = renderer(RendererConfig::new());
    let queues = queue_of([
        Drawable::new(MeshId(0)),
        Drawable::new(MeshId(0))
            .transform(Transform::from_position(Vec3::new(1.0, 2.0, 3.0)))
            .parameter("gloss", ParameterValue::Float(0.75)),
    ]);
    let report = renderer
        .render(&View::new(64, 64), &forward_steps(vec![shaded()]), &outputs(), &queues, &meshes())
        .unwrap();

    let identity = report.nodes[1].pipelines[0];
    let pipeline = renderer.pipeline_cache().get(identity).unwrap();
    let layout = &pipeline.object_layout;
    let stride = layout.stride as usize;
    let tint = layout.field("tint").unwrap().offset as usize / 4;
    let gloss = layout.field("gloss").unwrap().offset as usize / 4;

    let writes = object_writes(renderer.device());
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].len(), stride * 2);

    let first = floats(&writes[0][..stride]);
    let second = floats(&writes[0][stride..]);
    assert_eq!(first[gloss], 0.25);
    assert_eq!(second[gloss], 0.75);
    assert_eq!(&first[tint..tint + 4], &[0.5, 0.5, 0.5, 1.0]);
    assert_eq!(&second[tint..tint + 4], &[0.5, 0.5, 0.5, 1.0]);
    assert_eq!(&second[12..15], &[1.0, 2.0, 3.0]);
}

#[test]
fn concurrent_requests_build_one_pipeline() {
    let device = RecordingDevice::new();
    let cache = phalanx::pipeline::PipelineCache::default();
    let key = PipelineKey::for_drawable(
        &[shaded()],
        &Drawable::new(MeshId(0)),
        &MeshFormat::standard(),
        &RenderTargetLayout::default(),
    );

    let handles: Vec<PipelineHandle> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| cache.get_or_build(&device, &key).unwrap().handle))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(device.pipelines_created(), 1);
    assert_eq!(cache.builds(), 1);
    assert!(handles.iter().all(|&h| h == handles[0]));
}

#[test]
fn unchanged_frames_evaluate_identically() {
    let mut renderer = renderer(RendererConfig::new());
    let queues = queue_of((0..12).map(|i| Drawable::new(MeshId(i % 3)).parameter("gloss", ParameterValue::Float(i as f32))));
    let steps = forward_steps(vec![shaded()]);
    let view = View::new(64, 64);

    let first = renderer.render(&view, &steps, &outputs(), &queues, &meshes()).unwrap();
    let second = renderer.render(&view, &steps, &outputs(), &queues, &meshes()).unwrap();

    assert_eq!(first.graph, second.graph);
    assert_eq!(first.node_count, second.node_count);
    assert_eq!(first.nodes, second.nodes);
    assert_eq!(second.submission, first.submission + 1);
    assert_eq!(renderer.pipeline_cache().builds(), 2);
}

#[test]
fn misshapen_outputs_fail_only_that_evaluation() {
    let mut renderer = renderer(RendererConfig::new());
    let queues = queue_of([Drawable::new(MeshId(0))]);
    let steps = forward_steps(vec![]);

    let err = renderer
        .render(&View::new(128, 128), &steps, &outputs(), &queues, &meshes())
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::Evaluate(EvaluateError::OutputShapeMismatch {
            slot: 0,
            expected_width: 128,
            actual_width: 64,
            ..
        })
    ));

    renderer
        .render(&View::new(64, 64), &steps, &outputs(), &queues, &meshes())
        .unwrap();
    assert_eq!(renderer.graph_cache().len(), 1);
}

#[test]
fn missing_queues_are_reported() {
    let mut renderer = renderer(RendererConfig::new());
    let err = renderer
        .render(&View::new(64, 64), &forward_steps(vec![]), &outputs(), &DrawQueues::new(), &meshes())
        .unwrap_err();
    assert_eq!(err, RenderError::Evaluate(EvaluateError::MissingDrawQueue(0)));
    assert!(renderer.device().commands().is_empty());
}

#[test]
fn failed_pipeline_builds_are_retried() {
    let mut renderer = renderer(RendererConfig::new());
    let queues = queue_of([Drawable::new(MeshId(0))]);
    let steps = forward_steps(vec![shaded()]);

    renderer.device().fail_pipelines(true);
    let err = renderer
        .render(&View::new(64, 64), &steps, &outputs(), &queues, &meshes())
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::Evaluate(EvaluateError::Pipeline(PipelineError::PipelineCreationFailed { .. }))
    ));
    assert!(renderer.pipeline_cache().is_empty());

    renderer.device().fail_pipelines(false);
    renderer
        .render(&View::new(64, 64), &steps, &outputs(), &queues, &meshes())
        .unwrap();
    assert_eq!(renderer.pipeline_cache().len(), 1);
}

#[test]
fn merging_can_be_disabled() {
    let queues = queue_of([Drawable::new(MeshId(0))]);
    let steps = forward_steps(vec![]);

    let mut merged = renderer(RendererConfig::new());
    let report = merged
        .render(&View::new(64, 64), &steps, &outputs(), &queues, &meshes())
        .unwrap();
    assert_eq!(report.pass_count, 1);

    let mut separate = renderer(RendererConfig::new().merge_passes(false));
    let report = separate
        .render(&View::new(64, 64), &steps, &outputs(), &queues, &meshes())
        .unwrap();
    assert_eq!(report.pass_count, 2);
}

#[test]
fn in_flight_targets_are_not_reused() {
    let mut renderer = renderer(RendererConfig::new());
    let queues = queue_of([Drawable::new(MeshId(0))]);
    let steps = forward_steps(vec![]);
    let view = View::new(64, 64);

    renderer.device().hold_completion();
    renderer.render(&view, &steps, &outputs(), &queues, &meshes()).unwrap();
    renderer.render(&view, &steps, &outputs(), &queues, &meshes()).unwrap();
    // screen plus one depth target per in-flight frame
    assert_eq!(renderer.device().textures_created(), 3);

    renderer.device().complete_all();
    renderer.render(&view, &steps, &outputs(), &queues, &meshes()).unwrap();
    assert_eq!(renderer.device().textures_created(), 3);
}

#[test]
fn scaled_frames_follow_the_view_extent() {
    let mut renderer = renderer(RendererConfig::new());
    let steps = [
        RenderStep::clear("clear").output(StepOutput::new("color")),
        RenderStep::fullscreen("downsample", Feature::builder("downsample").build())
            .input(StepInput::new("color"))
            .output(StepOutput::new("half").size(SizePolicy::scaled(1, 2))),
    ];
    renderer
        .render(&View::new(64, 64), &steps, &outputs(), &DrawQueues::new(), &meshes())
        .unwrap();

    let device = renderer.device();
    let half = device
        .commands()
        .iter()
        .find_map(|c| match c {
            DeviceCommand::BeginPass(pass) if pass.label == "downsample" => Some(pass.colors[0].texture),
            _ => None,
        })
        .unwrap();
    let desc = device.texture_desc(half).unwrap();
    assert_eq!((desc.width, desc.height), (32, 32));
}
