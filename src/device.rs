//! The GPU device seam: resource creation and pass recording.
//!
//! The scheduler never talks to a graphics API directly. It creates textures
//! and pipelines through a [`GpuDevice`] and records each evaluation as a
//! flat sequence of passes:
//!
//! ```text
//! write_view_data
//! begin_pass ─▶ set_pipeline ─▶ write_object_data ─▶ draw* ─▶ end_pass
//! convert                                   (between passes)
//! submit ──▶ submission index
//! ```
//!
//! A partially recorded evaluation is dropped whole with
//! [`GpuDevice::discard`]. [`crate::WgpuDevice`] drives wgpu;
//! [`RecordingDevice`] keeps a command log and needs no GPU.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::DeviceError;
use crate::hash::Hash128;
use crate::mesh::{MeshFormat, MeshId};
use crate::pipeline::bindings::LayoutEntry;
use crate::pipeline::identity::PipelineKind;
use crate::pipeline::state::ResolvedState;
use crate::render_graph::{ConversionKind, RenderTargetLayout, StoreOp};
use crate::shader::GeneratedShader;
use crate::step::ClearValue;

/// Type-safe handle to a device texture.
///
/// This newtype wrapper prevents accidentally passing pipeline handles where
/// texture handles are expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Type-safe handle to a device pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u64);

/// A 2D texture to create.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub label: String,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub usage: wgpu::TextureUsages,
}

impl TextureDesc {
    /// A render target that later passes can sample. Single-sampled targets
    /// can also be copied from and to.
    pub fn render_target(
        label: impl Into<String>,
        format: wgpu::TextureFormat,
        (width, height): (u32, u32),
        sample_count: u32,
    ) -> Self {
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        if sample_count <= 1 {
            usage |= wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        }
        Self {
            label: label.into(),
            format,
            width,
            height,
            sample_count: sample_count.max(1),
            usage,
        }
    }
}

/// How an attachment starts a pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LoadAction {
    Load,
    Clear(ClearValue),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorAttachment {
    pub texture: TextureHandle,
    pub load: LoadAction,
    pub store: StoreOp,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthAttachment {
    pub texture: TextureHandle,
    pub load: LoadAction,
    pub store: StoreOp,
}

/// Attachments of one physical pass.
#[derive(Clone, Debug, PartialEq)]
pub struct PassDescriptor {
    pub label: String,
    pub colors: SmallVec<[ColorAttachment; 4]>,
    pub depth: Option<DepthAttachment>,
    pub sample_count: u32,
}

/// Everything the device needs to create a pipeline object.
#[derive(Clone, Debug)]
pub struct PipelineDescriptor {
    pub identity: Hash128,
    pub label: String,
    pub kind: PipelineKind,
    pub shader: GeneratedShader,
    pub vertex: MeshFormat,
    /// Bind group 0: object records, textures, sampler.
    pub object_group: Vec<LayoutEntry>,
    /// Bind group 1: per-view data.
    pub view_group: Vec<LayoutEntry>,
    pub state: ResolvedState,
    pub targets: RenderTargetLayout,
}

/// One draw call inside a pass.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    /// Instances `first_instance..first_instance + instance_count` of `mesh`;
    /// instance `i` reads object record `i`. `textures` follow the bound
    /// pipeline's texture slots, `None` binding the device's default texture.
    Mesh {
        mesh: MeshId,
        first_instance: u32,
        instance_count: u32,
        textures: SmallVec<[Option<TextureHandle>; 4]>,
    },
    /// One fullscreen triangle sampling `textures` in slot order.
    Fullscreen {
        textures: SmallVec<[Option<TextureHandle>; 4]>,
    },
}

/// Copy, resize or resolve `source` into `destination`, outside any pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversionCommand {
    pub kind: ConversionKind,
    pub source: TextureHandle,
    pub destination: TextureHandle,
}

/// A graphics device the evaluator records into.
///
/// Resource creation takes `&self` so pipelines can be built from several
/// threads at once; recording takes `&mut self`.
pub trait GpuDevice: Send + Sync {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError>;

    fn destroy_texture(&self, texture: TextureHandle);

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<PipelineHandle, DeviceError>;

    /// Highest submission index whose GPU work has finished.
    fn completed_submission(&self) -> u64;

    fn begin_pass(&mut self, pass: &PassDescriptor) -> Result<(), DeviceError>;

    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), DeviceError>;

    /// Uploads the per-view record shared by every pass of this evaluation.
    fn write_view_data(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Uploads object records for the draws that follow in the current pass.
    fn write_object_data(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    fn draw(&mut self, command: &DrawCommand) -> Result<(), DeviceError>;

    fn end_pass(&mut self) -> Result<(), DeviceError>;

    fn convert(&mut self, command: &ConversionCommand) -> Result<(), DeviceError>;

    /// Submits everything recorded since the last submit or discard and
    /// returns its submission index. Indices start at 1 and increase.
    fn submit(&mut self) -> u64;

    /// Drops everything recorded since the last submit.
    fn discard(&mut self);
}

/// A command captured by [`RecordingDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    BeginPass(PassDescriptor),
    SetPipeline(PipelineHandle),
    WriteViewData(Vec<u8>),
    WriteObjectData(Vec<u8>),
    Draw(DrawCommand),
    EndPass,
    Convert(ConversionCommand),
    Submit(u64),
}

#[derive(Default)]
struct Resources {
    textures: FxHashMap<TextureHandle, TextureDesc>,
    pipelines: FxHashMap<PipelineHandle, Hash128>,
    next_id: u64,
    textures_created: usize,
}

/// A device that validates and logs commands instead of executing them.
///
/// Submissions complete immediately unless [`hold_completion`] is called,
/// which lets tests observe texture reuse across in-flight frames.
///
/// [`hold_completion`]: RecordingDevice::hold_completion
#[derive(Default)]
pub struct RecordingDevice {
    resources: Mutex<Resources>,
    commands: Vec<DeviceCommand>,
    pending: Vec<DeviceCommand>,
    in_pass: bool,
    pipeline_set: bool,
    submitted: u64,
    completed: AtomicU64,
    hold: AtomicBool,
    fail_pipelines: AtomicBool,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `create_pipeline` call fail.
    pub fn fail_pipelines(&self, fail: bool) {
        self.fail_pipelines.store(fail, Ordering::SeqCst);
    }

    /// Stops submissions from completing until [`complete_all`](Self::complete_all).
    pub fn hold_completion(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Marks every submission so far as finished and resumes auto-completion.
    pub fn complete_all(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.completed.store(self.submitted, Ordering::SeqCst);
    }

    /// Commands of every submitted evaluation, in order.
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn pipelines_created(&self) -> usize {
        self.resources.lock().pipelines.len()
    }

    pub fn textures_created(&self) -> usize {
        self.resources.lock().textures_created
    }

    pub fn live_textures(&self) -> usize {
        self.resources.lock().textures.len()
    }

    /// Descriptor a live texture was created with.
    pub fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.resources.lock().textures.get(&texture).cloned()
    }

    fn check_texture(&self, texture: TextureHandle) -> Result<(), DeviceError> {
        if self.resources.lock().textures.contains_key(&texture) {
            Ok(())
        } else {
            Err(DeviceError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })
        }
    }

    fn record(&mut self, command: DeviceCommand) -> Result<(), DeviceError> {
        if !self.in_pass {
            return Err(DeviceError::NoActivePass);
        }
        self.pending.push(command);
        Ok(())
    }
}

impl GpuDevice for RecordingDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError> {
        let mut resources = self.resources.lock();
        resources.next_id += 1;
        resources.textures_created += 1;
        let handle = TextureHandle(resources.next_id);
        log::trace!(
            "RecordingDevice: creating texture {:?} ({}x{} {:?} x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.format,
            desc.sample_count
        );
        resources.textures.insert(handle, desc.clone());
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        log::trace!("RecordingDevice: destroying texture {}", texture.0);
        self.resources.lock().textures.remove(&texture);
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<PipelineHandle, DeviceError> {
        if self.fail_pipelines.load(Ordering::SeqCst) {
            return Err(DeviceError::PipelineCreation(format!(
                "refused pipeline '{}'",
                desc.label
            )));
        }
        let mut resources = self.resources.lock();
        resources.next_id += 1;
        let handle = PipelineHandle(resources.next_id);
        log::trace!("RecordingDevice: creating pipeline {:?} ({})", desc.label, desc.identity);
        resources.pipelines.insert(handle, desc.identity);
        Ok(handle)
    }

    fn completed_submission(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn begin_pass(&mut self, pass: &PassDescriptor) -> Result<(), DeviceError> {
        if self.in_pass {
            return Err(DeviceError::NoActivePass);
        }
        for texture in pass
            .colors
            .iter()
            .map(|c| c.texture)
            .chain(pass.depth.iter().map(|d| d.texture))
        {
            self.check_texture(texture)?;
        }
        self.in_pass = true;
        self.pipeline_set = false;
        self.pending.push(DeviceCommand::BeginPass(pass.clone()));
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), DeviceError> {
        if !self.resources.lock().pipelines.contains_key(&pipeline) {
            return Err(DeviceError::UnknownHandle {
                kind: "pipeline",
                id: pipeline.0,
            });
        }
        self.record(DeviceCommand::SetPipeline(pipeline))?;
        self.pipeline_set = true;
        Ok(())
    }

    fn write_view_data(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.pending.push(DeviceCommand::WriteViewData(data.to_vec()));
        Ok(())
    }

    fn write_object_data(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.record(DeviceCommand::WriteObjectData(data.to_vec()))
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<(), DeviceError> {
        if self.in_pass && !self.pipeline_set {
            return Err(DeviceError::NoPipeline);
        }
        if let DrawCommand::Fullscreen { textures } = command {
            for &texture in textures.iter().flatten() {
                self.check_texture(texture)?;
            }
        }
        self.record(DeviceCommand::Draw(command.clone()))
    }

    fn end_pass(&mut self) -> Result<(), DeviceError> {
        self.record(DeviceCommand::EndPass)?;
        self.in_pass = false;
        Ok(())
    }

    fn convert(&mut self, command: &ConversionCommand) -> Result<(), DeviceError> {
        if self.in_pass {
            return Err(DeviceError::NoActivePass);
        }
        self.check_texture(command.source)?;
        self.check_texture(command.destination)?;
        self.pending.push(DeviceCommand::Convert(*command));
        Ok(())
    }

    fn submit(&mut self) -> u64 {
        self.submitted += 1;
        let index = self.submitted;
        self.commands.append(&mut self.pending);
        self.commands.push(DeviceCommand::Submit(index));
        if !self.hold.load(Ordering::SeqCst) {
            self.completed.store(index, Ordering::SeqCst);
        }
        log::trace!("RecordingDevice: submission {index}");
        index
    }

    fn discard(&mut self) {
        log::trace!("RecordingDevice: discarding {} commands", self.pending.len());
        self.pending.clear();
        self.in_pass = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn target(device: &RecordingDevice) -> TextureHandle {
        device
            .create_texture(&TextureDesc::render_target(
                "color",
                wgpu::TextureFormat::Rgba8UnormSrgb,
                (4, 4),
                1,
            ))
            .unwrap()
    }

    fn pass(texture: TextureHandle) -> PassDescriptor {
        PassDescriptor {
            label: "test".to_string(),
            colors: smallvec![ColorAttachment {
                texture,
                load: LoadAction::Clear(ClearValue::default()),
                store: StoreOp::Store,
            }],
            depth: None,
            sample_count: 1,
        }
    }

    #[test]
    fn draws_need_an_open_pass() {
        let mut device = RecordingDevice::new();
        let err = device.draw(&DrawCommand::Fullscreen { textures: smallvec![] });
        assert_eq!(err, Err(DeviceError::NoActivePass));
    }

    #[test]
    fn draws_need_a_pipeline() {
        let mut device = RecordingDevice::new();
        let texture = target(&device);
        device.begin_pass(&pass(texture)).unwrap();
        let err = device.draw(&DrawCommand::Fullscreen { textures: smallvec![] });
        assert_eq!(err, Err(DeviceError::NoPipeline));
    }

    #[test]
    fn discard_drops_pending_commands() {
        let mut device = RecordingDevice::new();
        let texture = target(&device);
        device.begin_pass(&pass(texture)).unwrap();
        device.discard();
        assert!(device.commands().is_empty());

        device.begin_pass(&pass(texture)).unwrap();
        device.end_pass().unwrap();
        assert_eq!(device.submit(), 1);
        assert_eq!(device.commands().len(), 3);
    }

    #[test]
    fn held_submissions_do_not_complete() {
        let mut device = RecordingDevice::new();
        device.hold_completion();
        device.submit();
        assert_eq!(device.completed_submission(), 0);
        device.complete_all();
        assert_eq!(device.completed_submission(), 1);
    }

    #[test]
    fn unknown_textures_are_rejected() {
        let mut device = RecordingDevice::new();
        let err = device.begin_pass(&pass(TextureHandle(99))).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownHandle { kind: "texture", id: 99 }));
    }

    #[test]
    fn multisampled_targets_cannot_be_copied() {
        let desc = TextureDesc::render_target("msaa", wgpu::TextureFormat::Rgba8Unorm, (8, 8), 4);
        assert!(!desc.usage.contains(wgpu::TextureUsages::COPY_SRC));
        assert!(desc.usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }
}
