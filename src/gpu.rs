//! wgpu implementation of [`GpuDevice`].
//!
//! [`WgpuDevice`] owns a headless wgpu device and queue and maps the opaque
//! handles the evaluator works with onto real textures, pipelines and mesh
//! buffers. Rendering into a window surface is left to the caller: wrap the
//! surface texture with [`WgpuDevice::import_texture`] and bind it as a graph
//! output.
//!
//! # Example
//!
//! ```no_run
//! use phalanx::{MeshFormat, MeshId, WgpuDevice};
//!
//! let device = WgpuDevice::new_headless().expect("no GPU adapter");
//! let vertices = [0u8; 32 * 3];
//! let indices = bytemuck::cast_slice(&[0u32, 1, 2]).to_vec();
//! device.upload_mesh(MeshId(0), &MeshFormat::standard(), &vertices, &indices);
//! ```
//!
//! Object records are uploaded into a fresh storage buffer per
//! [`GpuDevice::write_object_data`] call, so records of earlier draws in the
//! same pass stay intact until submission.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use crate::device::{
    ConversionCommand, DrawCommand, GpuDevice, LoadAction, PassDescriptor, PipelineDescriptor,
    PipelineHandle, TextureDesc, TextureHandle,
};
use crate::error::DeviceError;
use crate::mesh::{MeshFormat, MeshId};
use crate::pipeline::{BindingKind, LayoutEntry, PipelineKind};
use crate::render_graph::ConversionKind;
use crate::step::ClearValue;
use crate::view::ViewUniforms;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    /// Imported textures are owned by the caller and never destroyed here.
    imported: bool,
}

struct GpuPipeline {
    pipeline: wgpu::RenderPipeline,
    object_layout: wgpu::BindGroupLayout,
    object_entries: Vec<LayoutEntry>,
    view_group: wgpu::BindGroup,
}

struct GpuMesh {
    vertices: wgpu::Buffer,
    vertex_count: u32,
    indices: Option<(wgpu::Buffer, wgpu::IndexFormat, u32)>,
}

/// Fullscreen copy pipelines, one per destination format.
struct Blitter {
    shader: wgpu::ShaderModule,
    layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Mutex<FxHashMap<wgpu::TextureFormat, wgpu::RenderPipeline>>,
}

impl Blitter {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        Self {
            shader,
            layout,
            pipeline_layout,
            pipelines: Mutex::new(FxHashMap::default()),
        }
    }

    fn pipeline(&self, device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        self.pipelines
            .lock()
            .entry(format)
            .or_insert_with(|| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Blit Pipeline"),
                    layout: Some(&self.pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &self.shader,
                        entry_point: Some("vs"),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &self.shader,
                        entry_point: Some("fs"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            })
            .clone()
    }
}

/// Commands recorded since the last submit.
#[derive(Default)]
struct Recording {
    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<wgpu::RenderPass<'static>>,
    pipeline: Option<Arc<GpuPipeline>>,
    objects: Option<wgpu::Buffer>,
}

/// A [`GpuDevice`] backed by wgpu.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: RwLock<FxHashMap<TextureHandle, GpuTexture>>,
    pipelines: RwLock<FxHashMap<PipelineHandle, Arc<GpuPipeline>>>,
    meshes: RwLock<FxHashMap<MeshId, GpuMesh>>,
    next_id: AtomicU64,
    view_buffer: wgpu::Buffer,
    default_texture: wgpu::TextureView,
    sampler: wgpu::Sampler,
    blitter: Blitter,
    recording: Recording,
    submitted: u64,
    completed: Arc<AtomicU64>,
}

impl WgpuDevice {
    /// Creates a device without a surface on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Initialization`] if no adapter or device is
    /// available.
    pub fn new_headless() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| DeviceError::Initialization(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Phalanx Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| DeviceError::Initialization(e.to_string()))?;

        log::info!("WgpuDevice: using adapter {:?}", adapter.get_info().name);
        Ok(Self::from_parts(device, queue))
    }

    /// Wraps an existing device and queue, e.g. one shared with a window.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("View Uniforms"),
            size: std::mem::size_of::<ViewUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let default_texture = device
            .create_texture_with_data(
                &queue,
                &wgpu::TextureDescriptor {
                    label: Some("Default White Texture"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &[255, 255, 255, 255],
            )
            .create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let blitter = Blitter::new(&device);

        Self {
            device,
            queue,
            textures: RwLock::new(FxHashMap::default()),
            pipelines: RwLock::new(FxHashMap::default()),
            meshes: RwLock::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            view_buffer,
            default_texture,
            sampler,
            blitter,
            recording: Recording::default(),
            submitted: 0,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Registers a caller-owned texture, such as a surface texture, so it can
    /// be bound as a graph output.
    pub fn import_texture(&self, texture: wgpu::Texture) -> TextureHandle {
        let handle = TextureHandle(self.next_id());
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let entry = GpuTexture {
            format: texture.format(),
            width: texture.width(),
            height: texture.height(),
            texture,
            view,
            imported: true,
        };
        self.textures.write().insert(handle, entry);
        handle
    }

    /// Forgets an imported texture without destroying it.
    pub fn release_imported(&self, handle: TextureHandle) {
        let mut textures = self.textures.write();
        if textures.get(&handle).is_some_and(|t| t.imported) {
            textures.remove(&handle);
        }
    }

    /// The wgpu texture behind `handle`, for reading results back.
    pub fn texture(&self, handle: TextureHandle) -> Option<wgpu::Texture> {
        self.textures.read().get(&handle).map(|t| t.texture.clone())
    }

    /// Uploads interleaved vertex data laid out by `format`. `indices` are
    /// read in `format.index_format` and ignored for non-indexed formats.
    pub fn upload_mesh(&self, id: MeshId, format: &MeshFormat, vertices: &[u8], indices: &[u8]) {
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertices"),
            contents: vertices,
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = format.index_format.filter(|_| !indices.is_empty()).map(|index_format| {
            let size = match index_format {
                wgpu::IndexFormat::Uint16 => 2,
                wgpu::IndexFormat::Uint32 => 4,
            };
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Indices"),
                contents: indices,
                usage: wgpu::BufferUsages::INDEX,
            });
            (buffer, index_format, (indices.len() / size) as u32)
        });
        let vertex_count = if format.stride == 0 {
            0
        } else {
            (vertices.len() as u64 / format.stride) as u32
        };
        log::debug!("WgpuDevice: uploaded mesh {} ({} vertices)", id.0, vertex_count);
        self.meshes.write().insert(
            id,
            GpuMesh {
                vertices: vertex_buffer,
                vertex_count,
                indices: index_buffer,
            },
        );
    }

    pub fn remove_mesh(&self, id: MeshId) {
        self.meshes.write().remove(&id);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.recording.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Phalanx Encoder"),
            })
        })
    }

    fn view_of(&self, handle: TextureHandle) -> Result<wgpu::TextureView, DeviceError> {
        self.textures
            .read()
            .get(&handle)
            .map(|t| t.view.clone())
            .ok_or(DeviceError::UnknownHandle {
                kind: "texture",
                id: handle.0,
            })
    }

    fn bind_group_layout(&self, label: &str, entries: &[LayoutEntry]) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: match &entry.kind {
                    BindingKind::ObjectBuffer { stride } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(*stride),
                    },
                    BindingKind::ViewBuffer { size } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: NonZeroU64::new(*size),
                    },
                    BindingKind::Texture { .. } => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingKind::Sampler => {
                        wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
                    }
                },
                count: None,
            })
            .collect();
        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        })
    }

    /// Group 0 for the next draw: object records, then textures in slot
    /// order, then the sampler.
    fn object_bind_group(
        &self,
        pipeline: &GpuPipeline,
        textures: &[Option<TextureHandle>],
    ) -> Result<wgpu::BindGroup, DeviceError> {
        let mut views = Vec::with_capacity(textures.len());
        {
            let live = self.textures.read();
            for texture in textures {
                views.push(match texture {
                    Some(handle) => live
                        .get(handle)
                        .map(|t| t.view.clone())
                        .ok_or(DeviceError::UnknownHandle {
                            kind: "texture",
                            id: handle.0,
                        })?,
                    None => self.default_texture.clone(),
                });
            }
        }

        let fallback = match &self.recording.objects {
            Some(_) => None,
            None => pipeline.object_entries.iter().find_map(|entry| match entry.kind {
                BindingKind::ObjectBuffer { stride } => Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Empty Object Records"),
                    size: stride,
                    usage: wgpu::BufferUsages::STORAGE,
                    mapped_at_creation: false,
                })),
                _ => None,
            }),
        };
        let objects = self.recording.objects.as_ref().or(fallback.as_ref());

        let mut next_texture = 0;
        let mut entries = Vec::with_capacity(pipeline.object_entries.len());
        for entry in &pipeline.object_entries {
            let resource = match &entry.kind {
                BindingKind::ObjectBuffer { .. } => {
                    let Some(buffer) = objects else { continue };
                    buffer.as_entire_binding()
                }
                BindingKind::Texture { .. } => {
                    let view = views.get(next_texture).unwrap_or(&self.default_texture);
                    next_texture += 1;
                    wgpu::BindingResource::TextureView(view)
                }
                BindingKind::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                BindingKind::ViewBuffer { .. } => self.view_buffer.as_entire_binding(),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: entry.binding,
                resource,
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Object Bind Group"),
            layout: &pipeline.object_layout,
            entries: &entries,
        }))
    }

    /// Draws `source` into `destination` with the blit pipeline.
    fn blit(&mut self, source: &wgpu::TextureView, destination: &wgpu::TextureView, format: wgpu::TextureFormat) {
        let pipeline = self.blitter.pipeline(&self.device, format);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blit Bind Group"),
            layout: &self.blitter.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let mut pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: destination,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

fn color_load(load: LoadAction) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadAction::Load => wgpu::LoadOp::Load,
        LoadAction::Clear(ClearValue { color: [r, g, b, a], .. }) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
    }
}

impl GpuDevice for WgpuDevice {
    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureHandle, DeviceError> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: desc.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = TextureHandle(self.next_id());
        self.textures.write().insert(
            handle,
            GpuTexture {
                texture,
                view,
                format: desc.format,
                width: desc.width.max(1),
                height: desc.height.max(1),
                imported: false,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut textures = self.textures.write();
        if let Some(entry) = textures.get(&texture).filter(|t| !t.imported) {
            entry.texture.destroy();
            textures.remove(&texture);
        }
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<PipelineHandle, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.shader.source.as_str().into()),
        });
        let object_layout = self.bind_group_layout("Object Bind Group Layout", &desc.object_group);
        let view_layout = self.bind_group_layout("View Bind Group Layout", &desc.view_group);
        let layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&desc.label),
            bind_group_layouts: &[&object_layout, &view_layout],
            push_constant_ranges: &[],
        });

        let attributes = desc.vertex.wgpu_attributes();
        let buffers = match desc.kind {
            PipelineKind::Drawables if !attributes.is_empty() => vec![wgpu::VertexBufferLayout {
                array_stride: desc.vertex.stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }],
            _ => Vec::new(),
        };
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .targets
            .color_formats()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: desc.state.blend.to_wgpu(),
                    write_mask: desc.state.color_write,
                })
            })
            .collect();
        let topology = match desc.kind {
            PipelineKind::Drawables => desc.vertex.topology,
            PipelineKind::Fullscreen => wgpu::PrimitiveTopology::TriangleList,
        };

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&desc.label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some(desc.shader.vertex_entry.as_str()),
                buffers: &buffers,
                compilation_options: Default::default(),
            },
            fragment: desc.shader.fragment_entry.as_deref().map(|entry| wgpu::FragmentState {
                module: &module,
                entry_point: Some(entry),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology,
                strip_index_format: desc.vertex.index_format.filter(|_| topology.is_strip()),
                cull_mode: desc.state.cull.to_wgpu(),
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: desc.targets.depth_format().map(|f| desc.state.depth_stencil(f)),
            multisample: wgpu::MultisampleState {
                count: desc.targets.sample_count.max(1),
                ..Default::default()
            },
            multiview: None,
            cache: None,
        });

        let view_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("View Bind Group"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.view_buffer.as_entire_binding(),
            }],
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::PipelineCreation(error.to_string()));
        }

        let handle = PipelineHandle(self.next_id());
        log::debug!("WgpuDevice: created pipeline '{}' ({})", desc.label, desc.identity);
        self.pipelines.write().insert(
            handle,
            Arc::new(GpuPipeline {
                pipeline,
                object_layout,
                object_entries: desc.object_group.clone(),
                view_group,
            }),
        );
        Ok(handle)
    }

    fn completed_submission(&self) -> u64 {
        let _ = self.device.poll(wgpu::PollType::Poll);
        self.completed.load(Ordering::Acquire)
    }

    fn begin_pass(&mut self, pass: &PassDescriptor) -> Result<(), DeviceError> {
        if self.recording.pass.is_some() {
            return Err(DeviceError::NoActivePass);
        }
        let colors = pass
            .colors
            .iter()
            .map(|c| Ok((self.view_of(c.texture)?, c)))
            .collect::<Result<Vec<_>, DeviceError>>()?;
        let depth = pass
            .depth
            .as_ref()
            .map(|d| {
                let has_stencil = self
                    .textures
                    .read()
                    .get(&d.texture)
                    .is_some_and(|t| t.format.has_stencil_aspect());
                Ok((self.view_of(d.texture)?, d, has_stencil))
            })
            .transpose()?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = colors
            .iter()
            .map(|(view, c)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(c.load),
                        store: c.store.to_wgpu(),
                    },
                    depth_slice: None,
                })
            })
            .collect();
        let depth_stencil_attachment = depth.as_ref().map(|(view, d, has_stencil)| {
            let (depth_load, stencil_load) = match d.load {
                LoadAction::Load => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
                LoadAction::Clear(value) => (
                    wgpu::LoadOp::Clear(value.depth),
                    wgpu::LoadOp::Clear(value.stencil),
                ),
            };
            wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: d.store.to_wgpu(),
                }),
                stencil_ops: has_stencil.then_some(wgpu::Operations {
                    load: stencil_load,
                    store: d.store.to_wgpu(),
                }),
            }
        });

        let render_pass = self
            .encoder()
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&pass.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        self.recording.pass = Some(render_pass);
        self.recording.pipeline = None;
        self.recording.objects = None;
        Ok(())
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) -> Result<(), DeviceError> {
        let entry = self
            .pipelines
            .read()
            .get(&pipeline)
            .cloned()
            .ok_or(DeviceError::UnknownHandle {
                kind: "pipeline",
                id: pipeline.0,
            })?;
        let pass = self.recording.pass.as_mut().ok_or(DeviceError::NoActivePass)?;
        pass.set_pipeline(&entry.pipeline);
        pass.set_bind_group(1, &entry.view_group, &[]);
        self.recording.pipeline = Some(entry);
        self.recording.objects = None;
        Ok(())
    }

    fn write_view_data(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        self.queue.write_buffer(&self.view_buffer, 0, data);
        Ok(())
    }

    fn write_object_data(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        if self.recording.pass.is_none() {
            return Err(DeviceError::NoActivePass);
        }
        self.recording.objects = Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Object Records"),
            contents: data,
            usage: wgpu::BufferUsages::STORAGE,
        }));
        Ok(())
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<(), DeviceError> {
        if self.recording.pass.is_none() {
            return Err(DeviceError::NoActivePass);
        }
        let pipeline = self.recording.pipeline.clone().ok_or(DeviceError::NoPipeline)?;
        match command {
            DrawCommand::Mesh {
                mesh,
                first_instance,
                instance_count,
                textures,
            } => {
                let bind_group = self.object_bind_group(&pipeline, textures)?;
                let (vertices, vertex_count, indices) = {
                    let meshes = self.meshes.read();
                    let gpu_mesh = meshes.get(mesh).ok_or(DeviceError::UnknownHandle {
                        kind: "mesh",
                        id: mesh.0,
                    })?;
                    (gpu_mesh.vertices.clone(), gpu_mesh.vertex_count, gpu_mesh.indices.clone())
                };
                let instances = *first_instance..first_instance + instance_count;
                let pass = self.recording.pass.as_mut().ok_or(DeviceError::NoActivePass)?;
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_vertex_buffer(0, vertices.slice(..));
                match indices {
                    Some((buffer, format, count)) => {
                        pass.set_index_buffer(buffer.slice(..), format);
                        pass.draw_indexed(0..count, 0, instances);
                    }
                    None => pass.draw(0..vertex_count, instances),
                }
            }
            DrawCommand::Fullscreen { textures } => {
                let bind_group = self.object_bind_group(&pipeline, textures)?;
                let pass = self.recording.pass.as_mut().ok_or(DeviceError::NoActivePass)?;
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        Ok(())
    }

    fn end_pass(&mut self) -> Result<(), DeviceError> {
        // Dropping the pass ends it and unlocks the encoder.
        self.recording.pass.take().ok_or(DeviceError::NoActivePass)?;
        self.recording.pipeline = None;
        self.recording.objects = None;
        Ok(())
    }

    fn convert(&mut self, command: &ConversionCommand) -> Result<(), DeviceError> {
        if self.recording.pass.is_some() {
            return Err(DeviceError::NoActivePass);
        }
        let lookup = |handle: TextureHandle| {
            self.textures
                .read()
                .get(&handle)
                .map(|t| (t.texture.clone(), t.view.clone(), t.format, t.width, t.height))
                .ok_or(DeviceError::UnknownHandle {
                    kind: "texture",
                    id: handle.0,
                })
        };
        let (src, src_view, src_format, width, height) = lookup(command.source)?;
        let (dst, dst_view, dst_format, dst_width, dst_height) = lookup(command.destination)?;

        match command.kind {
            ConversionKind::Resolve => {
                let _pass = self.encoder().begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Resolve Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &src_view,
                        resolve_target: Some(&dst_view),
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            ConversionKind::Copy if src_format == dst_format && (width, height) == (dst_width, dst_height) => {
                self.encoder().copy_texture_to_texture(
                    src.as_image_copy(),
                    dst.as_image_copy(),
                    wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                );
            }
            ConversionKind::Copy | ConversionKind::Resize => self.blit(&src_view, &dst_view, dst_format),
        }
        Ok(())
    }

    fn submit(&mut self) -> u64 {
        self.recording.pass = None;
        self.recording.pipeline = None;
        self.recording.objects = None;
        let encoder = self.recording.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Phalanx Encoder"),
            })
        });
        self.queue.submit(Some(encoder.finish()));

        self.submitted += 1;
        let index = self.submitted;
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(index, Ordering::AcqRel);
        });
        log::trace!("WgpuDevice: submission {index}");
        index
    }

    fn discard(&mut self) {
        self.recording.pass = None;
        self.recording.pipeline = None;
        self.recording.objects = None;
        self.recording.encoder = None;
    }
}
