//! `wgpu` implementation of [`GraphicsBackend`].
//!
//! wgpu has no global bind state, so the backend keeps it: the bound
//! framebuffer, program, vertex array, texture units, blend state and
//! viewport. Uniform values live in a CPU copy of every uniform block of a
//! program. A block is written into the [`UniformRing`] only after it changed,
//! and draws bind it by dynamic offset.
//!
//! Every draw, clear and blit becomes its own render pass on a shared command
//! encoder which is submitted on [`GraphicsBackend::flush`] or before any
//! texture or vertex write, so those writes never overtake recorded work.
//! Uniform writes never reuse a range within one submission instead.
//!
//! The default framebuffer is an offscreen texture owned by the backend; hosts
//! present or read it back ([`WgpuBackend::read_default_framebuffer`]).

use std::{collections::HashMap, iter, time::Duration};

use anyhow::anyhow;
use wgpu::util::DeviceExt;

use crate::{
    commands::MAX_TEXTURE_UNITS,
    data_structures::geometry::{PixelRect, Size, Viewport},
    error::{GlassError, Result},
    resources::mesh::{BufferLayout, ShaderDataType},
};

use super::{
    reflect::{self, ProgramReflection, UniformType, TEXTURE_GROUP},
    BlendEquation, BlendFactor, BlendState, BufferUsage, Filter, GraphicsBackend, NativeId,
    PixelFormat, TextureDescriptor, UniformValue,
};

const BLIT_SHADER: &str = r#"
struct BlitParams {
    uv_rect: vec4<f32>,
};
@group(0) @binding(0) var<uniform> params: BlitParams;
@group(0) @binding(1) var t_source: texture_2d<f32>;
@group(0) @binding(2) var s_source: sampler;

struct BlitOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> BlitOutput {
    let corner = vec2<f32>(f32(index & 1u), f32((index >> 1u) & 1u));
    var out: BlitOutput;
    out.position = vec4<f32>(corner.x * 2.0 - 1.0, 1.0 - corner.y * 2.0, 0.0, 1.0);
    out.uv = mix(params.uv_rect.xy, params.uv_rect.zw, corner);
    return out;
}

@fragment
fn fs_main(in: BlitOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(t_source, s_source, in.uv, 0.0);
}
"#;

#[derive(Debug, Clone)]
pub struct WgpuConfig {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    /// Size of the offscreen default framebuffer.
    pub default_size: Size,
    pub default_format: PixelFormat,
}

impl Default for WgpuConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::default(),
            force_fallback_adapter: false,
            default_size: Size::new(1280, 720),
            default_format: PixelFormat::Rgba8,
        }
    }
}

pub fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn vertex_format(data_type: ShaderDataType) -> wgpu::VertexFormat {
    match data_type {
        ShaderDataType::Float => wgpu::VertexFormat::Float32,
        ShaderDataType::Float2 => wgpu::VertexFormat::Float32x2,
        ShaderDataType::Float3 => wgpu::VertexFormat::Float32x3,
        ShaderDataType::Float4 => wgpu::VertexFormat::Float32x4,
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_state(blend: BlendState) -> Option<wgpu::BlendState> {
    if !blend.enabled {
        return None;
    }
    let component = match blend.equation {
        // min/max ignore the factors and wgpu requires them to be One
        BlendEquation::Min | BlendEquation::Max => wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: if blend.equation == BlendEquation::Min {
                wgpu::BlendOperation::Min
            } else {
                wgpu::BlendOperation::Max
            },
        },
        equation => wgpu::BlendComponent {
            src_factor: blend_factor(blend.src),
            dst_factor: blend_factor(blend.dst),
            operation: match equation {
                BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
                BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
                _ => wgpu::BlendOperation::Add,
            },
        },
    };
    Some(wgpu::BlendState {
        color: component,
        alpha: component,
    })
}

#[derive(Debug)]
struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
    format: wgpu::TextureFormat,
}

impl GpuTexture {
    fn new(device: &wgpu::Device, desc: &TextureDescriptor) -> Self {
        let format = texture_format(desc.format);
        let usage = if desc.format.is_depth() {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        } else {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: extent(desc.size),
            mip_level_count: desc.mip_level_count(),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            desc: desc.clone(),
            format,
        }
    }

    fn level_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("mip level view"),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }
}

fn extent(size: Size) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: 1,
    }
}

#[derive(Debug)]
struct GpuFramebuffer {
    color: NativeId,
    color_view: wgpu::TextureView,
    depth_view: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    size: Size,
    format: wgpu::TextureFormat,
}

#[derive(Debug)]
struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    reflection: ProgramReflection,
    bind_group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    blocks: HashMap<(u32, u32), Vec<u8>>,
    /// Ring epoch and offset of the last upload of each block. Removed when
    /// the block changes.
    uploaded: HashMap<(u32, u32), (u64, u64)>,
}

#[derive(Debug)]
struct GpuVertexArray {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    layout: BufferLayout,
    usage: BufferUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: NativeId,
    blend: BlendState,
    color: wgpu::TextureFormat,
    depth: Option<wgpu::TextureFormat>,
    layout: BufferLayout,
}

#[derive(Debug, Default)]
struct BoundState {
    framebuffer: Option<NativeId>,
    program: Option<NativeId>,
    vertex_array: Option<NativeId>,
    textures: [Option<NativeId>; MAX_TEXTURE_UNITS],
    blend: BlendState,
    viewport: Option<Viewport>,
}

/// A program bind group for one set of bound textures. Uniform buffers are
/// bound by dynamic offset, so the group stays valid across block uploads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindGroupKey {
    program: NativeId,
    group: u32,
    textures: Vec<NativeId>,
}

const UNIFORM_RING_BYTES: u64 = 1 << 18;

/// Uniform storage for one submission.
///
/// Queue writes land at the start of the next submit, so two writes to the
/// same range before a submit would both be seen as the last one. Every
/// upload therefore takes a fresh slot, and the ring only restarts after the
/// encoder was submitted.
#[derive(Debug)]
struct UniformRing {
    buffer: wgpu::Buffer,
    alignment: u64,
    used: u64,
    epoch: u64,
}

impl UniformRing {
    fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform ring"),
            size: UNIFORM_RING_BYTES,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            alignment: u64::from(device.limits().min_uniform_buffer_offset_alignment),
            used: 0,
            epoch: 0,
        }
    }

    fn span(&self, bytes: usize) -> u64 {
        (bytes as u64).next_multiple_of(self.alignment)
    }

    fn has_room(&self, span: u64) -> bool {
        self.used + span <= UNIFORM_RING_BYTES
    }

    /// Writes `data` into the next free slot and returns its offset. Callers
    /// check [`Self::has_room`] first.
    fn push(&mut self, queue: &wgpu::Queue, data: &[u8]) -> u64 {
        let offset = self.used;
        queue.write_buffer(&self.buffer, offset, data);
        self.used += self.span(data.len());
        offset
    }

    fn restart(&mut self) {
        self.used = 0;
        self.epoch += 1;
    }

    fn binding(&self, size: usize) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(size as u64),
        })
    }
}

/// Everything a pass needs to know about its render target.
struct Target {
    color: Option<NativeId>,
    color_view: wgpu::TextureView,
    depth_view: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    size: Size,
    format: wgpu::TextureFormat,
}

struct Samplers {
    linear: wgpu::Sampler,
    nearest: wgpu::Sampler,
    trilinear: wgpu::Sampler,
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let sampler = |label, filter, mipmap_filter| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                address_mode_w: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter,
                ..Default::default()
            })
        };
        Self {
            linear: sampler("linear sampler", wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Nearest),
            nearest: sampler("nearest sampler", wgpu::FilterMode::Nearest, wgpu::MipmapFilterMode::Nearest),
            trilinear: sampler("trilinear sampler", wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Linear),
        }
    }
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    max_texture_size: u32,
    next_id: u32,
    default_target: GpuTexture,
    textures: HashMap<NativeId, GpuTexture>,
    framebuffers: HashMap<NativeId, GpuFramebuffer>,
    programs: HashMap<NativeId, GpuProgram>,
    vertex_arrays: HashMap<NativeId, GpuVertexArray>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: Samplers,
    blit_module: wgpu::ShaderModule,
    blit_layout: wgpu::BindGroupLayout,
    blit_pipeline_layout: wgpu::PipelineLayout,
    blit_pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    uniforms: UniformRing,
    bind_group_cache: HashMap<BindGroupKey, wgpu::BindGroup>,
    state: BoundState,
    encoder: Option<wgpu::CommandEncoder>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("textures", &self.textures.len())
            .field("framebuffers", &self.framebuffers.len())
            .field("programs", &self.programs.len())
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

impl WgpuBackend {
    /// Requests an adapter and device without a surface.
    pub async fn new(config: WgpuConfig) -> Result<Self> {
        log::info!("WGPU setup");
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            })
            .await
            .map_err(|e| GlassError::BackendInit(format!("no adapter: {e}")))?;
        log::info!("adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("flow-glass device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(|e| GlassError::BackendInit(format!("no device: {e}")))?;

        Ok(Self::from_device(device, queue, config))
    }

    /// Blocking variant of [`Self::new`] for the GPU thread factory.
    pub fn new_blocking(config: WgpuConfig) -> Result<Self> {
        futures::executor::block_on(Self::new(config))
    }

    /// Wraps an existing device, e.g. one shared with the host's renderer.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, config: WgpuConfig) -> Self {
        let max_texture_size = device.limits().max_texture_dimension_2d;
        let default_target = GpuTexture::new(
            &device,
            &TextureDescriptor {
                label: "default framebuffer".to_owned(),
                size: config.default_size,
                format: config.default_format,
                mipmaps: false,
            },
        );

        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit shader"),
            source: wgpu::ShaderSource::Wgsl(BLIT_SHADER.into()),
        });
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("blit bind group layout"),
        });
        let blit_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[Some(&blit_layout)],
            immediate_size: 0,
        });

        let samplers = Samplers::new(&device);
        let uniforms = UniformRing::new(&device);
        Self {
            device,
            queue,
            max_texture_size,
            next_id: 1,
            default_target,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            pipelines: HashMap::new(),
            samplers,
            blit_module,
            blit_layout,
            blit_pipeline_layout,
            blit_pipelines: HashMap::new(),
            uniforms,
            bind_group_cache: HashMap::new(),
            state: BoundState::default(),
            encoder: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The wgpu texture behind a native id, for providers that copy captured
    /// frames on the GPU.
    pub fn texture(&self, texture: NativeId) -> Option<&wgpu::Texture> {
        self.textures.get(&texture).map(|t| &t.texture)
    }

    pub fn default_texture(&self) -> &wgpu::Texture {
        &self.default_target.texture
    }

    /// Submits pending work and copies the default framebuffer into an image.
    pub fn read_default_framebuffer(&mut self) -> anyhow::Result<image::RgbaImage> {
        self.flush();
        read_back(&self.device, &self.queue, &self.default_target)
    }

    /// Submits pending work and copies level 0 of `texture` into an image.
    pub fn read_texture(&mut self, texture: NativeId) -> anyhow::Result<image::RgbaImage> {
        self.flush();
        let texture = self
            .textures
            .get(&texture)
            .ok_or_else(|| anyhow!("unknown native texture {:?}", texture))?;
        read_back(&self.device, &self.queue, texture)
    }

    fn next(&mut self) -> NativeId {
        let id = NativeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("flow-glass encoder"),
                })
        })
    }

    fn target(&self, framebuffer: Option<NativeId>) -> Option<Target> {
        match framebuffer {
            None => Some(Target {
                color: None,
                color_view: self.default_target.view.clone(),
                depth_view: None,
                size: self.default_target.desc.size,
                format: self.default_target.format,
            }),
            Some(id) => self.framebuffers.get(&id).map(|fb| Target {
                color: Some(fb.color),
                color_view: fb.color_view.clone(),
                depth_view: fb.depth_view.clone(),
                size: fb.size,
                format: fb.format,
            }),
        }
    }

    fn blit_pipeline(&mut self, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.blit_pipelines.get(&format) {
            return pipeline.clone();
        }
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit pipeline"),
            layout: Some(&self.blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.blit_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.blit_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview_mask: None,
            cache: None,
        });
        self.blit_pipelines.insert(format, pipeline.clone());
        pipeline
    }

    /// Draws `source` (sampled in `uv_rect`) into `viewport` of `target`.
    #[allow(clippy::too_many_arguments)]
    fn blit_views(
        &mut self,
        source: &wgpu::TextureView,
        sampler: Filter,
        uv_rect: [f32; 4],
        target: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        viewport: PixelRect,
    ) {
        let pipeline = self.blit_pipeline(format);
        let params: &[u8] = bytemuck::cast_slice(&uv_rect);
        if !self.uniforms.has_room(self.uniforms.span(params.len())) {
            self.flush();
        }
        let offset = self.uniforms.push(&self.queue, params);
        let sampler = match sampler {
            Filter::Nearest => &self.samplers.nearest,
            Filter::Linear => &self.samplers.linear,
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniforms.binding(params.len()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
            label: Some("blit bind group"),
        });

        let encoder = self.encoder();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[offset as u32]);
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.draw(0..4, 0..1);
    }

    fn render_pipeline(&mut self, key: PipelineKey) -> Option<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Some(pipeline.clone());
        }
        let program = self.programs.get(&key.program)?;
        let attributes: Vec<wgpu::VertexAttribute> = key
            .layout
            .elements()
            .iter()
            .enumerate()
            .map(|(location, element)| wgpu::VertexAttribute {
                offset: u64::from(element.offset()),
                shader_location: location as u32,
                format: vertex_format(element.data_type()),
            })
            .collect();
        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: u64::from(key.layout.stride()),
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        };

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.label),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color,
                    blend: blend_state(key.blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: Some(false),
                depth_compare: Some(wgpu::CompareFunction::Always),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview_mask: None,
            cache: None,
        });
        log::debug!("created pipeline for {} ({:?})", program.label, key.color);
        self.pipelines.insert(key, pipeline.clone());
        Some(pipeline)
    }

    /// Uploads the blocks of `program` that changed since their last upload,
    /// or whose slot belongs to an earlier submission.
    fn upload_blocks(&mut self, program: NativeId) {
        let Some(program) = self.programs.get_mut(&program) else {
            return;
        };
        let span: u64 = program.blocks.values().map(|data| self.uniforms.span(data.len())).sum();
        let epoch = self.uniforms.epoch;
        let stale = program
            .blocks
            .keys()
            .any(|key| !program.uploaded.get(key).is_some_and(|(at, _)| *at == epoch));
        if !stale {
            return;
        }
        if !self.uniforms.has_room(span) {
            // submit first so the ring can restart; every block is stale then
            if let Some(encoder) = self.encoder.take() {
                self.queue.submit(iter::once(encoder.finish()));
            }
            self.uniforms.restart();
        }
        let epoch = self.uniforms.epoch;
        for (key, data) in &program.blocks {
            if program.uploaded.get(key).is_some_and(|(at, _)| *at == epoch) {
                continue;
            }
            let offset = self.uniforms.push(&self.queue, data);
            program.uploaded.insert(*key, (epoch, offset));
        }
    }

    /// Bind groups of the program in use with their dynamic offsets. Fails
    /// when a texture unit is empty or samples the render target.
    fn bind_groups(&mut self, program_id: NativeId, target: &Target) -> Option<Vec<(wgpu::BindGroup, Vec<u32>)>> {
        let program = self.programs.get(&program_id)?;
        let mut groups = Vec::with_capacity(program.bind_group_layouts.len());
        for (group, layout) in program.bind_group_layouts.iter().enumerate() {
            let group = group as u32;
            let mut blocks: Vec<_> = program
                .reflection
                .blocks
                .iter()
                .filter(|block| block.group == group)
                .filter_map(|block| {
                    let key = (block.group, block.binding);
                    let size = program.blocks.get(&key)?.len();
                    let offset = program.uploaded.get(&key).map_or(0, |(_, offset)| *offset);
                    Some((block.binding, size, offset as u32))
                })
                .collect();
            blocks.sort_by_key(|(binding, _, _)| *binding);

            let mut textures = Vec::new();
            if group == TEXTURE_GROUP {
                for slot in &program.reflection.textures {
                    let bound = self.state.textures.get(slot.unit as usize).copied().flatten();
                    let Some(texture) = bound.filter(|id| self.textures.contains_key(id)) else {
                        log::error!("{}: nothing bound to texture unit {}", program.label, slot.unit);
                        return None;
                    };
                    if target.color == Some(texture) {
                        log::error!("{}: texture unit {} samples the render target", program.label, slot.unit);
                        return None;
                    }
                    textures.push(texture);
                }
            }
            let offsets = blocks.iter().map(|(_, _, offset)| *offset).collect();

            let key = BindGroupKey {
                program: program_id,
                group,
                textures,
            };
            if let Some(bind_group) = self.bind_group_cache.get(&key) {
                groups.push((bind_group.clone(), offsets));
                continue;
            }

            let mut entries: Vec<wgpu::BindGroupEntry> = blocks
                .iter()
                .map(|(binding, size, _)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: self.uniforms.binding(*size),
                })
                .collect();
            for (slot, id) in program.reflection.textures.iter().zip(&key.textures) {
                let texture = self.textures.get(id)?;
                let sampler = if texture.desc.mipmaps {
                    &self.samplers.trilinear
                } else {
                    &self.samplers.linear
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.texture_binding,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                });
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.sampler_binding,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout,
                entries: &entries,
                label: Some("program bind group"),
            });
            self.bind_group_cache.insert(key, bind_group.clone());
            groups.push((bind_group, offsets));
        }
        Some(groups)
    }
}

fn bind_group_layouts(device: &wgpu::Device, label: &str, reflection: &ProgramReflection) -> Vec<wgpu::BindGroupLayout> {
    let max_group = reflection
        .blocks
        .iter()
        .map(|block| block.group)
        .chain((!reflection.textures.is_empty()).then_some(TEXTURE_GROUP))
        .max();
    let Some(max_group) = max_group else {
        return Vec::new();
    };

    (0..=max_group)
        .map(|group| {
            let mut entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
                .blocks
                .iter()
                .filter(|block| block.group == group)
                .map(|block| wgpu::BindGroupLayoutEntry {
                    binding: block.binding,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            if group == TEXTURE_GROUP {
                for slot in &reflection.textures {
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: slot.texture_binding,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        },
                        count: None,
                    });
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: slot.sampler_binding,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    });
                }
            }
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &entries,
                label: Some(&format!("{label} group {group}")),
            })
        })
        .collect()
}

/// Writes `value` into the CPU copy of its uniform block.
fn write_uniform(block: &mut [u8], offset: u32, ty: UniformType, value: &UniformValue<'_>) {
    let offset = offset as usize;
    let mut put = |at: usize, bytes: &[u8]| {
        if let Some(dst) = block.get_mut(at..at + bytes.len()) {
            dst.copy_from_slice(bytes);
        }
    };
    match (ty, value) {
        (UniformType::Float, UniformValue::Float(v)) => put(offset, bytemuck::bytes_of(v)),
        (UniformType::Vec2, UniformValue::Vec2(v)) => put(offset, bytemuck::cast_slice(v)),
        (UniformType::Vec4, UniformValue::Vec4(v)) => put(offset, bytemuck::cast_slice(v)),
        (UniformType::Int, UniformValue::Int(v)) => put(offset, bytemuck::bytes_of(v)),
        (UniformType::Mat4, UniformValue::Mat4(v)) => put(offset, bytemuck::cast_slice(v)),
        (UniformType::IntArray { len, stride }, UniformValue::IntArray(values)) => {
            // packed: an element of `stride` bytes holds `stride / 4` ints
            let capacity = (len * stride / 4) as usize;
            let values = &values[..values.len().min(capacity)];
            put(offset, bytemuck::cast_slice(values));
        }
        (ty, value) => log::error!("uniform of type {:?} cannot take {:?}", ty, value),
    }
}

fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &GpuTexture,
) -> anyhow::Result<image::RgbaImage> {
    let size = source.desc.size;
    let swizzle = match source.desc.format {
        PixelFormat::Rgba8 => false,
        PixelFormat::Bgra8 => true,
        other => anyhow::bail!("cannot read back {:?} textures", other),
    };
    let row_bytes = size.width * 4;
    let padded_bytes_per_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let output_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        size: u64::from(padded_bytes_per_row) * u64::from(size.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        label: Some("readback buffer"),
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            aspect: wgpu::TextureAspect::All,
            texture: &source.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &output_buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(size.height),
            },
        },
        extent(size),
    );
    queue.submit(iter::once(encoder.finish()));

    // the mapping has to be requested before polling, otherwise this blocks forever
    let buffer_slice = output_buffer.slice(..);
    let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(Duration::from_secs(3)),
        })
        .map_err(|e| anyhow!("device poll failed: {e:?}"))?;
    futures::executor::block_on(rx.receive())
        .ok_or_else(|| anyhow!("readback mapping was dropped"))??;

    let mut pixels = Vec::with_capacity((row_bytes * size.height) as usize);
    {
        let data = buffer_slice.get_mapped_range();
        for row in data.chunks(padded_bytes_per_row as usize) {
            pixels.extend_from_slice(&row[..row_bytes as usize]);
        }
    }
    output_buffer.unmap();

    if swizzle {
        for pixel in pixels.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }
    image::RgbaImage::from_raw(size.width, size.height, pixels)
        .ok_or_else(|| anyhow!("readback size mismatch"))
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn default_framebuffer_size(&self) -> Size {
        self.default_target.desc.size
    }

    fn resize_default_framebuffer(&mut self, size: Size) {
        if size.is_empty() || !size.fits_within(self.max_texture_size) {
            log::error!("default framebuffer resize to {:?} ignored", size);
            return;
        }
        self.flush();
        let mut desc = self.default_target.desc.clone();
        desc.size = size;
        self.default_target = GpuTexture::new(&self.device, &desc);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeId> {
        if desc.size.is_empty() || !desc.size.fits_within(self.max_texture_size) {
            return Err(GlassError::TextureCreation {
                label: desc.label.clone(),
                reason: format!(
                    "{}x{} outside 1..={}",
                    desc.size.width, desc.size.height, self.max_texture_size
                ),
            });
        }
        let texture = GpuTexture::new(&self.device, desc);
        let id = self.next();
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn upload_texture(&mut self, texture: NativeId, size: Size, pixels: &[u8]) {
        let Some(target) = self.textures.get(&texture) else {
            log::error!("upload to unknown native texture {:?}", texture);
            return;
        };
        let bytes_per_pixel = target.desc.format.bytes_per_pixel();
        if target.desc.size != size
            || target.desc.format.is_depth()
            || pixels.len() != (size.width * size.height * bytes_per_pixel) as usize
        {
            log::error!("upload to '{}' does not match the texture", target.desc.label);
            return;
        }
        let texture = target.texture.clone();
        self.flush();
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_pixel * size.width),
                rows_per_image: Some(size.height),
            },
            extent(size),
        );
    }

    fn destroy_texture(&mut self, texture: NativeId) {
        for unit in self.state.textures.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
        self.bind_group_cache.retain(|key, _| !key.textures.contains(&texture));
        self.textures.remove(&texture);
    }

    fn generate_mipmap(&mut self, texture: NativeId) {
        let Some(source) = self.textures.get(&texture) else {
            log::error!("mipmap generation for unknown texture {:?}", texture);
            return;
        };
        let levels = source.desc.mip_level_count();
        let format = source.format;
        let views: Vec<(wgpu::TextureView, Size)> = (0..levels)
            .map(|level| {
                let size = Size::new(
                    (source.desc.size.width >> level).max(1),
                    (source.desc.size.height >> level).max(1),
                );
                (source.level_view(level), size)
            })
            .collect();
        for pair in views.windows(2) {
            let (source, (target, size)) = (&pair[0].0, &pair[1]);
            self.blit_views(
                source,
                Filter::Linear,
                [0.0, 0.0, 1.0, 1.0],
                target,
                format,
                PixelRect::of_size(*size),
            );
        }
        self.state.textures[0] = Some(texture);
    }

    fn create_framebuffer(
        &mut self,
        label: &str,
        color: NativeId,
        depth_stencil: Option<NativeId>,
    ) -> Result<NativeId> {
        let incomplete = |reason: &str| GlassError::FramebufferIncomplete {
            label: label.to_owned(),
            reason: reason.to_owned(),
        };
        let color_texture = self
            .textures
            .get(&color)
            .ok_or_else(|| incomplete("missing colour attachment"))?;
        if color_texture.desc.format.is_depth() {
            return Err(incomplete("colour attachment has a depth format"));
        }
        let depth_view = match depth_stencil {
            Some(depth) => {
                let depth_texture = self
                    .textures
                    .get(&depth)
                    .ok_or_else(|| incomplete("missing depth attachment"))?;
                if !depth_texture.desc.format.is_depth()
                    || depth_texture.desc.size != color_texture.desc.size
                {
                    return Err(incomplete("depth attachment does not match"));
                }
                Some((depth_texture.view.clone(), depth_texture.format))
            }
            None => None,
        };
        let framebuffer = GpuFramebuffer {
            color,
            color_view: color_texture.level_view(0),
            depth_view,
            size: color_texture.desc.size,
            format: color_texture.format,
        };
        let id = self.next();
        self.framebuffers.insert(id, framebuffer);
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, framebuffer: NativeId) {
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
        self.framebuffers.remove(&framebuffer);
    }

    fn create_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<NativeId> {
        let source = reflect::link_sources(vertex, fragment);
        let (_, reflection) = reflect::compile(label, &source)?;
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let bind_group_layouts = bind_group_layouts(&self.device, label, &reflection);
        let layout_refs: Vec<Option<&wgpu::BindGroupLayout>> = bind_group_layouts.iter().map(Some).collect();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &layout_refs,
            immediate_size: 0,
        });
        let blocks = reflection
            .blocks
            .iter()
            .map(|block| {
                let size = (block.size as usize).next_multiple_of(16);
                ((block.group, block.binding), vec![0u8; size])
            })
            .collect();

        let id = self.next();
        self.programs.insert(
            id,
            GpuProgram {
                label: label.to_owned(),
                module,
                reflection,
                bind_group_layouts,
                pipeline_layout,
                blocks,
                uploaded: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn uniform_location(&self, program: NativeId, name: &str) -> Option<i32> {
        self.programs.get(&program)?.reflection.location(name)
    }

    fn destroy_program(&mut self, program: NativeId) {
        if self.state.program == Some(program) {
            self.state.program = None;
        }
        self.pipelines.retain(|key, _| key.program != program);
        self.bind_group_cache.retain(|key, _| key.program != program);
        self.programs.remove(&program);
    }

    fn create_vertex_array(
        &mut self,
        layout: &BufferLayout,
        vertex_capacity_bytes: u64,
        vertices: &[f32],
        indices: &[u32],
        usage: BufferUsage,
    ) -> Result<NativeId> {
        let vertex = match usage {
            BufferUsage::Static => self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Vertex Buffer"),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
            BufferUsage::Dynamic => self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Dynamic Vertex Buffer"),
                size: vertex_capacity_bytes.max(16).next_multiple_of(4),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        };
        let index = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Index Buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        let id = self.next();
        self.vertex_arrays.insert(
            id,
            GpuVertexArray {
                vertex,
                index,
                layout: layout.clone(),
                usage,
            },
        );
        Ok(id)
    }

    fn update_vertex_buffer(&mut self, vertex_array: NativeId, vertices: &[f32]) {
        let Some(array) = self.vertex_arrays.get(&vertex_array) else {
            log::error!("update of unknown native vertex array {:?}", vertex_array);
            return;
        };
        if array.usage == BufferUsage::Static
            || std::mem::size_of_val(vertices) as u64 > array.vertex.size()
        {
            log::error!("update of vertex array {:?} rejected", vertex_array);
            return;
        }
        let buffer = array.vertex.clone();
        self.flush();
        self.queue
            .write_buffer(&buffer, 0, bytemuck::cast_slice(vertices));
    }

    fn destroy_vertex_array(&mut self, vertex_array: NativeId) {
        if self.state.vertex_array == Some(vertex_array) {
            self.state.vertex_array = None;
        }
        self.vertex_arrays.remove(&vertex_array);
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<NativeId>) {
        self.state.framebuffer = framebuffer;
        self.state.viewport = None;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = Some(viewport);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let Some(target) = self.target(self.state.framebuffer) else {
            log::error!("clear of unknown framebuffer {:?}", self.state.framebuffer);
            return;
        };
        let encoder = self.encoder();
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: f64::from(color[0]),
                        g: f64::from(color[1]),
                        b: f64::from(color[2]),
                        a: f64::from(color[3]),
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: target.depth_view.as_ref().map(|(view, _)| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });
    }

    fn use_program(&mut self, program: NativeId) {
        self.state.program = Some(program);
    }

    fn bind_texture(&mut self, unit: u32, texture: NativeId) {
        match self.state.textures.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => log::error!("texture unit {} out of range", unit),
        }
    }

    fn set_uniform(&mut self, location: i32, value: UniformValue<'_>) {
        let Some(program) = self.state.program.and_then(|id| self.programs.get_mut(&id)) else {
            log::error!("set_uniform without a program in use");
            return;
        };
        let Some(slot) = program.reflection.slot(location).cloned() else {
            log::error!("{}: no uniform at location {}", program.label, location);
            return;
        };
        let key = (slot.group, slot.binding);
        if let Some(block) = program.blocks.get_mut(&key) {
            write_uniform(block, slot.offset, slot.ty, &value);
            program.uploaded.remove(&key);
        }
    }

    fn set_blend_state(&mut self, blend: BlendState) {
        self.state.blend = blend;
    }

    fn bind_vertex_array(&mut self, vertex_array: NativeId) {
        self.state.vertex_array = Some(vertex_array);
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let (Some(program_id), Some(vertex_array_id)) = (self.state.program, self.state.vertex_array) else {
            log::error!("draw without program or vertex array");
            return;
        };
        let Some(target) = self.target(self.state.framebuffer) else {
            log::error!("draw into unknown framebuffer {:?}", self.state.framebuffer);
            return;
        };
        let Some(array) = self.vertex_arrays.get(&vertex_array_id) else {
            log::error!("draw with unknown vertex array {:?}", vertex_array_id);
            return;
        };
        let (vertex, index) = (array.vertex.clone(), array.index.clone());
        let key = PipelineKey {
            program: program_id,
            blend: self.state.blend,
            color: target.format,
            depth: target.depth_view.as_ref().map(|(_, format)| *format),
            layout: array.layout.clone(),
        };

        let viewport = self
            .state
            .viewport
            .unwrap_or_else(|| PixelRect::of_size(target.size))
            .clamped_to(target.size);
        if viewport.is_empty() {
            log::debug!("draw with an empty viewport skipped");
            return;
        }

        let Some(pipeline) = self.render_pipeline(key) else {
            log::error!("draw with unknown program {:?}", program_id);
            return;
        };
        self.upload_blocks(program_id);
        let Some(bind_groups) = self.bind_groups(program_id, &target) else {
            return;
        };

        let encoder = self.encoder();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("draw pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: target.depth_view.as_ref().map(|(view, _)| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
            multiview_mask: None,
        });
        pass.set_pipeline(&pipeline);
        for (group, (bind_group, offsets)) in bind_groups.iter().enumerate() {
            pass.set_bind_group(group as u32, bind_group, offsets);
        }
        pass.set_vertex_buffer(0, vertex.slice(..));
        pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.draw_indexed(0..index_count, 0, 0..1);
    }

    fn blit(
        &mut self,
        source: Option<NativeId>,
        destination: Option<NativeId>,
        source_rect: PixelRect,
        destination_rect: PixelRect,
        filter: Filter,
    ) {
        let (Some(src), Some(dst)) = (self.target(source), self.target(destination)) else {
            log::error!("blit between unknown framebuffers {:?} -> {:?}", source, destination);
            return;
        };
        if source == destination {
            log::error!("blit within one framebuffer is not supported");
            return;
        }

        // clip the destination and shrink the source region by the same share
        let clipped = destination_rect.clamped_to(dst.size);
        if clipped.is_empty() || source_rect.is_empty() || destination_rect.is_empty() {
            return;
        }
        let sx = source_rect.width as f32 / destination_rect.width as f32;
        let sy = source_rect.height as f32 / destination_rect.height as f32;
        let u0 = source_rect.x as f32 + (clipped.x - destination_rect.x) as f32 * sx;
        let v0 = source_rect.y as f32 + (clipped.y - destination_rect.y) as f32 * sy;
        let u1 = u0 + clipped.width as f32 * sx;
        let v1 = v0 + clipped.height as f32 * sy;
        let (w, h) = (src.size.width as f32, src.size.height as f32);

        self.blit_views(
            &src.color_view,
            filter,
            [u0 / w, v0 / h, u1 / w, v1 / h],
            &dst.color_view,
            dst.format,
            clipped,
        );
        self.state.framebuffer = destination;
    }

    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(iter::once(encoder.finish()));
        }
        self.uniforms.restart();
    }
}
