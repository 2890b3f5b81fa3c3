//! The stateful graphics API the engine drives.
//!
//! [`GraphicsBackend`] is deliberately shaped like a classic bind-then-draw
//! driver: render target, program, vertex array, textures and blend state are
//! bound one at a time and stay bound until changed. The [`CommandPlayer`]
//! caches that state and only calls into the backend when it actually
//! changes, which is what makes the cache observable and testable.
//!
//! Implementations:
//!
//! - [`gpu::WgpuBackend`] renders with `wgpu`
//! - [`headless::HeadlessBackend`] validates and records calls without a GPU
//!
//! Backends hand out [`NativeId`]s; engine code never stores them outside the
//! resource managers, which map handles to native ids.
//!
//! [`CommandPlayer`]: crate::commands::player::CommandPlayer

pub mod headless;
pub mod reflect;
pub mod gpu;

use crate::{
    data_structures::geometry::{PixelRect, Size, Viewport},
    error::Result,
    resources::mesh::BufferLayout,
};

/// Id of an object inside one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    Bgra8,
    Rgba16Float,
    Depth24Stencil8,
}

impl PixelFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, PixelFormat::Depth24Stencil8)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Depth24Stencil8 => 4,
            PixelFormat::Rgba16Float => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: String,
    pub size: Size,
    pub format: PixelFormat,
    /// Allocate a full mip chain and sample it trilinearly.
    pub mipmaps: bool,
}

impl TextureDescriptor {
    pub fn mip_level_count(&self) -> u32 {
        if self.mipmaps {
            32 - self.size.width.max(self.size.height).max(1).leading_zeros()
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub equation: BlendEquation,
}

impl BlendState {
    pub const DISABLED: Self = Self {
        enabled: false,
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
        equation: BlendEquation::Add,
    };

    pub const ALPHA: Self = Self {
        enabled: true,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
        equation: BlendEquation::Add,
    };

    pub const ADDITIVE: Self = Self {
        enabled: true,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::One,
        equation: BlendEquation::Add,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        Self::DISABLED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue<'a> {
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Int(i32),
    IntArray(&'a [i32]),
    Mat4([[f32; 4]; 4]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

/// Driver-level operations.
///
/// All methods are called from the GPU thread only. Binding methods mutate the
/// driver's current state; a `draw_indexed` uses whatever is bound.
pub trait GraphicsBackend {
    fn name(&self) -> &'static str;

    /// Largest texture dimension the device accepts.
    fn max_texture_size(&self) -> u32;

    fn default_framebuffer_size(&self) -> Size;

    fn resize_default_framebuffer(&mut self, size: Size);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeId>;

    /// Replaces mip level 0 with tightly packed pixels.
    fn upload_texture(&mut self, texture: NativeId, size: Size, pixels: &[u8]);

    fn destroy_texture(&mut self, texture: NativeId);

    /// Rebuilds levels `1..` from level 0. May disturb the binding of texture unit 0.
    fn generate_mipmap(&mut self, texture: NativeId);

    /// Fails with `FramebufferIncomplete` if the attachments cannot be rendered to.
    fn create_framebuffer(
        &mut self,
        label: &str,
        color: NativeId,
        depth_stencil: Option<NativeId>,
    ) -> Result<NativeId>;

    fn destroy_framebuffer(&mut self, framebuffer: NativeId);

    /// Compiles and links `vertex` + `fragment`. Fails with `ShaderCompile`.
    fn create_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<NativeId>;

    /// Location of an active uniform of `program`.
    fn uniform_location(&self, program: NativeId, name: &str) -> Option<i32>;

    fn destroy_program(&mut self, program: NativeId);

    fn create_vertex_array(
        &mut self,
        layout: &BufferLayout,
        vertex_capacity_bytes: u64,
        vertices: &[f32],
        indices: &[u32],
        usage: BufferUsage,
    ) -> Result<NativeId>;

    /// Overwrites the start of the vertex buffer.
    fn update_vertex_buffer(&mut self, vertex_array: NativeId, vertices: &[f32]);

    fn destroy_vertex_array(&mut self, vertex_array: NativeId);

    /// `None` binds the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<NativeId>);

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clears the colour (and depth/stencil) of the bound framebuffer.
    fn clear(&mut self, color: [f32; 4]);

    fn use_program(&mut self, program: NativeId);

    fn bind_texture(&mut self, unit: u32, texture: NativeId);

    /// Sets a uniform of the program in use.
    fn set_uniform(&mut self, location: i32, value: UniformValue<'_>);

    fn set_blend_state(&mut self, blend: BlendState);

    fn bind_vertex_array(&mut self, vertex_array: NativeId);

    fn draw_indexed(&mut self, index_count: u32);

    /// Copies a region between framebuffers. Rebinds the driver's read and
    /// draw framebuffers; the bound render target is undefined afterwards.
    fn blit(
        &mut self,
        source: Option<NativeId>,
        destination: Option<NativeId>,
        source_rect: PixelRect,
        destination_rect: PixelRect,
        filter: Filter,
    );

    /// Submits recorded work.
    fn flush(&mut self);
}
