//! The frosted-glass effect chain.
//!
//! Every blurred region runs the same fixed sequence of stages:
//!
//! 1. [`preprocess`]: crop the capture around the region and downsample it
//!    without aliasing
//! 2. [`blur`]: dual kawase blur through a chain of shrinking framebuffers
//! 3. [`noise`]: grain on top of the blurred result
//! 4. [`mask`]: optional alpha mask against the unblurred background
//! 5. [`blend`]: composite into the destination at the region's opacity
//!
//! Stages only record commands. They get everything they touch through an
//! explicit [`EffectContext`]; there is no ambient state.

pub mod blend;
pub mod blur;
pub mod coordinator;
pub mod mask;
pub mod noise;
pub mod preprocess;

use crate::{
    backend::{GraphicsBackend, PixelFormat},
    commands::encoder::{BlurProgram, ChainLink, CommandEncoder},
    context::EngineConfig,
    data_structures::geometry::{Rect, Size},
    error::{GlassError, Result},
    handle::{FramebufferHandle, ShaderProgramHandle, UniformHandle},
    renderers::quad::QuadRenderer,
    resources::{
        framebuffer::{AttachmentSpecification, FramebufferSpecification},
        shader::{AssetSource, EmbeddedShaders},
        Resources,
    },
};

/// Per-frame facts every stage may read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Unpooled framebuffer holding the captured screen.
    pub capture: FramebufferHandle,
    pub capture_size: Size,
    pub destination_size: Size,
    pub frame_index: u64,
}

impl FrameContext {
    /// Factor from capture pixels to pixels of a destination of `size`.
    pub fn scale_to(&self, size: Size) -> (f32, f32) {
        (
            size.width as f32 / self.capture_size.width.max(1) as f32,
            size.height as f32 / self.capture_size.height.max(1) as f32,
        )
    }
}

/// Locations of the preprocess parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessProgram {
    pub shader: ShaderProgramHandle,
    pub texel_size: UniformHandle,
    pub lod: UniformHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeamHidingProgram {
    pub shader: ShaderProgramHandle,
    pub texel_size: UniformHandle,
    pub lod: UniformHandle,
    pub corner_radius: UniformHandle,
    pub rect_size: UniformHandle,
    pub falloff: UniformHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskProgram {
    pub shader: ShaderProgramHandle,
    pub mask_uv: UniformHandle,
    pub background_uv: UniformHandle,
    pub foreground_uv: UniformHandle,
}

/// The programs of the effect chain, compiled once per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectShaders {
    pub copy: ShaderProgramHandle,
    pub preprocess: PreprocessProgram,
    pub seam_hiding: SeamHidingProgram,
    pub blur_down: BlurProgram,
    pub blur_up: BlurProgram,
    pub mask: MaskProgram,
}

impl EffectShaders {
    /// Compiles every program from `assets` and registers it with `quad`.
    pub fn load(
        backend: &mut dyn GraphicsBackend,
        resources: &mut Resources,
        quad: &mut QuadRenderer,
        assets: &dyn AssetSource,
    ) -> Result<Self> {
        let mut load = |fragment: &str| -> Result<ShaderProgramHandle> {
            let shader = resources.shaders.load_shader_from_assets(
                backend,
                assets,
                EmbeddedShaders::QUAD_VERT,
                fragment,
            )?;
            quad.register(backend, &mut resources.shaders, shader)?;
            Ok(shader)
        };
        let copy = load(EmbeddedShaders::COPY_FRAG)?;
        let preprocess = load(EmbeddedShaders::PREPROCESS_AA_FRAG)?;
        let seam_hiding = load(EmbeddedShaders::PREPROCESS_EDGE_FRAG)?;
        let blur_down = load(EmbeddedShaders::BLUR_DOWN_FRAG)?;
        let blur_up = load(EmbeddedShaders::BLUR_UP_FRAG)?;
        let mask = load(EmbeddedShaders::MASK_FRAG)?;

        let backend: &dyn GraphicsBackend = backend;
        let shaders = &mut resources.shaders;
        let mut uniform = |shader: ShaderProgramHandle, name: &str| -> UniformHandle {
            shaders.get_uniform_handle(backend, shader, name)
        };
        Ok(Self {
            copy,
            preprocess: PreprocessProgram {
                shader: preprocess,
                texel_size: uniform(preprocess, "u_texel_size"),
                lod: uniform(preprocess, "u_lod"),
            },
            seam_hiding: SeamHidingProgram {
                shader: seam_hiding,
                texel_size: uniform(seam_hiding, "u_texel_size"),
                lod: uniform(seam_hiding, "u_lod"),
                corner_radius: uniform(seam_hiding, "u_corner_radius"),
                rect_size: uniform(seam_hiding, "u_rect_size"),
                falloff: uniform(seam_hiding, "u_falloff"),
            },
            blur_down: BlurProgram {
                shader: blur_down,
                texel_offset: uniform(blur_down, "u_texel_offset"),
                tint: UniformHandle::INVALID,
            },
            blur_up: BlurProgram {
                shader: blur_up,
                texel_offset: uniform(blur_up, "u_texel_offset"),
                tint: uniform(blur_up, "u_tint"),
            },
            mask: MaskProgram {
                shader: mask,
                mask_uv: uniform(mask, "u_mask_uv"),
                background_uv: uniform(mask, "u_background_uv"),
                foreground_uv: uniform(mask, "u_foreground_uv"),
            },
        })
    }
}

/// What a stage hands to the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageOutput {
    pub target: ChainLink,
    /// Where the region itself lies inside `target`, in its pixels. The rest
    /// is margin kept for the blur kernels.
    pub content: Rect,
}

/// Everything a stage may touch while recording one render object.
pub struct EffectContext<'a, 'p> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub resources: &'a mut Resources,
    pub encoder: &'a mut CommandEncoder<'p>,
    pub quad: &'a mut QuadRenderer,
    pub shaders: &'a EffectShaders,
    pub config: &'a EngineConfig,
    pub frame: &'a FrameContext,
}

impl EffectContext<'_, '_> {
    /// A pooled framebuffer for this frame.
    pub fn acquire(&mut self, spec: &FramebufferSpecification) -> Result<ChainLink> {
        let framebuffer =
            self.resources
                .framebuffers
                .acquire(self.backend, &mut self.resources.textures, spec)?;
        let texture = self
            .resources
            .framebuffers
            .color_attachment(framebuffer)
            .ok_or(GlassError::UnknownHandle {
                kind: "framebuffer",
                id: framebuffer.raw(),
            })?;
        Ok(ChainLink {
            framebuffer,
            texture,
            size: spec.sampled_size(),
        })
    }

    /// A pooled single-attachment RGBA8 framebuffer of `size`.
    pub fn acquire_color(&mut self, size: Size) -> Result<ChainLink> {
        self.acquire(&FramebufferSpecification::color(size))
    }

    /// Like [`Self::acquire_color`] but with a mip chain.
    pub fn acquire_mipmapped(&mut self, size: Size) -> Result<ChainLink> {
        self.acquire(
            &FramebufferSpecification::color(size).with_attachments(vec![
                AttachmentSpecification::color(PixelFormat::Rgba8).with_mipmaps(),
            ]),
        )
    }

    /// Whether `framebuffer` stores its contents bottom-up.
    pub fn is_flipped(&self, framebuffer: FramebufferHandle) -> bool {
        self.resources
            .framebuffers
            .get(framebuffer)
            .is_some_and(|fb| fb.is_flipped())
    }
}
