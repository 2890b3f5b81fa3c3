//! Single textured quad, drawn with one indexed draw.
//!
//! Every program drawn through the [`QuadRenderer`] shares the vertex stage in
//! `quad.vert.wgsl` and therefore the same four per-draw uniforms:
//!
//! - `u_view_proj` maps the unit quad onto the viewport (mandatory)
//! - `u_uv_rect` selects the sampled region of texture unit 0
//! - `u_flip_y` samples bottom-up stored textures the right way round
//! - `u_alpha` scales the output alpha
//!
//! Uniform values persist per program, so the renderer remembers what it last
//! uploaded to each program and records a `SetUniform*` command only when a
//! value changes.

use std::collections::HashMap;

use cgmath::{ortho, Matrix4};

use crate::{
    backend::{BlendState, GraphicsBackend},
    commands::{encoder::CommandEncoder, UniformData},
    data_structures::geometry::{PixelRect, Size, UvRect, Viewport},
    error::Result,
    handle::{FramebufferHandle, ShaderProgramHandle, TextureHandle, UniformHandle, VertexArrayHandle},
    resources::{
        mesh::{BufferElement, BufferLayout, ShaderDataType},
        shader::ShaderManager,
        Resources,
    },
};

pub const VIEW_PROJ: &str = "u_view_proj";
pub const UV_RECT: &str = "u_uv_rect";
pub const FLIP_Y: &str = "u_flip_y";
pub const ALPHA: &str = "u_alpha";

/// Texture units a quad draw may bind.
pub const MAX_QUAD_TEXTURES: usize = 3;

#[rustfmt::skip]
const QUAD_VERTICES: [f32; 16] = [
    // position  uv
    0.0, 0.0,    0.0, 0.0,
    1.0, 0.0,    1.0, 0.0,
    1.0, 1.0,    1.0, 1.0,
    0.0, 1.0,    0.0, 1.0,
];
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

pub fn quad_layout() -> BufferLayout {
    BufferLayout::new(vec![
        BufferElement::new("a_position", ShaderDataType::Float2),
        BufferElement::new("a_uv", ShaderDataType::Float2),
    ])
}

/// Unit square with `(0, 0)` at the top left of the viewport.
pub fn unit_view_projection() -> [[f32; 4]; 4] {
    let projection: Matrix4<f32> = ortho(0.0, 1.0, 1.0, 0.0, -1.0, 1.0);
    projection.into()
}

/// Parameters of one quad draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw {
    pub shader: ShaderProgramHandle,
    pub target: FramebufferHandle,
    pub viewport: Viewport,
    pub textures: [TextureHandle; MAX_QUAD_TEXTURES],
    pub uv_rect: UvRect,
    pub flip_y: bool,
    pub alpha: f32,
    pub blend: BlendState,
}

impl QuadDraw {
    /// Opaque draw of the full uv range over all of `target`.
    pub fn new(shader: ShaderProgramHandle, target: FramebufferHandle, target_size: Size) -> Self {
        Self {
            shader,
            target,
            viewport: PixelRect::of_size(target_size),
            textures: [TextureHandle::INVALID; MAX_QUAD_TEXTURES],
            uv_rect: UvRect::FULL,
            flip_y: false,
            alpha: 1.0,
            blend: BlendState::DISABLED,
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    /// Binds `texture` to `unit`. Units at or above [`MAX_QUAD_TEXTURES`] are ignored.
    pub fn with_texture(mut self, unit: usize, texture: TextureHandle) -> Self {
        match self.textures.get_mut(unit) {
            Some(slot) => *slot = texture,
            None => log::warn!("quad texture unit {} out of range", unit),
        }
        self
    }

    pub fn with_uv_rect(mut self, uv_rect: UvRect) -> Self {
        self.uv_rect = uv_rect;
        self
    }

    pub fn with_flip_y(mut self, flip_y: bool) -> Self {
        self.flip_y = flip_y;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }
}

#[derive(Debug)]
struct QuadProgram {
    view_proj: UniformHandle,
    uv_rect: UniformHandle,
    flip_y: UniformHandle,
    alpha: UniformHandle,
    uploaded: HashMap<UniformHandle, UniformData>,
}

#[derive(Debug)]
pub struct QuadRenderer {
    mesh: VertexArrayHandle,
    view_proj: [[f32; 4]; 4],
    programs: HashMap<ShaderProgramHandle, QuadProgram>,
}

impl QuadRenderer {
    pub fn new(backend: &mut dyn GraphicsBackend, resources: &mut Resources) -> Result<Self> {
        let mesh = resources
            .meshes
            .create_static_mesh(backend, &QUAD_VERTICES, &QUAD_INDICES, quad_layout())?;
        Ok(Self {
            mesh,
            view_proj: unit_view_projection(),
            programs: HashMap::new(),
        })
    }

    pub fn mesh(&self) -> VertexArrayHandle {
        self.mesh
    }

    /// Resolves the per-draw uniforms of `shader`. Fails if the program has no
    /// `u_view_proj`.
    pub fn register(
        &mut self,
        backend: &dyn GraphicsBackend,
        shaders: &mut ShaderManager,
        shader: ShaderProgramHandle,
    ) -> Result<()> {
        if self.programs.contains_key(&shader) {
            return Ok(());
        }
        let program = QuadProgram {
            view_proj: shaders.require_uniform(backend, shader, VIEW_PROJ)?,
            uv_rect: shaders.get_uniform_handle(backend, shader, UV_RECT),
            flip_y: shaders.get_uniform_handle(backend, shader, FLIP_Y),
            alpha: shaders.get_uniform_handle(backend, shader, ALPHA),
            uploaded: HashMap::new(),
        };
        self.programs.insert(shader, program);
        Ok(())
    }

    pub fn is_registered(&self, shader: ShaderProgramHandle) -> bool {
        self.programs.contains_key(&shader)
    }

    /// Drops what is known about `shader`, e.g. after it was destroyed.
    pub fn forget(&mut self, shader: ShaderProgramHandle) {
        self.programs.remove(&shader);
    }

    /// Forgets every uploaded value, so the next draw of each program sends
    /// all of its uniforms again. Needed once recorded commands were discarded
    /// before reaching the driver.
    pub fn invalidate(&mut self) {
        for program in self.programs.values_mut() {
            program.uploaded.clear();
        }
    }

    /// Records one quad draw plus whatever uniform changes it needs.
    /// `extra` holds program-specific parameters, dirty-tracked like the
    /// built-in ones.
    pub fn draw(
        &mut self,
        encoder: &mut CommandEncoder<'_>,
        draw: &QuadDraw,
        extra: &[(UniformHandle, UniformData)],
    ) {
        let Some(program) = self.programs.get_mut(&draw.shader) else {
            log::error!("quad draw with unregistered shader {:?} skipped", draw.shader);
            return;
        };
        if draw.viewport.is_empty() {
            log::debug!("quad draw into empty viewport skipped");
            return;
        }

        encoder.set_render_target(draw.target);
        encoder.set_viewport(draw.viewport);
        encoder.set_blend_state(draw.blend);
        encoder.set_shader(draw.shader);
        for (unit, texture) in draw.textures.iter().enumerate() {
            if texture.is_valid() {
                encoder.set_texture(unit as u32, *texture);
            }
        }

        let builtins = [
            (program.view_proj, UniformData::Mat4(self.view_proj)),
            (program.uv_rect, UniformData::Vec4(draw.uv_rect.as_vec4())),
            (program.flip_y, UniformData::Int(draw.flip_y as i32)),
            (program.alpha, UniformData::Float(draw.alpha)),
        ];
        for (location, value) in builtins.into_iter().chain(extra.iter().cloned()) {
            upload_if_changed(&mut program.uploaded, encoder, location, value);
        }

        encoder.draw(draw.shader, self.mesh);
    }
}

fn upload_if_changed(
    uploaded: &mut HashMap<UniformHandle, UniformData>,
    encoder: &mut CommandEncoder<'_>,
    location: UniformHandle,
    value: UniformData,
) {
    if !location.is_valid() || uploaded.get(&location) == Some(&value) {
        return;
    }
    encoder.set_uniform(location, value.clone());
    uploaded.insert(location, value);
}
