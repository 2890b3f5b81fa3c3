use crate::{
    backend::{BlendState, Filter},
    data_structures::geometry::{PixelRect, Size, Viewport},
    handle::{FramebufferHandle, ShaderProgramHandle, TextureHandle, UniformHandle, VertexArrayHandle},
    renderers::quad::{QuadDraw, QuadRenderer},
};

use super::{pool::CommandBufferPool, RenderCommand, UniformData};

/// Typed front-end of a [`CommandBufferPool`].
pub struct CommandEncoder<'a> {
    pool: &'a mut CommandBufferPool,
}

impl<'a> CommandEncoder<'a> {
    pub fn new(pool: &'a mut CommandBufferPool) -> Self {
        Self { pool }
    }

    pub fn record(&mut self, command: RenderCommand) {
        self.pool.record(command);
    }

    pub fn recorded(&self) -> usize {
        self.pool.len()
    }

    /// Discards everything recorded since [`Self::recorded`] returned `mark`.
    pub fn rewind(&mut self, mark: usize) {
        self.pool.truncate(mark);
    }

    pub fn set_render_target(&mut self, target: FramebufferHandle) {
        self.record(RenderCommand::SetRenderTarget(target));
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(RenderCommand::SetViewport(viewport));
    }

    pub fn clear(&mut self, color: [f32; 4]) {
        self.record(RenderCommand::Clear(color));
    }

    pub fn set_shader(&mut self, shader: ShaderProgramHandle) {
        self.record(RenderCommand::SetShader(shader));
    }

    pub fn set_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.record(RenderCommand::SetTexture { unit, texture });
    }

    pub fn set_uniform(&mut self, location: UniformHandle, value: UniformData) {
        self.record(value.into_command(location));
    }

    pub fn set_uniform_float(&mut self, location: UniformHandle, value: f32) {
        self.record(RenderCommand::SetUniformFloat { location, value });
    }

    pub fn set_uniform_vec2(&mut self, location: UniformHandle, value: [f32; 2]) {
        self.record(RenderCommand::SetUniformVec2 { location, value });
    }

    pub fn set_uniform_vec4(&mut self, location: UniformHandle, value: [f32; 4]) {
        self.record(RenderCommand::SetUniformVec4 { location, value });
    }

    pub fn set_uniform_int(&mut self, location: UniformHandle, value: i32) {
        self.record(RenderCommand::SetUniformInt { location, value });
    }

    pub fn set_uniform_int_array(&mut self, location: UniformHandle, value: &[i32]) {
        self.record(RenderCommand::SetUniformIntArray {
            location,
            value: value.to_vec(),
        });
    }

    pub fn set_uniform_mat4(&mut self, location: UniformHandle, value: [[f32; 4]; 4]) {
        self.record(RenderCommand::SetUniformMat4 { location, value });
    }

    pub fn set_blend_state(&mut self, blend: BlendState) {
        self.record(RenderCommand::SetBlendState(blend));
    }

    pub fn draw(&mut self, shader: ShaderProgramHandle, vertex_array: VertexArrayHandle) {
        self.record(RenderCommand::Draw {
            shader,
            vertex_array,
        });
    }

    pub fn generate_mipmap(&mut self, texture: TextureHandle) {
        self.record(RenderCommand::GenerateMipmap(texture));
    }

    pub fn blit(
        &mut self,
        source: FramebufferHandle,
        destination: FramebufferHandle,
        source_rect: PixelRect,
        destination_rect: PixelRect,
        filter: Filter,
    ) {
        self.record(RenderCommand::Blit {
            source,
            destination,
            source_rect,
            destination_rect,
            filter,
        });
    }

    /// Linear blit of the whole of `source` onto the whole of `destination`.
    pub fn blit_full(
        &mut self,
        source: FramebufferHandle,
        source_size: Size,
        destination: FramebufferHandle,
        destination_size: Size,
    ) {
        self.blit(
            source,
            destination,
            PixelRect::of_size(source_size),
            PixelRect::of_size(destination_size),
            Filter::Linear,
        );
    }

    /// Draws `vertex_array` over the whole of `target` with the uniforms the
    /// program already holds.
    pub fn draw_fullscreen_quad(
        &mut self,
        target: FramebufferHandle,
        target_size: Size,
        shader: ShaderProgramHandle,
        vertex_array: VertexArrayHandle,
    ) {
        self.set_render_target(target);
        self.set_viewport(PixelRect::of_size(target_size));
        self.set_shader(shader);
        self.draw(shader, vertex_array);
    }

    /// Records the down/up chain of a dual blur.
    ///
    /// `plan.chain[0]` must already hold the input. Downsampling walks
    /// `chain[i] -> chain[i + 1]`, upsampling walks back; the final upsample
    /// writes `plan.output` and is the only one that applies the tint.
    pub fn encode_dual_blur(&mut self, quad: &mut QuadRenderer, plan: &DualBlurPlan<'_>) {
        let passes = plan.chain.len().saturating_sub(1);
        if passes == 0 {
            log::warn!("dual blur with a chain of {} entries skipped", plan.chain.len());
            return;
        }

        for window in plan.chain.windows(2) {
            let (source, target) = (&window[0], &window[1]);
            quad.draw(
                self,
                &QuadDraw::new(plan.down.shader, target.framebuffer, target.size)
                    .with_texture(0, source.texture),
                &[(plan.down.texel_offset, texel_offset(plan.offset, target.size))],
            );
        }

        for i in (1..=passes).rev() {
            let source = &plan.chain[i];
            let (target, tint) = if i == 1 {
                (&plan.output, plan.tint)
            } else {
                (&plan.chain[i - 1], [0.0; 4])
            };
            quad.draw(
                self,
                &QuadDraw::new(plan.up.shader, target.framebuffer, target.size)
                    .with_texture(0, source.texture),
                &[
                    (plan.up.texel_offset, texel_offset(plan.offset, target.size)),
                    (plan.up.tint, UniformData::Vec4(tint)),
                ],
            );
        }
    }
}

fn texel_offset(offset: f32, size: Size) -> UniformData {
    UniformData::Vec2([offset / size.width as f32, offset / size.height as f32])
}

/// One render target of a blur chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainLink {
    pub framebuffer: FramebufferHandle,
    pub texture: TextureHandle,
    pub size: Size,
}

/// A blur program and the locations of its pass parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlurProgram {
    pub shader: ShaderProgramHandle,
    pub texel_offset: UniformHandle,
    /// Only present in the upsample program.
    pub tint: UniformHandle,
}

#[derive(Debug, Clone, Copy)]
pub struct DualBlurPlan<'a> {
    pub chain: &'a [ChainLink],
    pub output: ChainLink,
    pub down: BlurProgram,
    pub up: BlurProgram,
    pub offset: f32,
    pub tint: [f32; 4],
}
