use crate::{
    backend::{BlendState, GraphicsBackend, UniformValue},
    data_structures::geometry::Viewport,
    handle::{FramebufferHandle, ShaderProgramHandle, TextureHandle, UniformHandle, VertexArrayHandle},
    resources::Resources,
};

use super::{RenderCommand, MAX_TEXTURE_UNITS};

/// Counters of one [`CommandPlayer::execute`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStats {
    /// Commands that reached the backend.
    pub executed: usize,
    /// Commands dropped because of invalid or unknown handles.
    pub skipped: usize,
    /// State changes that matched the cached state.
    pub elided: usize,
    pub draws: usize,
    pub blits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Executed,
    Elided,
    Skipped,
}

/// Driver state as last set by this player. `None` means unknown.
#[derive(Debug, Default)]
struct StateCache {
    framebuffer: Option<FramebufferHandle>,
    program: Option<ShaderProgramHandle>,
    vertex_array: Option<VertexArrayHandle>,
    textures: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    blend: Option<BlendState>,
    viewport: Option<Viewport>,
}

/// Replays commands against a backend, skipping redundant state changes.
#[derive(Debug, Default)]
pub struct CommandPlayer {
    state: StateCache,
    last_stats: PlayerStats,
}

impl CommandPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all cached state; the next change of every kind reaches the driver.
    pub fn reset_state_cache(&mut self) {
        self.state = StateCache::default();
    }

    pub fn last_stats(&self) -> PlayerStats {
        self.last_stats
    }

    /// Plays `commands` in order.
    pub fn execute(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &Resources,
        commands: &[RenderCommand],
    ) -> PlayerStats {
        let mut stats = PlayerStats::default();
        for command in commands {
            let outcome = self.play(backend, resources, command);
            match outcome {
                Outcome::Executed => stats.executed += 1,
                Outcome::Elided => stats.elided += 1,
                Outcome::Skipped => stats.skipped += 1,
            }
            if outcome == Outcome::Executed {
                match command {
                    RenderCommand::Draw { .. } => stats.draws += 1,
                    RenderCommand::Blit { .. } => stats.blits += 1,
                    _ => {}
                }
            }
        }
        if stats.skipped > 0 {
            log::warn!("{} of {} commands skipped", stats.skipped, commands.len());
        }
        self.last_stats = stats;
        stats
    }

    fn play(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &Resources,
        command: &RenderCommand,
    ) -> Outcome {
        match command {
            RenderCommand::SetRenderTarget(target) => self.bind_framebuffer(backend, resources, *target),
            RenderCommand::SetViewport(viewport) => {
                if self.state.viewport == Some(*viewport) {
                    return Outcome::Elided;
                }
                backend.set_viewport(*viewport);
                self.state.viewport = Some(*viewport);
                Outcome::Executed
            }
            RenderCommand::Clear(color) => {
                backend.clear(*color);
                Outcome::Executed
            }
            RenderCommand::SetShader(shader) => self.bind_program(backend, resources, *shader),
            RenderCommand::SetTexture { unit, texture } => {
                let Some(slot) = self.state.textures.get(*unit as usize).copied() else {
                    log::error!("texture unit {} out of range (max {})", unit, MAX_TEXTURE_UNITS);
                    return Outcome::Skipped;
                };
                if slot == Some(*texture) {
                    return Outcome::Elided;
                }
                let native = match resources.textures.native(*texture) {
                    Ok(native) => native,
                    Err(e) => {
                        log::error!("SetTexture skipped: {}", e);
                        return Outcome::Skipped;
                    }
                };
                backend.bind_texture(*unit, native);
                self.state.textures[*unit as usize] = Some(*texture);
                Outcome::Executed
            }
            RenderCommand::SetUniformFloat { location, value } => {
                self.set_uniform(backend, *location, UniformValue::Float(*value))
            }
            RenderCommand::SetUniformVec2 { location, value } => {
                self.set_uniform(backend, *location, UniformValue::Vec2(*value))
            }
            RenderCommand::SetUniformVec4 { location, value } => {
                self.set_uniform(backend, *location, UniformValue::Vec4(*value))
            }
            RenderCommand::SetUniformInt { location, value } => {
                self.set_uniform(backend, *location, UniformValue::Int(*value))
            }
            RenderCommand::SetUniformIntArray { location, value } => {
                self.set_uniform(backend, *location, UniformValue::IntArray(value))
            }
            RenderCommand::SetUniformMat4 { location, value } => {
                self.set_uniform(backend, *location, UniformValue::Mat4(*value))
            }
            RenderCommand::SetBlendState(blend) => {
                if self.state.blend == Some(*blend) {
                    return Outcome::Elided;
                }
                backend.set_blend_state(*blend);
                self.state.blend = Some(*blend);
                Outcome::Executed
            }
            RenderCommand::Draw {
                shader,
                vertex_array,
            } => {
                if !shader.is_valid() || !vertex_array.is_valid() {
                    log::error!("Draw skipped: shader {:?}, vertex array {:?}", shader, vertex_array);
                    return Outcome::Skipped;
                }
                let Some(mesh) = resources.meshes.get(*vertex_array) else {
                    log::error!("Draw skipped: unknown vertex array {:?}", vertex_array);
                    return Outcome::Skipped;
                };
                if self.bind_program(backend, resources, *shader) == Outcome::Skipped {
                    return Outcome::Skipped;
                }
                if self.state.vertex_array != Some(*vertex_array) {
                    backend.bind_vertex_array(mesh.native());
                    self.state.vertex_array = Some(*vertex_array);
                }
                backend.draw_indexed(mesh.index_count());
                Outcome::Executed
            }
            RenderCommand::Blit {
                source,
                destination,
                source_rect,
                destination_rect,
                filter,
            } => {
                if !source.is_valid() || !destination.is_valid() {
                    log::error!("Blit skipped: {:?} -> {:?}", source, destination);
                    return Outcome::Skipped;
                }
                let resolved = resources
                    .framebuffers
                    .resolve(*source)
                    .and_then(|s| Ok((s, resources.framebuffers.resolve(*destination)?)));
                let (source_native, destination_native) = match resolved {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::error!("Blit skipped: {}", e);
                        return Outcome::Skipped;
                    }
                };
                backend.blit(
                    source_native,
                    destination_native,
                    *source_rect,
                    *destination_rect,
                    *filter,
                );
                // the driver's draw target is undefined after a blit
                self.state.framebuffer = None;
                Outcome::Executed
            }
            RenderCommand::GenerateMipmap(texture) => {
                let native = match resources.textures.native(*texture) {
                    Ok(native) => native,
                    Err(e) => {
                        log::error!("GenerateMipmap skipped: {}", e);
                        return Outcome::Skipped;
                    }
                };
                backend.generate_mipmap(native);
                self.state.textures[0] = None;
                Outcome::Executed
            }
        }
    }

    fn bind_framebuffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &Resources,
        target: FramebufferHandle,
    ) -> Outcome {
        if self.state.framebuffer == Some(target) {
            return Outcome::Elided;
        }
        if !target.is_valid() {
            log::error!("SetRenderTarget skipped: invalid handle");
            return Outcome::Skipped;
        }
        match resources.framebuffers.resolve(target) {
            Ok(native) => {
                backend.bind_framebuffer(native);
                self.state.framebuffer = Some(target);
                Outcome::Executed
            }
            Err(e) => {
                log::error!("SetRenderTarget skipped: {}", e);
                Outcome::Skipped
            }
        }
    }

    fn bind_program(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        resources: &Resources,
        shader: ShaderProgramHandle,
    ) -> Outcome {
        if self.state.program == Some(shader) {
            return Outcome::Elided;
        }
        match resources.shaders.native(shader) {
            Ok(native) => {
                backend.use_program(native);
                self.state.program = Some(shader);
                Outcome::Executed
            }
            Err(e) => {
                log::error!("SetShader skipped: {}", e);
                Outcome::Skipped
            }
        }
    }

    fn set_uniform(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        location: UniformHandle,
        value: UniformValue<'_>,
    ) -> Outcome {
        if !location.is_valid() {
            log::error!("uniform upload skipped: invalid location");
            return Outcome::Skipped;
        }
        if self.state.program.is_none() {
            log::error!("uniform upload skipped: no program bound");
            return Outcome::Skipped;
        }
        backend.set_uniform(location.raw(), value);
        Outcome::Executed
    }
}
