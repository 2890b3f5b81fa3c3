//! Recorded render operations.
//!
//! Stages never talk to the backend. They record [`RenderCommand`]s through a
//! [`encoder::CommandEncoder`] into the frame's [`pool::CommandBufferPool`];
//! the [`player::CommandPlayer`] replays them in record order at the end of
//! the frame.

pub mod encoder;
pub mod player;
pub mod pool;

use crate::{
    backend::{BlendState, Filter, UniformValue},
    data_structures::geometry::{PixelRect, Viewport},
    handle::{FramebufferHandle, ShaderProgramHandle, TextureHandle, UniformHandle, VertexArrayHandle},
};

/// Highest texture unit a command may address, exclusive.
pub const MAX_TEXTURE_UNITS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    SetRenderTarget(FramebufferHandle),
    SetViewport(Viewport),
    Clear([f32; 4]),
    SetShader(ShaderProgramHandle),
    SetTexture {
        unit: u32,
        texture: TextureHandle,
    },
    SetUniformFloat {
        location: UniformHandle,
        value: f32,
    },
    SetUniformVec2 {
        location: UniformHandle,
        value: [f32; 2],
    },
    SetUniformVec4 {
        location: UniformHandle,
        value: [f32; 4],
    },
    SetUniformInt {
        location: UniformHandle,
        value: i32,
    },
    SetUniformIntArray {
        location: UniformHandle,
        value: Vec<i32>,
    },
    SetUniformMat4 {
        location: UniformHandle,
        value: [[f32; 4]; 4],
    },
    SetBlendState(BlendState),
    /// Indexed draw of the whole mesh with `shader`.
    Draw {
        shader: ShaderProgramHandle,
        vertex_array: VertexArrayHandle,
    },
    Blit {
        source: FramebufferHandle,
        destination: FramebufferHandle,
        source_rect: PixelRect,
        destination_rect: PixelRect,
        filter: Filter,
    },
    GenerateMipmap(TextureHandle),
}

/// An owned uniform value, as stored in commands and dirty-tracking caches.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformData {
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Int(i32),
    IntArray(Vec<i32>),
    Mat4([[f32; 4]; 4]),
}

impl UniformData {
    pub fn into_command(self, location: UniformHandle) -> RenderCommand {
        match self {
            UniformData::Float(value) => RenderCommand::SetUniformFloat { location, value },
            UniformData::Vec2(value) => RenderCommand::SetUniformVec2 { location, value },
            UniformData::Vec4(value) => RenderCommand::SetUniformVec4 { location, value },
            UniformData::Int(value) => RenderCommand::SetUniformInt { location, value },
            UniformData::IntArray(value) => RenderCommand::SetUniformIntArray { location, value },
            UniformData::Mat4(value) => RenderCommand::SetUniformMat4 { location, value },
        }
    }

    pub fn as_value(&self) -> UniformValue<'_> {
        match self {
            UniformData::Float(v) => UniformValue::Float(*v),
            UniformData::Vec2(v) => UniformValue::Vec2(*v),
            UniformData::Vec4(v) => UniformValue::Vec4(*v),
            UniformData::Int(v) => UniformValue::Int(*v),
            UniformData::IntArray(v) => UniformValue::IntArray(v),
            UniformData::Mat4(v) => UniformValue::Mat4(*v),
        }
    }
}
