//! Error types.
//!
//! Only fatal conditions surface as [`GlassError`]: they indicate a broken
//! asset or a programming error and abort engine construction. Transient
//! problems (invalid handles in a recorded frame, short buffer updates, bad
//! resize requests) are logged and skipped where they happen.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GlassError {
    #[error("framebuffer '{label}' is incomplete: {reason}")]
    FramebufferIncomplete { label: String, reason: String },

    #[error("texture '{label}' cannot be created: {reason}")]
    TextureCreation { label: String, reason: String },

    #[error("shader program '{program}' failed to compile: {message}")]
    ShaderCompile { program: String, message: String },

    #[error("shader source '{0}' not found in asset source")]
    ShaderSourceMissing(String),

    #[error("mandatory uniform '{uniform}' not found in program '{program}'")]
    MissingUniform { program: String, uniform: String },

    #[error("graphics backend initialisation failed: {0}")]
    BackendInit(String),

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: i32 },

    #[error("the GPU thread has shut down")]
    ThreadGone,
}

pub type Result<T, E = GlassError> = std::result::Result<T, E>;
