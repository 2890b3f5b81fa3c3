//! flow-glass
//!
//! A real-time backdrop-blur compositor. Regions of a captured screen are
//! cropped, downsampled, blurred with a dual kawase filter, optionally grained
//! and masked, and composited back at their opacity: the "frosted glass" look.
//!
//! Rendering goes through a GL-like, handle-based command layer. Stages record
//! [`commands::RenderCommand`]s into a reusable buffer and a
//! [`commands::player::CommandPlayer`] replays them against a
//! [`backend::GraphicsBackend`], skipping redundant state changes.
//!
//! High-level modules
//! - `backend`: the driver trait plus a `wgpu` and a recording headless backend
//! - `commands`: command vocabulary, buffer pool, encoder and player
//! - `context`: the engine that owns every table and records a frame
//! - `data_structures`: geometry, styles and render objects
//! - `flow`: the dedicated GPU thread and its handles
//! - `handle`: typed integer handles
//! - `pipelines`: the effect stages and the per-object coordinator
//! - `renderers`: textured quads and batched host overlays
//! - `resources`: texture, framebuffer, shader and mesh managers
//!

pub mod backend;
pub mod commands;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod handle;
pub mod pipelines;
pub mod renderers;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use context::{CaptureFrame, Context, EngineConfig, FrameIntent, FrameStats};
pub use data_structures::geometry::{Rect, Size};
pub use data_structures::style::{EdgeTreatment, Style};
pub use error::{GlassError, Result};
