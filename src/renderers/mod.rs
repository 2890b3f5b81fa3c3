//! Helpers that turn high-level draws into recorded commands.

pub mod batch;
pub mod quad;
