//! Host overlay batching.
//!
//! Hosts can draw plain textured quads on top of the composited frame. They
//! hand the engine an [`Overlay`] tree; at record time it is flattened into
//! two lists: opaque quads, grouped by shader and then texture so consecutive
//! draws share state, and transparent quads, drawn afterwards in ascending
//! `z_index` with alpha blending. The player replays exactly that order.

use crate::{
    backend::BlendState,
    commands::encoder::CommandEncoder,
    data_structures::geometry::{Rect, Size},
    handle::{FramebufferHandle, ShaderProgramHandle, TextureHandle},
    renderers::quad::{QuadDraw, QuadRenderer},
};

/// One overlay quad in destination pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayQuad {
    pub shader: ShaderProgramHandle,
    pub texture: TextureHandle,
    pub rect: Rect,
    pub z_index: i32,
    pub alpha: f32,
}

/// What a host wants drawn this frame.
///
/// - `None` draws nothing
/// - `Opaque` / `Opaques` draw without blending
/// - `Transparent` / `Transparents` are blended back to front
/// - `Composed` nests any of the above
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Overlay {
    #[default]
    None,
    Opaque(OverlayQuad),
    Opaques(Vec<OverlayQuad>),
    Transparent(OverlayQuad),
    Transparents(Vec<OverlayQuad>),
    Composed(Vec<Overlay>),
}

impl Overlay {
    fn sort_into(self, opaque: &mut Vec<OverlayQuad>, transparent: &mut Vec<OverlayQuad>) {
        match self {
            Overlay::Opaque(quad) => opaque.push(quad),
            Overlay::Opaques(mut quads) => opaque.append(&mut quads),
            Overlay::Transparent(quad) => transparent.push(quad),
            Overlay::Transparents(mut quads) => transparent.append(&mut quads),
            Overlay::Composed(overlays) => overlays
                .into_iter()
                .for_each(|overlay| overlay.sort_into(opaque, transparent)),
            Overlay::None => (),
        }
    }
}

/// Counters of one [`BatchRenderer::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Runs of opaque quads sharing shader and texture.
    pub opaque_batches: usize,
    pub opaque_draws: usize,
    pub transparent_draws: usize,
}

#[derive(Debug, Default)]
pub struct BatchRenderer {
    opaque: Vec<OverlayQuad>,
    transparent: Vec<OverlayQuad>,
}

impl BatchRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, overlay: Overlay) {
        overlay.sort_into(&mut self.opaque, &mut self.transparent);
    }

    pub fn pending(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    /// Records every submitted quad into `target` and empties the batch.
    pub fn flush(
        &mut self,
        encoder: &mut CommandEncoder<'_>,
        quad: &mut QuadRenderer,
        target: FramebufferHandle,
        target_size: Size,
    ) -> BatchStats {
        let mut stats = BatchStats::default();

        self.opaque.sort_by_key(|q| (q.shader, q.texture));
        let mut previous = None;
        for overlay in self.opaque.drain(..) {
            let key = (overlay.shader, overlay.texture);
            if previous != Some(key) {
                stats.opaque_batches += 1;
                previous = Some(key);
            }
            quad.draw(encoder, &draw_for(&overlay, target, target_size, BlendState::DISABLED), &[]);
            stats.opaque_draws += 1;
        }

        // stable: equal z keeps submission order
        self.transparent.sort_by_key(|q| q.z_index);
        for overlay in self.transparent.drain(..) {
            quad.draw(encoder, &draw_for(&overlay, target, target_size, BlendState::ALPHA), &[]);
            stats.transparent_draws += 1;
        }

        if stats != BatchStats::default() {
            log::debug!("overlay batch: {:?}", stats);
        }
        stats
    }
}

fn draw_for(overlay: &OverlayQuad, target: FramebufferHandle, target_size: Size, blend: BlendState) -> QuadDraw {
    QuadDraw::new(overlay.shader, target, target_size)
        .with_viewport(overlay.rect.to_pixels().clamped_to(target_size))
        .with_texture(0, overlay.texture)
        .with_alpha(overlay.alpha)
        .with_blend(blend)
}
