//! Final composite into the destination.
//!
//! The clamped opacity picks exactly one path: nearly transparent regions
//! show the plain background, nearly opaque ones the processed foreground,
//! both by blit. In between the background is drawn first and the foreground
//! is alpha blended over it.
//!
//! Only the part of the region inside the capture is composited, matching
//! what the preprocess stage cropped.

use crate::{
    backend::{BlendState, Filter},
    context::EngineConfig,
    data_structures::{geometry::Size, render_object::RenderObject},
    error::{GlassError, Result},
    handle::FramebufferHandle,
    renderers::quad::QuadDraw,
};

use super::{EffectContext, StageOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendPath {
    BackgroundOnly,
    Blended,
    ForegroundOnly,
}

/// `opacity` is clamped to `[0, 1]` first.
pub fn select_path(opacity: f32, config: &EngineConfig) -> BlendPath {
    let opacity = if opacity.is_nan() { 0.0 } else { opacity.clamp(0.0, 1.0) };
    if opacity < config.blend_background_below {
        BlendPath::BackgroundOnly
    } else if opacity > config.blend_foreground_above {
        BlendPath::ForegroundOnly
    } else {
        BlendPath::Blended
    }
}

#[derive(Debug, Default)]
pub struct Blend {
    last_path: Option<BlendPath>,
}

impl Blend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_path(&self) -> Option<BlendPath> {
        self.last_path
    }

    fn destination_size(cx: &EffectContext<'_, '_>, destination: FramebufferHandle) -> Result<Size> {
        if destination.is_default() {
            return Ok(cx.frame.destination_size);
        }
        cx.resources
            .framebuffers
            .sampled_size(destination)
            .ok_or(GlassError::UnknownHandle {
                kind: "framebuffer",
                id: destination.raw(),
            })
    }

    pub fn run(&mut self, cx: &mut EffectContext<'_, '_>, foreground: &StageOutput, object: &RenderObject) -> Result<BlendPath> {
        let destination = object.destination();
        let destination_size = Self::destination_size(cx, destination)?;
        let (sx, sy) = cx.frame.scale_to(destination_size);
        let rect = object.visible_rect(cx.frame.capture_size);
        let target = rect.scaled_xy(sx, sy).to_pixels();
        let capture = cx.frame.capture;
        let path = select_path(object.style().opacity(), cx.config);

        match path {
            BlendPath::BackgroundOnly => {
                cx.encoder
                    .blit(capture, destination, rect.to_pixels(), target, Filter::Linear);
            }
            BlendPath::ForegroundOnly => {
                cx.encoder.blit(
                    foreground.target.framebuffer,
                    destination,
                    foreground.content.to_pixels(),
                    target,
                    Filter::Linear,
                );
            }
            BlendPath::Blended => {
                let capture_texture = cx
                    .resources
                    .framebuffers
                    .color_attachment(capture)
                    .ok_or(GlassError::UnknownHandle {
                        kind: "framebuffer",
                        id: capture.raw(),
                    })?;
                let mut background_uv = rect.normalized(cx.frame.capture_size);
                if cx.is_flipped(capture) {
                    background_uv = background_uv.flipped_y();
                }
                let viewport = target.clamped_to(destination_size);
                let copy = cx.shaders.copy;

                cx.quad.draw(
                    cx.encoder,
                    &QuadDraw::new(copy, destination, destination_size)
                        .with_viewport(viewport)
                        .with_texture(0, capture_texture)
                        .with_uv_rect(background_uv),
                    &[],
                );
                cx.quad.draw(
                    cx.encoder,
                    &QuadDraw::new(copy, destination, destination_size)
                        .with_viewport(viewport)
                        .with_texture(0, foreground.target.texture)
                        .with_uv_rect(foreground.content.normalized(foreground.target.size))
                        .with_alpha(object.style().opacity().clamp(0.0, 1.0))
                        .with_blend(BlendState::ALPHA),
                    &[],
                );
            }
        }

        if self.last_path != Some(path) {
            log::debug!("render object {:?} blends {:?}", object.id(), path);
            self.last_path = Some(path);
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_exclusive() {
        let config = EngineConfig::default();
        let paths: Vec<_> = [0.0, 0.05, 0.5, 0.97, 1.0]
            .into_iter()
            .map(|opacity| select_path(opacity, &config))
            .collect();
        assert_eq!(
            paths,
            vec![
                BlendPath::BackgroundOnly,
                BlendPath::BackgroundOnly,
                BlendPath::Blended,
                BlendPath::ForegroundOnly,
                BlendPath::ForegroundOnly,
            ]
        );
    }

    #[test]
    fn thresholds_are_inclusive_for_blending() {
        let config = EngineConfig::default();
        assert_eq!(select_path(0.1, &config), BlendPath::Blended);
        assert_eq!(select_path(0.95, &config), BlendPath::Blended);
        assert_eq!(select_path(-3.0, &config), BlendPath::BackgroundOnly);
        assert_eq!(select_path(7.0, &config), BlendPath::ForegroundOnly);
        assert_eq!(select_path(f32::NAN, &config), BlendPath::BackgroundOnly);
    }
}
