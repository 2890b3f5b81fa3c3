//! Alpha-masked composite of the blurred region over its own background.
//!
//! Only runs when the render object carries a [`Mask`]. The unblurred region
//! is cropped from the capture into a mask-sized buffer, then foreground and
//! background are mixed by the mask's alpha. Each texture gets its own uv
//! rect: the mask is flip aware, the foreground addresses just the region
//! inside its margin.
//!
//! A region partly outside the capture only composites its visible part, so
//! the mask is sampled over the same part.

use crate::{
    backend::Filter,
    commands::UniformData,
    data_structures::{
        geometry::{PixelRect, Rect, UvRect},
        render_object::{Mask, RenderObject},
    },
    error::Result,
    renderers::quad::QuadDraw,
};

use super::{EffectContext, StageOutput};

/// Mask coordinates of `visible`, a part of the region `rect`.
pub fn mask_uv(mask: &Mask, rect: &Rect, visible: &Rect) -> UvRect {
    let uv = visible.normalized_within(rect);
    if mask.flipped {
        uv.flipped_y()
    } else {
        uv
    }
}

#[derive(Debug, Default)]
pub struct MaskCompositor {
    runs: u64,
}

impl MaskCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn run(
        &mut self,
        cx: &mut EffectContext<'_, '_>,
        foreground: &StageOutput,
        object: &RenderObject,
        mask: &Mask,
    ) -> Result<StageOutput> {
        let rect = object.rect();
        let visible = object.visible_rect(cx.frame.capture_size);
        let crop = visible.to_pixels().clamped_to(cx.frame.capture_size);
        if crop.is_empty() || mask.size.is_empty() || !mask.texture.is_valid() {
            log::warn!("mask of render object {:?} skipped", object.id());
            return Ok(*foreground);
        }

        let background = cx.acquire_color(mask.size)?;
        cx.encoder.blit(
            cx.frame.capture,
            background.framebuffer,
            crop,
            PixelRect::of_size(mask.size),
            Filter::Linear,
        );

        let output = cx.acquire_color(mask.size)?;
        let program = cx.shaders.mask;
        let foreground_uv = foreground.content.normalized(foreground.target.size);
        let draw = QuadDraw::new(program.shader, output.framebuffer, mask.size)
            .with_texture(0, mask.texture)
            .with_texture(1, background.texture)
            .with_texture(2, foreground.target.texture);
        cx.quad.draw(
            cx.encoder,
            &draw,
            &[
                (program.mask_uv, UniformData::Vec4(mask_uv(mask, &rect, &visible).as_vec4())),
                (program.background_uv, UniformData::Vec4(UvRect::FULL.as_vec4())),
                (program.foreground_uv, UniformData::Vec4(foreground_uv.as_vec4())),
            ],
        );
        self.runs += 1;

        Ok(StageOutput {
            target: output,
            content: Rect::of_size(mask.size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_structures::geometry::Size, handle::TextureHandle};

    fn mask(flipped: bool) -> Mask {
        Mask {
            texture: TextureHandle::from_raw(1),
            size: Size::new(8, 8),
            flipped,
        }
    }

    #[test]
    fn flipped_masks_sample_bottom_up() {
        let rect = Rect::new(10.0, 10.0, 100.0, 50.0);
        assert_eq!(mask_uv(&mask(false), &rect, &rect), UvRect::FULL);
        assert_eq!(mask_uv(&mask(true), &rect, &rect), UvRect::new(0.0, 1.0, 1.0, 0.0));
    }

    #[test]
    fn clipped_regions_sample_the_visible_part_of_the_mask() {
        let rect = Rect::new(-50.0, 0.0, 100.0, 40.0);
        let visible = Rect::new(0.0, 10.0, 50.0, 30.0);
        assert_eq!(mask_uv(&mask(false), &rect, &visible), UvRect::new(0.5, 0.25, 1.0, 1.0));
        assert_eq!(mask_uv(&mask(true), &rect, &visible), UvRect::new(0.5, 0.75, 1.0, 0.0));
    }
}
