//! Crop and anti-aliased downsample of the capture.
//!
//! The region is grown by the configured margin (clamped to the capture) so
//! the blur kernels have real pixels to read at the border. That crop is
//! blitted into a mipmapped framebuffer and drawn into the region's target
//! with the 8-tap kernel, fitted centred and never magnified.
//!
//! Regions reaching past the capture only keep their visible part. The target
//! then shrinks to what the crop holds after downsampling, which also keeps
//! oversized regions within the texture size limit.

use crate::{
    backend::Filter,
    commands::UniformData,
    data_structures::{
        geometry::{fit_centered, PixelRect, Rect, Size},
        render_object::RenderObject,
        style::EdgeTreatment,
    },
    error::Result,
    renderers::quad::QuadDraw,
};

use super::{EffectContext, StageOutput};

/// Mip level the kernel samples for a given minification.
///
/// The taps already cover two destination texels, so one level less than the
/// full reduction keeps the kernel sharp.
pub fn sample_lod(scale: f32) -> f32 {
    if scale <= 0.0 {
        return 0.0;
    }
    ((1.0 / scale).log2() - 1.0).max(0.0)
}

/// Size of the preprocess target for a crop of `crop` capture pixels.
///
/// Never larger than the object's own target, than the crop after
/// downsampling, or than `max_texture_size`.
pub fn target_size_for(object: &RenderObject, crop: Size, max_texture_size: u32) -> Size {
    let factor = object.downsample_factor() as f32;
    let cropped = Size::covering(crop.width as f32 / factor, crop.height as f32 / factor);
    let wanted = object.target_size();
    let limit = max_texture_size.max(1);
    Size::new(
        wanted.width.min(cropped.width).min(limit).max(1),
        wanted.height.min(cropped.height).min(limit).max(1),
    )
}

#[derive(Debug, Default)]
pub struct PreProcess {
    last_crop: Option<PixelRect>,
}

impl PreProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture pixels read by the last run.
    pub fn last_crop(&self) -> Option<PixelRect> {
        self.last_crop
    }

    /// Returns `None` when the region does not overlap the capture.
    pub fn run(&mut self, cx: &mut EffectContext<'_, '_>, object: &RenderObject) -> Result<Option<StageOutput>> {
        let bounds = cx.frame.capture_size;
        let visible = object.visible_rect(bounds);
        let extended = object.rect().extended_within(cx.config.preprocess_margin, bounds);
        let crop = extended.to_pixels().clamped_to(bounds);
        if crop.is_empty() || visible.is_empty() {
            log::debug!("render object {:?} is outside the capture", object.id());
            self.last_crop = None;
            return Ok(None);
        }
        if self.last_crop != Some(crop) {
            log::debug!("render object {:?} crops {:?}", object.id(), crop);
            self.last_crop = Some(crop);
        }
        let crop_rect = crop.to_rect();
        let crop_size = Size::new(crop.width as u32, crop.height as u32);

        let mipmapped = cx.acquire_mipmapped(crop_size)?;
        cx.encoder.blit(
            cx.frame.capture,
            mipmapped.framebuffer,
            crop,
            PixelRect::of_size(crop_size),
            Filter::Linear,
        );
        cx.encoder.generate_mipmap(mipmapped.texture);

        let target_size = target_size_for(object, crop_size, cx.backend.max_texture_size());
        if target_size != object.target_size() {
            log::debug!(
                "render object {:?} preprocesses into {}x{} instead of {}x{}",
                object.id(),
                target_size.width,
                target_size.height,
                object.target_size().width,
                object.target_size().height
            );
        }
        let output = cx.acquire_color(target_size)?;
        cx.encoder.set_render_target(output.framebuffer);
        cx.encoder.set_viewport(PixelRect::of_size(target_size));
        cx.encoder.clear([0.0; 4]);

        let (fitted, scale) = fit_centered(crop_rect.width, crop_rect.height, target_size);
        let viewport = fitted.to_pixels().clamped_to(target_size);
        let texel_size = UniformData::Vec2([
            1.0 / viewport.width.max(1) as f32,
            1.0 / viewport.height.max(1) as f32,
        ]);
        let lod = UniformData::Float(sample_lod(scale));
        let draw = QuadDraw::new(cx.shaders.preprocess.shader, output.framebuffer, target_size)
            .with_viewport(viewport)
            .with_texture(0, mipmapped.texture);

        match object.style().edge_treatment() {
            EdgeTreatment::AntiAlias => {
                let program = cx.shaders.preprocess;
                cx.quad.draw(
                    cx.encoder,
                    &draw,
                    &[(program.texel_size, texel_size), (program.lod, lod)],
                );
            }
            EdgeTreatment::SeamHiding {
                corner_radius,
                falloff,
            } => {
                let program = cx.shaders.seam_hiding;
                cx.quad.draw(
                    cx.encoder,
                    &QuadDraw {
                        shader: program.shader,
                        ..draw
                    },
                    &[
                        (program.texel_size, texel_size),
                        (program.lod, lod),
                        (program.corner_radius, UniformData::Float(corner_radius * scale)),
                        (
                            program.rect_size,
                            UniformData::Vec2([viewport.width as f32, viewport.height as f32]),
                        ),
                        (program.falloff, UniformData::Float(falloff * scale)),
                    ],
                );
            }
        }

        // where the visible region landed inside the fitted crop
        let content = Rect::new(
            fitted.x + (visible.x - crop_rect.x) * scale,
            fitted.y + (visible.y - crop_rect.y) * scale,
            visible.width * scale,
            visible.height * scale,
        )
        .intersect(&fitted);

        Ok(Some(StageOutput {
            target: output,
            content,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{render_object::RenderObjectId, style::Style};

    fn object(rect: Rect) -> RenderObject {
        RenderObject::new(RenderObjectId(1), rect, Style::default(), 4, 20.0)
    }

    #[test]
    fn lod_follows_minification() {
        assert_eq!(sample_lod(1.0), 0.0);
        assert_eq!(sample_lod(0.5), 0.0);
        assert!((sample_lod(0.25) - 1.0).abs() < 1e-6);
        assert!((sample_lod(0.125) - 2.0).abs() < 1e-6);
        assert_eq!(sample_lod(0.0), 0.0);
    }

    #[test]
    fn inside_regions_keep_their_target() {
        let region = object(Rect::new(100.0, 100.0, 200.0, 150.0));
        let target = target_size_for(&region, Size::new(240, 190), 8192);
        assert_eq!(target, region.target_size());
        assert_eq!(target, Size::new(60, 48));
    }

    #[test]
    fn clipped_regions_shrink_to_their_crop() {
        let region = object(Rect::new(-100.0, 100.0, 200.0, 150.0));
        assert_eq!(target_size_for(&region, Size::new(120, 190), 8192), Size::new(30, 48));
    }

    #[test]
    fn oversized_regions_fit_the_texture_limit() {
        let region = object(Rect::new(-20000.0, 100.0, 45000.0, 100.0));
        assert!(region.target_size().width > 8192);
        let target = target_size_for(&region, Size::new(1000, 140), 8192);
        assert_eq!(target, Size::new(250, 35));
        assert_eq!(target_size_for(&region, Size::new(1000, 140), 64), Size::new(64, 35));
    }
}
