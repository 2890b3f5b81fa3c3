//! Film grain over the blurred region.
//!
//! The grain is a greyscale texture generated on the CPU from an integer
//! hash, so it is stable from frame to frame. Textures are shared: objects
//! with equal target sizes draw the same one, and a size is generated once
//! and dropped when no chain uses it any more.

use std::collections::HashMap;

use crate::{
    backend::{BlendState, GraphicsBackend},
    context::EngineConfig,
    data_structures::{geometry::Size, style::Style},
    error::Result,
    handle::TextureHandle,
    renderers::quad::QuadDraw,
    resources::Resources,
};

use super::{EffectContext, StageOutput};

const NOISE_SEED: u32 = 0x9e37_79b9;

pub fn is_enabled(style: &Style, config: &EngineConfig) -> bool {
    style.noise_factor() >= config.noise_min_alpha
}

fn hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = x
        .wrapping_mul(0x8da6_b343)
        .wrapping_add(y.wrapping_mul(0xd816_3841))
        .wrapping_add(seed);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^ (h >> 16)
}

/// Opaque RGBA8 grey noise of `size`.
pub fn noise_pixels(size: Size, seed: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(size.width as usize * size.height as usize * 4);
    for y in 0..size.height {
        for x in 0..size.width {
            let value = (hash(x, y, seed) >> 24) as u8;
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

/// Grain textures shared by every chain, one per target size.
#[derive(Debug, Default)]
pub struct NoiseTextures {
    textures: HashMap<Size, TextureHandle>,
}

impl NoiseTextures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn get(&self, size: Size) -> Option<TextureHandle> {
        self.textures.get(&size).copied()
    }

    /// The texture for `size`, generated on first use.
    pub fn acquire(&mut self, backend: &mut dyn GraphicsBackend, resources: &mut Resources, size: Size) -> Result<TextureHandle> {
        if let Some(texture) = self.get(size) {
            return Ok(texture);
        }
        let texture = resources.textures.create_with_pixels(
            backend,
            "noise",
            size,
            &noise_pixels(size, NOISE_SEED),
        )?;
        log::debug!("generated {}x{} noise texture", size.width, size.height);
        self.textures.insert(size, texture);
        Ok(texture)
    }

    /// Destroys every texture whose size fails `keep`.
    pub fn retain(&mut self, backend: &mut dyn GraphicsBackend, resources: &mut Resources, keep: impl Fn(&Size) -> bool) {
        self.textures.retain(|size, texture| {
            if keep(size) {
                return true;
            }
            resources.textures.destroy(backend, *texture);
            log::debug!("dropped {}x{} noise texture", size.width, size.height);
            false
        });
    }

    pub fn dispose_all(&mut self, backend: &mut dyn GraphicsBackend, resources: &mut Resources) {
        self.retain(backend, resources, |_| false);
    }
}

/// The grain stage of one chain.
#[derive(Debug, Default)]
pub struct Noise {
    last: Option<(TextureHandle, Size)>,
}

impl Noise {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texture drawn by the last run.
    pub fn texture(&self) -> Option<TextureHandle> {
        self.last.map(|(texture, _)| texture)
    }

    /// Target size of the last run.
    pub fn size(&self) -> Option<Size> {
        self.last.map(|(_, size)| size)
    }

    /// Forgets the last run, e.g. once grain was switched off.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Draws the grain straight onto `input` at `alpha` and returns it.
    pub fn run(
        &mut self,
        cx: &mut EffectContext<'_, '_>,
        textures: &mut NoiseTextures,
        input: &StageOutput,
        alpha: f32,
    ) -> Result<StageOutput> {
        let size = input.target.size;
        let texture = textures.acquire(cx.backend, cx.resources, size)?;
        self.last = Some((texture, size));
        let draw = QuadDraw::new(cx.shaders.copy, input.target.framebuffer, size)
            .with_texture(0, texture)
            .with_alpha(alpha.clamp(0.0, 1.0))
            .with_blend(BlendState::ALPHA);
        cx.quad.draw(cx.encoder, &draw, &[]);
        Ok(*input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic_and_opaque() {
        let size = Size::new(16, 8);
        let a = noise_pixels(size, NOISE_SEED);
        let b = noise_pixels(size, NOISE_SEED);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16 * 8 * 4);
        assert!(a.chunks_exact(4).all(|p| p[0] == p[1] && p[1] == p[2] && p[3] == 255));
        assert_ne!(a, noise_pixels(size, NOISE_SEED + 1));
    }

    #[test]
    fn noise_threshold() {
        let config = EngineConfig::default();
        assert!(!is_enabled(&Style::default().with_noise_factor(0.04), &config));
        assert!(is_enabled(&Style::default().with_noise_factor(0.05), &config));
    }
}
