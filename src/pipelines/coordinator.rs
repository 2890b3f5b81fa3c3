//! Per render object effect chains.
//!
//! A chain is created the first time an object is rendered. Detached objects
//! are only marked; their chains are disposed at the start of the next frame,
//! after which nothing refers to the resources of the old frame any more.
//! Grain textures are owned here and shared by all chains.

use std::collections::{HashMap, HashSet};

use crate::{
    backend::GraphicsBackend,
    data_structures::render_object::{RenderObject, RenderObjectId},
    error::Result,
    resources::Resources,
};

use super::{
    blend::{Blend, BlendPath},
    blur::{self, Blur},
    mask::MaskCompositor,
    noise::{self, Noise, NoiseTextures},
    preprocess::PreProcess,
    EffectContext, StageOutput,
};

#[derive(Debug, Default)]
pub struct EffectChain {
    pub preprocess: PreProcess,
    pub blur: Blur,
    pub noise: Noise,
    pub mask: MaskCompositor,
    pub blend: Blend,
}

/// What one object's chain did this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub blurred: bool,
    pub noise: bool,
    pub masked: bool,
    pub blend: BlendPath,
}

/// The output the blend stage composites: mask output if masked, else noise
/// output if grain was drawn, else the blur output.
pub fn select_output(blur: StageOutput, noise: Option<StageOutput>, mask: Option<StageOutput>) -> StageOutput {
    mask.or(noise).unwrap_or(blur)
}

#[derive(Debug, Default)]
pub struct EffectCoordinator {
    chains: HashMap<RenderObjectId, EffectChain>,
    retired: Vec<RenderObjectId>,
    noise: NoiseTextures,
}

impl EffectCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn contains(&self, id: RenderObjectId) -> bool {
        self.chains.contains_key(&id)
    }

    pub fn chain(&self, id: RenderObjectId) -> Option<&EffectChain> {
        self.chains.get(&id)
    }

    pub fn noise_textures(&self) -> &NoiseTextures {
        &self.noise
    }

    /// Schedules the chain of a detached object for disposal.
    pub fn retire(&mut self, id: RenderObjectId) {
        if self.chains.contains_key(&id) && !self.retired.contains(&id) {
            self.retired.push(id);
        }
    }

    pub fn pending_disposal(&self) -> usize {
        self.retired.len()
    }

    pub fn dispose_retired(&mut self, backend: &mut dyn GraphicsBackend, resources: &mut Resources) {
        for id in self.retired.drain(..) {
            if self.chains.remove(&id).is_some() {
                log::debug!("disposed effect chain of {:?}", id);
            }
        }
    }

    /// Destroys grain textures whose size no chain drew at its last run.
    /// Only safe between frames, once recorded draws were played.
    pub fn evict_unused_noise(&mut self, backend: &mut dyn GraphicsBackend, resources: &mut Resources) {
        let used: HashSet<_> = self.chains.values().filter_map(|chain| chain.noise.size()).collect();
        self.noise.retain(backend, resources, |size| used.contains(size));
    }

    pub fn dispose_all(&mut self, backend: &mut dyn GraphicsBackend, resources: &mut Resources) {
        self.retired.clear();
        self.chains.clear();
        self.noise.dispose_all(backend, resources);
    }

    /// Records preprocess, blur, noise, mask and blend for `object`.
    /// Returns `None` if the object lies outside the capture.
    pub fn render(&mut self, cx: &mut EffectContext<'_, '_>, object: &RenderObject) -> Result<Option<ChainReport>> {
        let chain = self.chains.entry(object.id()).or_insert_with(|| {
            log::debug!("created effect chain for {:?}", object.id());
            EffectChain::default()
        });
        let style = *object.style();

        let Some(preprocessed) = chain.preprocess.run(cx, object)? else {
            return Ok(None);
        };
        let blurred = chain.blur.run(cx, &preprocessed, &style)?;

        let noise = if noise::is_enabled(&style, cx.config) {
            Some(chain.noise.run(cx, &mut self.noise, &blurred, style.noise_factor())?)
        } else {
            chain.noise.reset();
            None
        };

        let current = select_output(blurred, noise, None);
        let masked = match object.mask() {
            Some(mask) => Some(chain.mask.run(cx, &current, object, mask)?),
            None => None,
        };

        let output = select_output(blurred, noise, masked);
        let blend = chain.blend.run(cx, &output, object)?;

        Ok(Some(ChainReport {
            blurred: blur::is_enabled(&style, cx.config),
            noise: noise.is_some(),
            masked: masked.is_some(),
            blend,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        commands::encoder::ChainLink,
        data_structures::geometry::{Rect, Size},
        handle::{FramebufferHandle, TextureHandle},
    };

    fn output(id: i32) -> StageOutput {
        StageOutput {
            target: ChainLink {
                framebuffer: FramebufferHandle::from_raw(id),
                texture: TextureHandle::from_raw(id),
                size: Size::new(4, 4),
            },
            content: Rect::new(0.0, 0.0, 4.0, 4.0),
        }
    }

    #[test]
    fn output_priority_is_mask_then_noise_then_blur() {
        assert_eq!(select_output(output(1), None, None), output(1));
        assert_eq!(select_output(output(1), Some(output(2)), None), output(2));
        assert_eq!(select_output(output(1), Some(output(2)), Some(output(3))), output(3));
        assert_eq!(select_output(output(1), None, Some(output(3))), output(3));
    }
}
