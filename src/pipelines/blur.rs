//! Dual kawase blur.
//!
//! Above the enable radius the input is copied into `chain[0]`, walked down
//! through `passes` ever smaller framebuffers and back up, the last upsample
//! writing the output and applying the tint. At or below the enable radius
//! the input is copied to the output unchanged.

use crate::{
    commands::encoder::DualBlurPlan,
    context::EngineConfig,
    data_structures::{
        geometry::{blur_chain_sizes, Size},
        style::Style,
    },
    error::Result,
};

use super::{EffectContext, StageOutput};

pub fn is_enabled(style: &Style, config: &EngineConfig) -> bool {
    style.blur_radius() > config.blur_enable_radius
}

#[derive(Debug, Default)]
pub struct Blur {
    chain: Option<(Size, u32, Vec<Size>)>,
}

impl Blur {
    pub fn new() -> Self {
        Self::default()
    }

    /// Framebuffer sizes for `base` and `passes`, recomputed only when either
    /// changes.
    pub fn chain_sizes(&mut self, base: Size, passes: u32, scale: f32) -> &[Size] {
        let stale = !matches!(&self.chain, Some((b, p, _)) if *b == base && *p == passes);
        if stale {
            self.chain = Some((base, passes, blur_chain_sizes(base, passes, scale)));
        }
        match &self.chain {
            Some((_, _, sizes)) => sizes,
            None => &[],
        }
    }

    pub fn run(&mut self, cx: &mut EffectContext<'_, '_>, input: &StageOutput, style: &Style) -> Result<StageOutput> {
        let output = cx.acquire_color(input.target.size)?;
        if !is_enabled(style, cx.config) {
            cx.encoder
                .blit_full(input.target.framebuffer, input.target.size, output.framebuffer, output.size);
            return Ok(StageOutput {
                target: output,
                content: input.content,
            });
        }

        let passes = style.passes().min(cx.config.max_blur_passes).max(1);
        let sizes = self
            .chain_sizes(input.target.size, passes, cx.config.blur_scale)
            .to_vec();
        let mut chain = Vec::with_capacity(sizes.len());
        for size in sizes {
            chain.push(cx.acquire_color(size)?);
        }

        cx.encoder
            .blit_full(input.target.framebuffer, input.target.size, chain[0].framebuffer, chain[0].size);
        let plan = DualBlurPlan {
            chain: &chain,
            output,
            down: cx.shaders.blur_down,
            up: cx.shaders.blur_up,
            offset: style.offset(),
            tint: style.tint(),
        };
        cx.encoder.encode_dual_blur(cx.quad, &plan);

        Ok(StageOutput {
            target: output,
            content: input.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_threshold_is_exclusive() {
        let config = EngineConfig::default();
        assert!(!is_enabled(&Style::default().with_blur_radius(1.0), &config));
        assert!(!is_enabled(&Style::default().with_blur_radius(2.0), &config));
        assert!(is_enabled(&Style::default().with_blur_radius(2.5), &config));
    }

    #[test]
    fn chain_is_cached_per_base_and_passes() {
        let mut blur = Blur::new();
        let first = blur.chain_sizes(Size::new(60, 48), 3, 0.67).to_vec();
        assert_eq!(first.len(), 4);
        assert_eq!(first[0], Size::new(60, 48));
        assert_eq!(first[1], Size::new(44, 36));

        let again = blur.chain_sizes(Size::new(60, 48), 3, 0.67).to_vec();
        assert_eq!(first, again);
        assert_eq!(blur.chain_sizes(Size::new(60, 48), 2, 0.67).len(), 3);
    }
}
