//! The look of one frosted-glass region.

/// Upper bound on blur passes; each pass adds one chain framebuffer.
pub const MAX_BLUR_PASSES: u32 = 5;

/// How the preprocess stage treats the crop boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EdgeTreatment {
    /// Plain anti-aliased downsample.
    #[default]
    AntiAlias,
    /// Anti-aliased downsample plus a desaturating, chromatically aberrated
    /// falloff towards a rounded-rect edge, hiding the crop seam.
    SeamHiding { corner_radius: f32, falloff: f32 },
}

/// Immutable style value.
///
/// Construct with [`Style::default`] and the `with_*` methods, each of which
/// returns a new value.
///
/// ```
/// use flow_glass::data_structures::style::Style;
///
/// let style = Style::default().with_blur_radius(24.0).with_opacity(0.8);
/// assert_eq!(style.passes(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    tint: [f32; 4],
    noise_factor: f32,
    blur_radius: f32,
    passes: u32,
    offset: f32,
    opacity: f32,
    edge_treatment: EdgeTreatment,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            tint: [0.0; 4],
            noise_factor: 0.0,
            blur_radius: 20.0,
            passes: 3,
            offset: 1.5,
            opacity: 1.0,
            edge_treatment: EdgeTreatment::AntiAlias,
        }
    }
}

impl Style {
    /// Straight-alpha tint; the alpha channel is the tint strength.
    pub fn tint(&self) -> [f32; 4] {
        self.tint
    }

    pub fn noise_factor(&self) -> f32 {
        self.noise_factor
    }

    pub fn blur_radius(&self) -> f32 {
        self.blur_radius
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Sample offset of the kawase kernels, in texels.
    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn edge_treatment(&self) -> EdgeTreatment {
        self.edge_treatment
    }

    pub fn with_tint(self, tint: [f32; 4]) -> Self {
        Self {
            tint: tint.map(|c| c.clamp(0.0, 1.0)),
            ..self
        }
    }

    pub fn with_noise_factor(self, noise_factor: f32) -> Self {
        Self {
            noise_factor: noise_factor.clamp(0.0, 1.0),
            ..self
        }
    }

    pub fn with_blur_radius(self, blur_radius: f32) -> Self {
        Self {
            blur_radius: blur_radius.max(0.0),
            ..self
        }
    }

    pub fn with_passes(self, passes: u32) -> Self {
        Self {
            passes: passes.clamp(1, MAX_BLUR_PASSES),
            ..self
        }
    }

    pub fn with_offset(self, offset: f32) -> Self {
        Self {
            offset: offset.max(0.0),
            ..self
        }
    }

    /// Stored as given; the blend stage clamps it.
    pub fn with_opacity(self, opacity: f32) -> Self {
        Self { opacity, ..self }
    }

    pub fn with_edge_treatment(self, edge_treatment: EdgeTreatment) -> Self {
        Self {
            edge_treatment,
            ..self
        }
    }
}
