//! Sizes, rectangles and the sizing rules shared by pooling and the blur chain.
//!
//! All pixel-space coordinates use a top-left origin. UV rectangles are
//! normalised against the size of the texture they address; a texture whose
//! contents are stored bottom-up is handled by [`UvRect::flipped_y`].

/// Integer extent of a texture or framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest integer size that covers `width x height`.
    pub fn covering(width: f32, height: f32) -> Self {
        Self::new(width.max(0.0).ceil() as u32, height.max(0.0).ceil() as u32)
    }

    /// Integer division by a downsample factor, never below 1x1.
    pub fn divided_by(&self, factor: u32) -> Self {
        let factor = factor.max(1);
        Self::new((self.width / factor).max(1), (self.height / factor).max(1))
    }

    pub fn as_vec2(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }

    pub fn fits_within(&self, max_dimension: u32) -> bool {
        self.width <= max_dimension && self.height <= max_dimension
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

/// Floating point rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs())
    }

    pub fn of_size(size: Size) -> Self {
        Self::new(0.0, 0.0, size.width as f32, size.height as f32)
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    /// Non-uniform scale, e.g. from capture into destination pixels.
    pub fn scaled_xy(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Intersection with `other`, empty (zero sized) when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Self {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        if x1 <= x0 || y1 <= y0 {
            return Self::new(x0, y0, 0.0, 0.0);
        }
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Grows every side by up to `margin`, clamped to `0..bounds`.
    pub fn extended_within(&self, margin: f32, bounds: Size) -> Self {
        let x0 = (self.x - margin).max(0.0);
        let y0 = (self.y - margin).max(0.0);
        let x1 = (self.max_x() + margin).min(bounds.width as f32);
        let y1 = (self.max_y() + margin).min(bounds.height as f32);
        Self::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    /// Snaps outwards to whole pixels.
    pub fn to_pixels(&self) -> PixelRect {
        let x0 = self.x.floor() as i32;
        let y0 = self.y.floor() as i32;
        let x1 = self.max_x().ceil() as i32;
        let y1 = self.max_y().ceil() as i32;
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// This rectangle expressed as texture coordinates of a texture of `size`.
    pub fn normalized(&self, size: Size) -> UvRect {
        let w = size.width.max(1) as f32;
        let h = size.height.max(1) as f32;
        UvRect::new(
            self.x / w,
            self.y / h,
            self.max_x() / w,
            self.max_y() / h,
        )
    }

    /// Where this rectangle lies inside `outer`, as texture coordinates of a
    /// texture covering `outer`.
    pub fn normalized_within(&self, outer: &Rect) -> UvRect {
        if outer.is_empty() {
            return UvRect::FULL;
        }
        UvRect::new(
            (self.x - outer.x) / outer.width,
            (self.y - outer.y) / outer.height,
            (self.max_x() - outer.x) / outer.width,
            (self.max_y() - outer.y) / outer.height,
        )
    }
}

/// Integer rectangle used for viewports and blit regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

pub type Viewport = PixelRect;

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn of_size(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Clips against `0..bounds`.
    pub fn clamped_to(&self, bounds: Size) -> Self {
        let x0 = self.x.clamp(0, bounds.width as i32);
        let y0 = self.y.clamp(0, bounds.height as i32);
        let x1 = (self.x + self.width).clamp(0, bounds.width as i32);
        let y1 = (self.y + self.height).clamp(0, bounds.height as i32);
        Self::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

/// Texture coordinate rectangle: `(u0, v0)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvRect {
    pub const FULL: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(u0: f32, v0: f32, u1: f32, v1: f32) -> Self {
        Self { u0, v0, u1, v1 }
    }

    /// Same region addressed in a texture stored bottom-up.
    pub fn flipped_y(&self) -> Self {
        Self::new(self.u0, 1.0 - self.v0, self.u1, 1.0 - self.v1)
    }

    pub fn as_vec4(&self) -> [f32; 4] {
        [self.u0, self.v0, self.u1, self.v1]
    }
}

impl Default for UvRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Rounds `value` up to the next multiple of four, never below four.
///
/// Blur chain framebuffers keep dimensions divisible by four so that every
/// downsample step lands on whole texels.
pub fn round_up_to_multiple_of_4(value: f32) -> u32 {
    let quads = (value.max(0.0) / 4.0).ceil() as u32;
    (quads * 4).max(4)
}

/// Sizes of the `passes + 1` framebuffers of a dual blur chain.
///
/// `chain[0]` is `base`; every following entry scales the previous one by
/// `scale` and rounds each dimension up to a multiple of four.
pub fn blur_chain_sizes(base: Size, passes: u32, scale: f32) -> Vec<Size> {
    let mut chain = Vec::with_capacity(passes as usize + 1);
    chain.push(base);
    for _ in 0..passes {
        let prev = chain[chain.len() - 1];
        chain.push(Size::new(
            round_up_to_multiple_of_4(prev.width as f32 * scale),
            round_up_to_multiple_of_4(prev.height as f32 * scale),
        ));
    }
    chain
}

/// Places `content` inside `target`: uniform scale, centred, never above 1x.
///
/// Returns the destination rectangle in target pixels and the applied scale.
pub fn fit_centered(content_width: f32, content_height: f32, target: Size) -> (Rect, f32) {
    if content_width <= 0.0 || content_height <= 0.0 || target.is_empty() {
        return (Rect::of_size(target), 1.0);
    }
    let scale = (target.width as f32 / content_width)
        .min(target.height as f32 / content_height)
        .min(1.0);
    let width = content_width * scale;
    let height = content_height * scale;
    let x = (target.width as f32 - width) * 0.5;
    let y = (target.height as f32 - height) * 0.5;
    (Rect::new(x, y, width, height), scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_multiples_of_four() {
        assert_eq!(round_up_to_multiple_of_4(0.0), 4);
        assert_eq!(round_up_to_multiple_of_4(4.0), 4);
        assert_eq!(round_up_to_multiple_of_4(4.1), 8);
        assert_eq!(round_up_to_multiple_of_4(133.66), 136);
    }

    #[test]
    fn extension_is_clamped_to_bounds() {
        let rect = Rect::new(5.0, 100.0, 50.0, 50.0);
        let ext = rect.extended_within(20.0, Size::new(160, 400));
        assert_eq!(ext, Rect::new(0.0, 80.0, 75.0, 90.0));
    }

    #[test]
    fn fit_never_upscales() {
        let (placed, scale) = fit_centered(10.0, 10.0, Size::new(40, 20));
        assert_eq!(scale, 1.0);
        assert_eq!(placed, Rect::new(15.0, 5.0, 10.0, 10.0));

        let (placed, scale) = fit_centered(200.0, 100.0, Size::new(50, 50));
        assert_eq!(scale, 0.25);
        assert_eq!(placed, Rect::new(0.0, 12.5, 50.0, 25.0));
    }

    #[test]
    fn normalisation_uses_texture_size() {
        let uv = Rect::new(10.0, 20.0, 30.0, 40.0).normalized(Size::new(100, 200));
        assert_eq!(uv, UvRect::new(0.1, 0.1, 0.4, 0.3));
        assert_eq!(uv.flipped_y(), UvRect::new(0.1, 0.9, 0.4, 0.7));
    }

    #[test]
    fn visible_part_of_a_region_as_uv() {
        let region = Rect::new(-100.0, 100.0, 200.0, 100.0);
        let visible = region.intersect(&Rect::of_size(Size::new(1000, 600)));
        assert_eq!(visible.normalized_within(&region), UvRect::new(0.5, 0.0, 1.0, 1.0));
        assert_eq!(region.normalized_within(&region), UvRect::FULL);
    }
}
