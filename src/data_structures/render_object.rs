//! On-screen blurred regions.
//!
//! A [`RenderObject`] exists for every region the host attached. It owns the
//! region's rectangle in capture pixels together with the derived, downsampled
//! rectangle the effect chain works in. The derived values are recomputed
//! from the rectangle on every change and never edited on their own.

use std::collections::HashMap;

use crate::{
    data_structures::{
        geometry::{Rect, Size},
        style::Style,
    },
    handle::{FramebufferHandle, TextureHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderObjectId(pub u32);

/// An alpha mask shaping the composited region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mask {
    pub texture: TextureHandle,
    pub size: Size,
    /// Contents are stored bottom-up.
    pub flipped: bool,
}

#[derive(Debug, Clone)]
pub struct RenderObject {
    id: RenderObjectId,
    rect: Rect,
    scaled_rect: Rect,
    target_size: Size,
    downsample_factor: u32,
    margin: f32,
    style: Style,
    mask: Option<Mask>,
    z_index: i32,
    destination: FramebufferHandle,
}

impl RenderObject {
    pub fn new(
        id: RenderObjectId,
        rect: Rect,
        style: Style,
        downsample_factor: u32,
        margin: f32,
    ) -> Self {
        let downsample_factor = downsample_factor.max(1);
        let (scaled_rect, target_size) = derive(rect, downsample_factor, margin);
        Self {
            id,
            rect,
            scaled_rect,
            target_size,
            downsample_factor,
            margin,
            style,
            mask: None,
            z_index: 0,
            destination: FramebufferHandle::DEFAULT,
        }
    }

    pub fn id(&self) -> RenderObjectId {
        self.id
    }

    /// Region in capture pixels.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The part of `rect` that lies inside a capture of `bounds`. Every stage
    /// after the crop works on this part only.
    pub fn visible_rect(&self, bounds: Size) -> Rect {
        self.rect.intersect(&Rect::of_size(bounds))
    }

    pub fn downsample_factor(&self) -> u32 {
        self.downsample_factor
    }

    /// `rect` divided by the downsample factor.
    pub fn scaled_rect(&self) -> Rect {
        self.scaled_rect
    }

    /// Size of the preprocessed render target: the scaled rect plus the
    /// scaled preprocess margin on each side.
    pub fn target_size(&self) -> Size {
        self.target_size
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn z_index(&self) -> i32 {
        self.z_index
    }

    pub fn destination(&self) -> FramebufferHandle {
        self.destination
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
        (self.scaled_rect, self.target_size) = derive(rect, self.downsample_factor, self.margin);
    }

    pub fn offset_by(&mut self, dx: f32, dy: f32) {
        self.set_rect(self.rect.offset(dx, dy));
    }

    pub fn set_style(&mut self, style: Style) {
        self.style = style;
    }

    pub fn set_mask(&mut self, mask: Option<Mask>) {
        self.mask = mask;
    }

    pub fn set_z_index(&mut self, z_index: i32) {
        self.z_index = z_index;
    }

    pub fn set_destination(&mut self, destination: FramebufferHandle) {
        self.destination = destination;
    }
}

fn derive(rect: Rect, downsample_factor: u32, margin: f32) -> (Rect, Size) {
    let inverse = 1.0 / downsample_factor as f32;
    let scaled = rect.scaled(inverse);
    let scaled_margin = margin * inverse;
    let target = Size::covering(
        scaled.width + 2.0 * scaled_margin,
        scaled.height + 2.0 * scaled_margin,
    );
    (scaled, Size::new(target.width.max(1), target.height.max(1)))
}

/// The live render objects of one engine, keyed by id.
#[derive(Debug, Default)]
pub struct RenderObjects {
    next_id: u32,
    objects: HashMap<RenderObjectId, RenderObject>,
}

impl RenderObjects {
    pub fn insert(
        &mut self,
        rect: Rect,
        style: Style,
        downsample_factor: u32,
        margin: f32,
    ) -> RenderObjectId {
        self.next_id += 1;
        let id = RenderObjectId(self.next_id);
        self.objects
            .insert(id, RenderObject::new(id, rect, style, downsample_factor, margin));
        id
    }

    pub fn get(&self, id: RenderObjectId) -> Option<&RenderObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: RenderObjectId) -> Option<&mut RenderObject> {
        self.objects.get_mut(&id)
    }

    pub fn remove(&mut self, id: RenderObjectId) -> Option<RenderObject> {
        self.objects.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects in recording order: ascending z-index, then ascending id.
    pub fn ordered(&self) -> Vec<&RenderObject> {
        let mut ordered: Vec<_> = self.objects.values().collect();
        ordered.sort_by_key(|obj| (obj.z_index, obj.id));
        ordered
    }
}
