//! Framebuffers and the per-specification pool.
//!
//! Post-processing needs a handful of intermediate render targets every frame.
//! Instead of allocating them per frame, [`FramebufferManager::acquire`] hands
//! out framebuffers from a bucket keyed by the full
//! [`FramebufferSpecification`]. Within one cycle every acquire returns a
//! distinct framebuffer; [`FramebufferManager::reset_pool_usage`] starts the
//! next cycle and makes all of them available again. Nothing pooled is
//! destroyed before [`FramebufferManager::destroy_all`].

use std::collections::HashMap;

use crate::{
    backend::{GraphicsBackend, NativeId, PixelFormat, TextureDescriptor},
    data_structures::geometry::Size,
    error::{GlassError, Result},
    handle::{FramebufferHandle, FramebufferKind, HandleAllocator, TextureHandle},
    resources::texture::TextureManager,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentSpecification {
    pub format: PixelFormat,
    /// Contents are stored bottom-up.
    pub flipped: bool,
    /// Allocate and sample a mip chain.
    pub mipmap_filtering: bool,
}

impl AttachmentSpecification {
    pub const fn color(format: PixelFormat) -> Self {
        Self {
            format,
            flipped: false,
            mipmap_filtering: false,
        }
    }

    pub const fn with_mipmaps(self) -> Self {
        Self {
            mipmap_filtering: true,
            ..self
        }
    }

    pub const fn flipped(self) -> Self {
        Self {
            flipped: true,
            ..self
        }
    }
}

/// Structural description of a framebuffer and the pool bucket key.
///
/// Two specifications are equal iff size, attachment list (in order) and
/// downsample factor are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferSpecification {
    pub size: Size,
    pub attachments: Vec<AttachmentSpecification>,
    pub downsample_factor: u32,
}

impl FramebufferSpecification {
    /// Single RGBA8 colour attachment, no downsampling.
    pub fn color(size: Size) -> Self {
        Self {
            size,
            attachments: vec![AttachmentSpecification::color(PixelFormat::Rgba8)],
            downsample_factor: 1,
        }
    }

    pub fn with_attachments(self, attachments: Vec<AttachmentSpecification>) -> Self {
        Self {
            attachments,
            ..self
        }
    }

    pub fn with_downsample_factor(self, downsample_factor: u32) -> Self {
        Self {
            downsample_factor: downsample_factor.max(1),
            ..self
        }
    }

    /// Size of the allocated attachments.
    pub fn sampled_size(&self) -> Size {
        self.size.divided_by(self.downsample_factor)
    }
}

#[derive(Debug, Clone)]
pub struct Framebuffer {
    handle: FramebufferHandle,
    native: NativeId,
    spec: FramebufferSpecification,
    color: TextureHandle,
    depth_stencil: Option<TextureHandle>,
    pooled: bool,
}

impl Framebuffer {
    pub fn handle(&self) -> FramebufferHandle {
        self.handle
    }

    pub fn native(&self) -> NativeId {
        self.native
    }

    pub fn spec(&self) -> &FramebufferSpecification {
        &self.spec
    }

    pub fn color_attachment(&self) -> TextureHandle {
        self.color
    }

    pub fn depth_stencil_attachment(&self) -> Option<TextureHandle> {
        self.depth_stencil
    }

    /// Size of the attachments: `size / downsample_factor`.
    pub fn sampled_size(&self) -> Size {
        self.spec.sampled_size()
    }

    pub fn is_flipped(&self) -> bool {
        self.spec
            .attachments
            .iter()
            .find(|a| !a.format.is_depth())
            .is_some_and(|a| a.flipped)
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }
}

#[derive(Debug, Default)]
struct PoolBucket {
    members: Vec<FramebufferHandle>,
    in_use: usize,
}

#[derive(Debug, Default)]
pub struct FramebufferManager {
    handles: HandleAllocator<FramebufferKind>,
    framebuffers: HashMap<FramebufferHandle, Framebuffer>,
    pool: HashMap<FramebufferSpecification, PoolBucket>,
}

impl FramebufferManager {
    /// A framebuffer matching `spec` that has not been handed out this cycle.
    pub fn acquire(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        textures: &mut TextureManager,
        spec: &FramebufferSpecification,
    ) -> Result<FramebufferHandle> {
        if let Some(bucket) = self.pool.get_mut(spec) {
            if bucket.in_use < bucket.members.len() {
                let handle = bucket.members[bucket.in_use];
                bucket.in_use += 1;
                return Ok(handle);
            }
        }

        let handle = self.build(backend, textures, spec.clone(), true)?;
        let bucket = self.pool.entry(spec.clone()).or_default();
        bucket.members.push(handle);
        bucket.in_use += 1;
        log::debug!(
            "pool bucket {:?} grew to {} framebuffers",
            spec.size,
            bucket.members.len()
        );
        Ok(handle)
    }

    /// An unpooled framebuffer owned by the caller until [`Self::destroy`].
    pub fn create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        textures: &mut TextureManager,
        spec: FramebufferSpecification,
    ) -> Result<FramebufferHandle> {
        self.build(backend, textures, spec, false)
    }

    fn build(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        textures: &mut TextureManager,
        spec: FramebufferSpecification,
        pooled: bool,
    ) -> Result<FramebufferHandle> {
        let handle = self.handles.allocate();
        let label = format!("framebuffer {}", handle.raw());
        let (native, color, depth_stencil) = allocate(backend, textures, &label, &spec)?;
        self.framebuffers.insert(
            handle,
            Framebuffer {
                handle,
                native,
                spec,
                color,
                depth_stencil,
                pooled,
            },
        );
        Ok(handle)
    }

    /// Makes every pooled framebuffer available again.
    pub fn reset_pool_usage(&mut self) {
        for bucket in self.pool.values_mut() {
            bucket.in_use = 0;
        }
    }

    /// Clears the colour of every framebuffer to transparent black.
    ///
    /// Rebinds render targets directly on the backend; a command player that
    /// caches state must be reset afterwards.
    pub fn erase_all(&self, backend: &mut dyn GraphicsBackend) {
        for framebuffer in self.framebuffers.values() {
            backend.bind_framebuffer(Some(framebuffer.native));
            backend.clear([0.0; 4]);
        }
    }

    /// Re-creates the attachments of an unpooled framebuffer at `size`.
    ///
    /// Zero sizes, sizes above the device limit and pooled framebuffers are
    /// logged and left untouched.
    pub fn resize(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        textures: &mut TextureManager,
        handle: FramebufferHandle,
        size: Size,
    ) -> Result<()> {
        let max = backend.max_texture_size();
        let Some(framebuffer) = self.framebuffers.get(&handle) else {
            log::error!("resize of unknown framebuffer {:?} ignored", handle);
            return Ok(());
        };
        if framebuffer.pooled {
            log::error!("pooled framebuffer {:?} cannot be resized", handle);
            return Ok(());
        }
        if size.is_empty() || !size.fits_within(max) {
            log::error!(
                "resize of {:?} to {}x{} rejected (device limit {})",
                handle,
                size.width,
                size.height,
                max
            );
            return Ok(());
        }
        if framebuffer.spec.size == size {
            return Ok(());
        }

        let mut spec = framebuffer.spec.clone();
        spec.size = size;
        let label = format!("framebuffer {}", handle.raw());
        let (native, color, depth_stencil) = allocate(backend, textures, &label, &spec)?;

        if let Some(old) = self.framebuffers.remove(&handle) {
            release(backend, textures, &old);
        }
        self.framebuffers.insert(
            handle,
            Framebuffer {
                handle,
                native,
                spec,
                color,
                depth_stencil,
                pooled: false,
            },
        );
        Ok(())
    }

    pub fn get(&self, handle: FramebufferHandle) -> Option<&Framebuffer> {
        self.framebuffers.get(&handle)
    }

    /// Native id for a command target; `None` is the default framebuffer.
    pub fn resolve(&self, handle: FramebufferHandle) -> Result<Option<NativeId>> {
        if handle.is_default() {
            return Ok(None);
        }
        self.framebuffers
            .get(&handle)
            .map(|fb| Some(fb.native))
            .ok_or(GlassError::UnknownHandle {
                kind: "framebuffer",
                id: handle.raw(),
            })
    }

    pub fn color_attachment(&self, handle: FramebufferHandle) -> Option<TextureHandle> {
        self.framebuffers.get(&handle).map(Framebuffer::color_attachment)
    }

    pub fn sampled_size(&self, handle: FramebufferHandle) -> Option<Size> {
        self.framebuffers.get(&handle).map(Framebuffer::sampled_size)
    }

    /// Destroys an unpooled framebuffer; pooled ones only go with `destroy_all`.
    pub fn destroy(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        textures: &mut TextureManager,
        handle: FramebufferHandle,
    ) {
        match self.framebuffers.get(&handle) {
            Some(fb) if fb.pooled => {
                log::warn!("pooled framebuffer {:?} is released by destroy_all only", handle)
            }
            Some(_) => {
                if let Some(fb) = self.framebuffers.remove(&handle) {
                    release(backend, textures, &fb);
                }
            }
            None => log::warn!("destroy of unknown framebuffer {:?} ignored", handle),
        }
    }

    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend, textures: &mut TextureManager) {
        for (_, framebuffer) in self.framebuffers.drain() {
            release(backend, textures, &framebuffer);
        }
        self.pool.clear();
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Number of framebuffers in the bucket of `spec`.
    pub fn bucket_len(&self, spec: &FramebufferSpecification) -> usize {
        self.pool.get(spec).map_or(0, |bucket| bucket.members.len())
    }

    /// Number of framebuffers of the bucket of `spec` handed out this cycle.
    pub fn bucket_in_use(&self, spec: &FramebufferSpecification) -> usize {
        self.pool.get(spec).map_or(0, |bucket| bucket.in_use)
    }
}

fn allocate(
    backend: &mut dyn GraphicsBackend,
    textures: &mut TextureManager,
    label: &str,
    spec: &FramebufferSpecification,
) -> Result<(NativeId, TextureHandle, Option<TextureHandle>)> {
    let incomplete = |reason: String| GlassError::FramebufferIncomplete {
        label: label.to_owned(),
        reason,
    };
    let size = spec.sampled_size();
    let max = backend.max_texture_size();
    if spec.size.is_empty() || !size.fits_within(max) {
        return Err(incomplete(format!(
            "size {}x{} outside 1..={max}",
            size.width, size.height
        )));
    }

    let mut color_spec = None;
    let mut depth_spec = None;
    for attachment in &spec.attachments {
        if attachment.format.is_depth() {
            depth_spec.get_or_insert(*attachment);
        } else if color_spec.is_none() {
            color_spec = Some(*attachment);
        } else {
            log::warn!("{label}: only the first colour attachment is used");
        }
    }
    let color_spec = color_spec.ok_or_else(|| incomplete("no colour attachment".to_owned()))?;

    let color = textures.create(
        backend,
        TextureDescriptor {
            label: format!("{label} colour"),
            size,
            format: color_spec.format,
            mipmaps: color_spec.mipmap_filtering,
        },
    )?;
    let depth_stencil = match depth_spec {
        Some(depth) => Some(textures.create(
            backend,
            TextureDescriptor {
                label: format!("{label} depth"),
                size,
                format: depth.format,
                mipmaps: false,
            },
        )?),
        None => None,
    };

    let color_native = textures.native(color)?;
    let depth_native = match depth_stencil {
        Some(depth) => Some(textures.native(depth)?),
        None => None,
    };
    let native = backend.create_framebuffer(label, color_native, depth_native)?;
    Ok((native, color, depth_stencil))
}

fn release(backend: &mut dyn GraphicsBackend, textures: &mut TextureManager, framebuffer: &Framebuffer) {
    backend.destroy_framebuffer(framebuffer.native);
    textures.destroy(backend, framebuffer.color);
    if let Some(depth) = framebuffer.depth_stencil {
        textures.destroy(backend, depth);
    }
}
