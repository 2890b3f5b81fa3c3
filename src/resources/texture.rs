use std::collections::HashMap;

use crate::{
    backend::{GraphicsBackend, NativeId, PixelFormat, TextureDescriptor},
    data_structures::geometry::Size,
    error::{GlassError, Result},
    handle::{HandleAllocator, TextureHandle, TextureKind},
};

/// A texture known to the engine: its native id plus the descriptor it was
/// created from.
#[derive(Debug, Clone)]
pub struct Texture {
    native: NativeId,
    desc: TextureDescriptor,
}

impl Texture {
    pub fn native(&self) -> NativeId {
        self.native
    }

    pub fn size(&self) -> Size {
        self.desc.size
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    pub fn has_mipmaps(&self) -> bool {
        self.desc.mipmaps
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }
}

/// Owns every texture of one engine, including framebuffer attachments.
#[derive(Debug, Default)]
pub struct TextureManager {
    handles: HandleAllocator<TextureKind>,
    textures: HashMap<TextureHandle, Texture>,
}

impl TextureManager {
    pub fn create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: TextureDescriptor,
    ) -> Result<TextureHandle> {
        let native = backend.create_texture(&desc)?;
        let handle = self.handles.allocate();
        log::debug!("texture {:?} '{}' {:?}", handle, desc.label, desc.size);
        self.textures.insert(handle, Texture { native, desc });
        Ok(handle)
    }

    /// Creates an RGBA8 texture filled with `pixels`.
    pub fn create_with_pixels(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        label: &str,
        size: Size,
        pixels: &[u8],
    ) -> Result<TextureHandle> {
        let handle = self.create(
            backend,
            TextureDescriptor {
                label: label.to_owned(),
                size,
                format: PixelFormat::Rgba8,
                mipmaps: false,
            },
        )?;
        self.upload(backend, handle, pixels);
        Ok(handle)
    }

    /// Replaces the contents of an RGBA8 texture. A byte count that does not
    /// match the texture size is logged and ignored.
    pub fn upload(&mut self, backend: &mut dyn GraphicsBackend, handle: TextureHandle, pixels: &[u8]) {
        let Some(texture) = self.textures.get(&handle) else {
            log::error!("upload to unknown texture {:?} ignored", handle);
            return;
        };
        let size = texture.size();
        let expected = size.width as usize * size.height as usize * texture.format().bytes_per_pixel() as usize;
        if pixels.len() != expected {
            log::error!(
                "texture {:?} '{}' expects {} bytes, got {}",
                handle,
                texture.label(),
                expected,
                pixels.len()
            );
            return;
        }
        backend.upload_texture(texture.native, size, pixels);
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(&handle)
    }

    pub fn size(&self, handle: TextureHandle) -> Option<Size> {
        self.textures.get(&handle).map(Texture::size)
    }

    pub fn native(&self, handle: TextureHandle) -> Result<NativeId> {
        self.textures
            .get(&handle)
            .map(Texture::native)
            .ok_or(GlassError::UnknownHandle {
                kind: "texture",
                id: handle.raw(),
            })
    }

    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend, handle: TextureHandle) {
        if let Some(texture) = self.textures.remove(&handle) {
            backend.destroy_texture(texture.native);
        }
    }

    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, texture) in self.textures.drain() {
            backend.destroy_texture(texture.native);
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
