/**
 * GPU resource tables. Each manager maps typed handles to backend objects and
 * owns them until they are destroyed; nothing in here is shared between
 * engines.
 */
pub mod framebuffer;
pub mod mesh;
pub mod shader;
pub mod texture;

use crate::backend::GraphicsBackend;

use self::{
    framebuffer::FramebufferManager, mesh::VertexDataManager, shader::ShaderManager,
    texture::TextureManager,
};

/// All managers of one engine.
#[derive(Debug, Default)]
pub struct Resources {
    pub textures: TextureManager,
    pub framebuffers: FramebufferManager,
    pub shaders: ShaderManager,
    pub meshes: VertexDataManager,
}

impl Resources {
    /// Releases every native object. Framebuffers go first since they own
    /// textures.
    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend) {
        self.framebuffers.destroy_all(backend, &mut self.textures);
        self.textures.destroy_all(backend);
        self.shaders.destroy_all(backend);
        self.meshes.destroy_all(backend);
        log::info!("released all GPU resources of {}", backend.name());
    }
}
