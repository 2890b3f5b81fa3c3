use std::collections::HashMap;

use crate::{
    backend::{BufferUsage, GraphicsBackend, NativeId},
    error::{GlassError, Result},
    handle::{HandleAllocator, VertexArrayHandle, VertexArrayKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderDataType {
    Float,
    Float2,
    Float3,
    Float4,
}

impl ShaderDataType {
    pub fn component_count(&self) -> u32 {
        match self {
            ShaderDataType::Float => 1,
            ShaderDataType::Float2 => 2,
            ShaderDataType::Float3 => 3,
            ShaderDataType::Float4 => 4,
        }
    }

    pub fn size(&self) -> u32 {
        self.component_count() * 4
    }
}

/// One vertex attribute. The offset is filled in by [`BufferLayout::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferElement {
    name: String,
    data_type: ShaderDataType,
    offset: u32,
}

impl BufferElement {
    pub fn new(name: &str, data_type: ShaderDataType) -> Self {
        Self {
            name: name.to_owned(),
            data_type,
            offset: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> ShaderDataType {
        self.data_type
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

/**
 * Interleaved vertex layout. Offsets and the stride are computed once here
 * and cannot be changed afterwards; attribute `i` is bound to shader
 * location `i`.
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferLayout {
    elements: Vec<BufferElement>,
    stride: u32,
}

impl BufferLayout {
    pub fn new(elements: Vec<BufferElement>) -> Self {
        let mut elements = elements;
        let mut offset = 0;
        for element in elements.iter_mut() {
            element.offset = offset;
            offset += element.data_type.size();
        }
        Self {
            elements,
            stride: offset,
        }
    }

    pub fn elements(&self) -> &[BufferElement] {
        &self.elements
    }

    /// Bytes per vertex.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn floats_per_vertex(&self) -> usize {
        (self.stride / 4) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshKind {
    Static,
    Dynamic { max_vertices: u32 },
}

#[derive(Debug, Clone)]
pub struct Mesh {
    native: NativeId,
    layout: BufferLayout,
    kind: MeshKind,
    index_count: u32,
    vertex_count: u32,
}

impl Mesh {
    pub fn native(&self) -> NativeId {
        self.native
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Owns every vertex array of one engine.
#[derive(Debug, Default)]
pub struct VertexDataManager {
    handles: HandleAllocator<VertexArrayKind>,
    meshes: HashMap<VertexArrayHandle, Mesh>,
}

impl VertexDataManager {
    pub fn create_static_mesh(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        vertices: &[f32],
        indices: &[u32],
        layout: BufferLayout,
    ) -> Result<VertexArrayHandle> {
        let floats = layout.floats_per_vertex().max(1);
        let vertex_count = (vertices.len() / floats) as u32;
        let native = backend.create_vertex_array(
            &layout,
            std::mem::size_of_val(vertices) as u64,
            vertices,
            indices,
            BufferUsage::Static,
        )?;
        Ok(self.track(Mesh {
            native,
            layout,
            kind: MeshKind::Static,
            index_count: indices.len() as u32,
            vertex_count,
        }))
    }

    /// A mesh whose vertex buffer holds up to `max_vertices` and can be
    /// rewritten with [`Self::update_dynamic_vertex_buffer`].
    pub fn create_dynamic_mesh(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        max_vertices: u32,
        indices: &[u32],
        layout: BufferLayout,
    ) -> Result<VertexArrayHandle> {
        let capacity = u64::from(max_vertices) * u64::from(layout.stride());
        let native = backend.create_vertex_array(
            &layout,
            capacity,
            &[],
            indices,
            BufferUsage::Dynamic,
        )?;
        Ok(self.track(Mesh {
            native,
            layout,
            kind: MeshKind::Dynamic { max_vertices },
            index_count: indices.len() as u32,
            vertex_count: 0,
        }))
    }

    fn track(&mut self, mesh: Mesh) -> VertexArrayHandle {
        let handle = self.handles.allocate();
        self.meshes.insert(handle, mesh);
        handle
    }

    /// Rewrites the first `vertex_count` vertices of a dynamic mesh.
    ///
    /// Unknown handles, static meshes, short `data` and counts above the
    /// mesh capacity are logged and ignored.
    pub fn update_dynamic_vertex_buffer(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        handle: VertexArrayHandle,
        data: &[f32],
        vertex_count: u32,
    ) {
        let Some(mesh) = self.meshes.get_mut(&handle) else {
            log::error!("update of unknown mesh {:?} ignored", handle);
            return;
        };
        let MeshKind::Dynamic { max_vertices } = mesh.kind else {
            log::error!("mesh {:?} is static and cannot be updated", handle);
            return;
        };
        if vertex_count > max_vertices {
            log::error!(
                "mesh {:?} holds {} vertices, update wants {}",
                handle,
                max_vertices,
                vertex_count
            );
            return;
        }
        let required = vertex_count as usize * mesh.layout.floats_per_vertex();
        if data.len() < required {
            log::error!(
                "mesh {:?} update needs {} floats for {} vertices but got {}",
                handle,
                required,
                vertex_count,
                data.len()
            );
            return;
        }
        backend.update_vertex_buffer(mesh.native, &data[..required]);
        mesh.vertex_count = vertex_count;
    }

    pub fn get(&self, handle: VertexArrayHandle) -> Option<&Mesh> {
        self.meshes.get(&handle)
    }

    pub fn native(&self, handle: VertexArrayHandle) -> Result<NativeId> {
        self.meshes
            .get(&handle)
            .map(Mesh::native)
            .ok_or(GlassError::UnknownHandle {
                kind: "vertex array",
                id: handle.raw(),
            })
    }

    pub fn destroy_mesh(&mut self, backend: &mut dyn GraphicsBackend, handle: VertexArrayHandle) {
        match self.meshes.remove(&handle) {
            Some(mesh) => backend.destroy_vertex_array(mesh.native),
            None => log::warn!("destroy of unknown mesh {:?} ignored", handle),
        }
    }

    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, mesh) in self.meshes.drain() {
            backend.destroy_vertex_array(mesh.native);
        }
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}
