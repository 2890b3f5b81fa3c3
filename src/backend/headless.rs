//! A backend without a GPU.
//!
//! [`HeadlessBackend`] behaves like a strict driver: it hands out native ids,
//! validates shader sources with the same reflection the wgpu backend uses,
//! rejects incomplete framebuffers and keeps the bound state. Every call is
//! appended to a log of [`DriverCall`]s so tests can assert what actually
//! reached the driver.

use std::collections::HashMap;

use crate::{
    commands::{UniformData, MAX_TEXTURE_UNITS},
    data_structures::geometry::{PixelRect, Size, Viewport},
    error::{GlassError, Result},
    resources::mesh::BufferLayout,
};

use super::{
    reflect::{self, ProgramReflection},
    BlendState, BufferUsage, Filter, GraphicsBackend, NativeId, TextureDescriptor, UniformValue,
};

pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 8192;

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    CreateTexture {
        texture: NativeId,
        size: Size,
        mipmaps: bool,
    },
    UploadTexture {
        texture: NativeId,
        size: Size,
    },
    DestroyTexture(NativeId),
    GenerateMipmap(NativeId),
    CreateFramebuffer {
        framebuffer: NativeId,
        color: NativeId,
    },
    DestroyFramebuffer(NativeId),
    CreateProgram {
        program: NativeId,
        label: String,
    },
    DestroyProgram(NativeId),
    CreateVertexArray(NativeId),
    UpdateVertexBuffer {
        vertex_array: NativeId,
        floats: usize,
    },
    DestroyVertexArray(NativeId),
    BindFramebuffer(Option<NativeId>),
    SetViewport(Viewport),
    Clear([f32; 4]),
    UseProgram(NativeId),
    BindTexture {
        unit: u32,
        texture: NativeId,
    },
    SetUniform {
        program: NativeId,
        location: i32,
        value: UniformData,
    },
    SetBlendState(BlendState),
    BindVertexArray(NativeId),
    DrawIndexed {
        program: NativeId,
        framebuffer: Option<NativeId>,
        index_count: u32,
    },
    Blit {
        source: Option<NativeId>,
        destination: Option<NativeId>,
        source_rect: PixelRect,
        destination_rect: PixelRect,
        filter: Filter,
    },
    Flush,
}

#[derive(Debug)]
struct Program {
    label: String,
    reflection: ProgramReflection,
    values: HashMap<i32, UniformData>,
}

#[derive(Debug)]
struct VertexArray {
    capacity_bytes: u64,
    index_count: u32,
    usage: BufferUsage,
}

#[derive(Debug, Default)]
struct BoundState {
    framebuffer: Option<NativeId>,
    program: Option<NativeId>,
    vertex_array: Option<NativeId>,
    textures: [Option<NativeId>; MAX_TEXTURE_UNITS],
    blend: BlendState,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    next_id: u32,
    max_texture_size: u32,
    default_size: Size,
    textures: HashMap<NativeId, TextureDescriptor>,
    framebuffers: HashMap<NativeId, NativeId>,
    programs: HashMap<NativeId, Program>,
    vertex_arrays: HashMap<NativeId, VertexArray>,
    bound: BoundState,
    calls: Vec<DriverCall>,
    texture_allocations: usize,
    framebuffer_allocations: usize,
}

impl HeadlessBackend {
    pub fn new(default_size: Size) -> Self {
        Self {
            next_id: 1,
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            default_size,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            bound: BoundState::default(),
            calls: Vec::new(),
            texture_allocations: 0,
            framebuffer_allocations: 0,
        }
    }

    pub fn with_max_texture_size(mut self, max_texture_size: u32) -> Self {
        self.max_texture_size = max_texture_size;
        self
    }

    fn next(&mut self) -> NativeId {
        let id = NativeId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DriverCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    /// Label (`"<vertex>+<fragment>"`) of a live program.
    pub fn program_label(&self, program: NativeId) -> Option<&str> {
        self.programs.get(&program).map(|p| p.label.as_str())
    }

    /// Logged draws whose program label contains `fragment`.
    pub fn draws_with(&self, fragment: &str) -> usize {
        self.count_calls(|call| match call {
            DriverCall::DrawIndexed { program, .. } => self
                .program_label(*program)
                .is_some_and(|label| label.contains(fragment)),
            _ => false,
        })
    }

    /// Current value of a named uniform of `program`.
    pub fn uniform_value(&self, program: NativeId, name: &str) -> Option<&UniformData> {
        let program = self.programs.get(&program)?;
        let location = program.reflection.location(name)?;
        program.values.get(&location)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    /// Textures ever created, including destroyed ones.
    pub fn texture_allocations(&self) -> usize {
        self.texture_allocations
    }

    /// Framebuffers ever created, including destroyed ones.
    pub fn framebuffer_allocations(&self) -> usize {
        self.framebuffer_allocations
    }

    pub fn texture_descriptor(&self, texture: NativeId) -> Option<&TextureDescriptor> {
        self.textures.get(&texture)
    }

    pub fn bound_framebuffer(&self) -> Option<NativeId> {
        self.bound.framebuffer
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(Size::new(1280, 720))
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn default_framebuffer_size(&self) -> Size {
        self.default_size
    }

    fn resize_default_framebuffer(&mut self, size: Size) {
        self.default_size = size;
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeId> {
        if desc.size.is_empty() || !desc.size.fits_within(self.max_texture_size) {
            return Err(GlassError::TextureCreation {
                label: desc.label.clone(),
                reason: format!(
                    "{}x{} outside 1..={}",
                    desc.size.width, desc.size.height, self.max_texture_size
                ),
            });
        }
        let texture = self.next();
        self.textures.insert(texture, desc.clone());
        self.texture_allocations += 1;
        self.calls.push(DriverCall::CreateTexture {
            texture,
            size: desc.size,
            mipmaps: desc.mipmaps,
        });
        Ok(texture)
    }

    fn upload_texture(&mut self, texture: NativeId, size: Size, pixels: &[u8]) {
        let Some(desc) = self.textures.get(&texture) else {
            log::error!("upload to unknown native texture {:?}", texture);
            return;
        };
        let expected = (size.width * size.height * desc.format.bytes_per_pixel()) as usize;
        if desc.size != size || pixels.len() != expected {
            log::error!("upload to {:?} does not match its size", texture);
            return;
        }
        self.calls.push(DriverCall::UploadTexture { texture, size });
    }

    fn destroy_texture(&mut self, texture: NativeId) {
        if self.textures.remove(&texture).is_some() {
            self.calls.push(DriverCall::DestroyTexture(texture));
        }
    }

    fn generate_mipmap(&mut self, texture: NativeId) {
        // the driver binds the texture to unit 0 to rebuild its levels
        self.bound.textures[0] = Some(texture);
        self.calls.push(DriverCall::GenerateMipmap(texture));
    }

    fn create_framebuffer(
        &mut self,
        label: &str,
        color: NativeId,
        depth_stencil: Option<NativeId>,
    ) -> Result<NativeId> {
        let incomplete = |reason: &str| GlassError::FramebufferIncomplete {
            label: label.to_owned(),
            reason: reason.to_owned(),
        };
        let color_desc = self
            .textures
            .get(&color)
            .ok_or_else(|| incomplete("missing colour attachment"))?;
        if color_desc.format.is_depth() {
            return Err(incomplete("colour attachment has a depth format"));
        }
        if let Some(depth) = depth_stencil {
            let depth_desc = self
                .textures
                .get(&depth)
                .ok_or_else(|| incomplete("missing depth attachment"))?;
            if !depth_desc.format.is_depth() || depth_desc.size != color_desc.size {
                return Err(incomplete("depth attachment does not match"));
            }
        }
        let framebuffer = self.next();
        self.framebuffers.insert(framebuffer, color);
        self.framebuffer_allocations += 1;
        self.calls.push(DriverCall::CreateFramebuffer { framebuffer, color });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&mut self, framebuffer: NativeId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            if self.bound.framebuffer == Some(framebuffer) {
                self.bound.framebuffer = None;
            }
            self.calls.push(DriverCall::DestroyFramebuffer(framebuffer));
        }
    }

    fn create_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<NativeId> {
        let (_, reflection) = reflect::compile(label, &reflect::link_sources(vertex, fragment))?;
        let program = self.next();
        self.programs.insert(
            program,
            Program {
                label: label.to_owned(),
                reflection,
                values: HashMap::new(),
            },
        );
        self.calls.push(DriverCall::CreateProgram {
            program,
            label: label.to_owned(),
        });
        Ok(program)
    }

    fn uniform_location(&self, program: NativeId, name: &str) -> Option<i32> {
        self.programs.get(&program)?.reflection.location(name)
    }

    fn destroy_program(&mut self, program: NativeId) {
        if self.programs.remove(&program).is_some() {
            self.calls.push(DriverCall::DestroyProgram(program));
        }
    }

    fn create_vertex_array(
        &mut self,
        layout: &BufferLayout,
        vertex_capacity_bytes: u64,
        vertices: &[f32],
        indices: &[u32],
        usage: BufferUsage,
    ) -> Result<NativeId> {
        if layout.stride() == 0 {
            log::warn!("vertex array with an empty layout");
        }
        let capacity_bytes = vertex_capacity_bytes.max(std::mem::size_of_val(vertices) as u64);
        let vertex_array = self.next();
        self.vertex_arrays.insert(
            vertex_array,
            VertexArray {
                capacity_bytes,
                index_count: indices.len() as u32,
                usage,
            },
        );
        self.calls.push(DriverCall::CreateVertexArray(vertex_array));
        Ok(vertex_array)
    }

    fn update_vertex_buffer(&mut self, vertex_array: NativeId, vertices: &[f32]) {
        let Some(array) = self.vertex_arrays.get(&vertex_array) else {
            log::error!("update of unknown native vertex array {:?}", vertex_array);
            return;
        };
        if array.usage == BufferUsage::Static
            || std::mem::size_of_val(vertices) as u64 > array.capacity_bytes
        {
            log::error!("update of {:?} rejected by the driver", vertex_array);
            return;
        }
        self.calls.push(DriverCall::UpdateVertexBuffer {
            vertex_array,
            floats: vertices.len(),
        });
    }

    fn destroy_vertex_array(&mut self, vertex_array: NativeId) {
        if self.vertex_arrays.remove(&vertex_array).is_some() {
            self.calls.push(DriverCall::DestroyVertexArray(vertex_array));
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<NativeId>) {
        self.bound.framebuffer = framebuffer;
        self.calls.push(DriverCall::BindFramebuffer(framebuffer));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.calls.push(DriverCall::SetViewport(viewport));
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.calls.push(DriverCall::Clear(color));
    }

    fn use_program(&mut self, program: NativeId) {
        self.bound.program = Some(program);
        self.calls.push(DriverCall::UseProgram(program));
    }

    fn bind_texture(&mut self, unit: u32, texture: NativeId) {
        if let Some(slot) = self.bound.textures.get_mut(unit as usize) {
            *slot = Some(texture);
        }
        self.calls.push(DriverCall::BindTexture { unit, texture });
    }

    fn set_uniform(&mut self, location: i32, value: UniformValue<'_>) {
        let Some(program_id) = self.bound.program else {
            log::error!("set_uniform without a program in use");
            return;
        };
        let Some(program) = self.programs.get_mut(&program_id) else {
            return;
        };
        if program.reflection.slot(location).is_none() {
            log::error!("{}: no uniform at location {}", program.label, location);
            return;
        }
        let value = match value {
            UniformValue::Float(v) => UniformData::Float(v),
            UniformValue::Vec2(v) => UniformData::Vec2(v),
            UniformValue::Vec4(v) => UniformData::Vec4(v),
            UniformValue::Int(v) => UniformData::Int(v),
            UniformValue::IntArray(v) => UniformData::IntArray(v.to_vec()),
            UniformValue::Mat4(v) => UniformData::Mat4(v),
        };
        program.values.insert(location, value.clone());
        self.calls.push(DriverCall::SetUniform {
            program: program_id,
            location,
            value,
        });
    }

    fn set_blend_state(&mut self, blend: BlendState) {
        self.bound.blend = blend;
        self.calls.push(DriverCall::SetBlendState(blend));
    }

    fn bind_vertex_array(&mut self, vertex_array: NativeId) {
        self.bound.vertex_array = Some(vertex_array);
        self.calls.push(DriverCall::BindVertexArray(vertex_array));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let (Some(program), Some(_)) = (self.bound.program, self.bound.vertex_array) else {
            log::error!("draw without program or vertex array");
            return;
        };
        self.calls.push(DriverCall::DrawIndexed {
            program,
            framebuffer: self.bound.framebuffer,
            index_count,
        });
    }

    fn blit(
        &mut self,
        source: Option<NativeId>,
        destination: Option<NativeId>,
        source_rect: PixelRect,
        destination_rect: PixelRect,
        filter: Filter,
    ) {
        // read and draw bindings are both replaced
        self.bound.framebuffer = destination;
        self.calls.push(DriverCall::Blit {
            source,
            destination,
            source_rect,
            destination_rect,
            filter,
        });
    }

    fn flush(&mut self) {
        self.calls.push(DriverCall::Flush);
    }
}
