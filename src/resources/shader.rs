use std::{borrow::Cow, collections::HashMap, path::PathBuf};

use crate::{
    backend::{GraphicsBackend, NativeId},
    error::{GlassError, Result},
    handle::{HandleAllocator, ShaderProgramHandle, ShaderProgramKind, UniformHandle},
};

/// Where shader sources come from.
pub trait AssetSource {
    fn load(&self, name: &str) -> Option<Cow<'_, str>>;
}

/// The WGSL sources shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedShaders;

impl EmbeddedShaders {
    pub const QUAD_VERT: &'static str = "quad.vert.wgsl";
    pub const COPY_FRAG: &'static str = "copy.frag.wgsl";
    pub const PREPROCESS_AA_FRAG: &'static str = "preprocess_aa.frag.wgsl";
    pub const PREPROCESS_EDGE_FRAG: &'static str = "preprocess_edge.frag.wgsl";
    pub const BLUR_DOWN_FRAG: &'static str = "blur_down.frag.wgsl";
    pub const BLUR_UP_FRAG: &'static str = "blur_up.frag.wgsl";
    pub const MASK_FRAG: &'static str = "mask.frag.wgsl";
}

impl AssetSource for EmbeddedShaders {
    fn load(&self, name: &str) -> Option<Cow<'_, str>> {
        let source = match name {
            Self::QUAD_VERT => include_str!("../../assets/shaders/quad.vert.wgsl"),
            Self::COPY_FRAG => include_str!("../../assets/shaders/copy.frag.wgsl"),
            Self::PREPROCESS_AA_FRAG => include_str!("../../assets/shaders/preprocess_aa.frag.wgsl"),
            Self::PREPROCESS_EDGE_FRAG => {
                include_str!("../../assets/shaders/preprocess_edge.frag.wgsl")
            }
            Self::BLUR_DOWN_FRAG => include_str!("../../assets/shaders/blur_down.frag.wgsl"),
            Self::BLUR_UP_FRAG => include_str!("../../assets/shaders/blur_up.frag.wgsl"),
            Self::MASK_FRAG => include_str!("../../assets/shaders/mask.frag.wgsl"),
            _ => return None,
        };
        Some(Cow::Borrowed(source))
    }
}

/// Reads `<root>/<name>` from disk. Falls back to nothing, so a host that
/// only overrides some shaders should chain it with [`EmbeddedShaders`]
/// through [`Layered`].
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for DirectoryAssets {
    fn default() -> Self {
        Self::new(std::path::Path::new("./").join("assets").join("shaders"))
    }
}

impl AssetSource for DirectoryAssets {
    fn load(&self, name: &str) -> Option<Cow<'_, str>> {
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(source) => Some(Cow::Owned(source)),
            Err(e) => {
                log::debug!("{} not readable: {}", path.display(), e);
                None
            }
        }
    }
}

/// Tries `primary` first, then `fallback`.
#[derive(Debug, Clone)]
pub struct Layered<A, B> {
    pub primary: A,
    pub fallback: B,
}

impl<A: AssetSource, B: AssetSource> AssetSource for Layered<A, B> {
    fn load(&self, name: &str) -> Option<Cow<'_, str>> {
        self.primary
            .load(name)
            .or_else(|| self.fallback.load(name))
    }
}

#[derive(Debug)]
pub struct ShaderProgram {
    native: NativeId,
    vertex: String,
    fragment: String,
    uniforms: HashMap<String, UniformHandle>,
}

impl ShaderProgram {
    pub fn native(&self) -> NativeId {
        self.native
    }

    /// `(vertex, fragment)` asset names the program was built from.
    pub fn names(&self) -> (&str, &str) {
        (&self.vertex, &self.fragment)
    }
}

/// Compiled programs, cached by their `(vertex, fragment)` pair.
#[derive(Debug, Default)]
pub struct ShaderManager {
    handles: HandleAllocator<ShaderProgramKind>,
    programs: HashMap<ShaderProgramHandle, ShaderProgram>,
    by_name: HashMap<(String, String), ShaderProgramHandle>,
}

impl ShaderManager {
    /// Returns the cached program for `(vertex, fragment)` or compiles it.
    pub fn load_shader_from_assets(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        assets: &dyn AssetSource,
        vertex: &str,
        fragment: &str,
    ) -> Result<ShaderProgramHandle> {
        if let Some(handle) = self.find(vertex, fragment) {
            return Ok(handle);
        }

        let vertex_source = assets
            .load(vertex)
            .ok_or_else(|| GlassError::ShaderSourceMissing(vertex.to_owned()))?;
        let fragment_source = assets
            .load(fragment)
            .ok_or_else(|| GlassError::ShaderSourceMissing(fragment.to_owned()))?;

        let label = format!("{vertex}+{fragment}");
        let native = backend.create_program(&label, &vertex_source, &fragment_source)?;
        let handle = self.handles.allocate();
        log::info!("compiled shader program {:?} '{}'", handle, label);

        self.programs.insert(
            handle,
            ShaderProgram {
                native,
                vertex: vertex.to_owned(),
                fragment: fragment.to_owned(),
                uniforms: HashMap::new(),
            },
        );
        self.by_name
            .insert((vertex.to_owned(), fragment.to_owned()), handle);
        Ok(handle)
    }

    pub fn find(&self, vertex: &str, fragment: &str) -> Option<ShaderProgramHandle> {
        self.by_name
            .get(&(vertex.to_owned(), fragment.to_owned()))
            .copied()
    }

    /// Location of `name` in `shader`, cached for the program's lifetime.
    ///
    /// Missing uniforms (including ones the compiler optimised away) yield
    /// [`UniformHandle::INVALID`] and a single warning.
    pub fn get_uniform_handle(
        &mut self,
        backend: &dyn GraphicsBackend,
        shader: ShaderProgramHandle,
        name: &str,
    ) -> UniformHandle {
        let Some(program) = self.programs.get_mut(&shader) else {
            log::error!("uniform '{}' requested from unknown shader {:?}", name, shader);
            return UniformHandle::INVALID;
        };
        if let Some(handle) = program.uniforms.get(name) {
            return *handle;
        }

        let handle = match backend.uniform_location(program.native, name) {
            Some(location) => UniformHandle::from_raw(location),
            None => {
                log::warn!(
                    "uniform '{}' is not active in {}+{}",
                    name,
                    program.vertex,
                    program.fragment
                );
                UniformHandle::INVALID
            }
        };
        program.uniforms.insert(name.to_owned(), handle);
        handle
    }

    /// Like [`Self::get_uniform_handle`] but a missing uniform is an error.
    pub fn require_uniform(
        &mut self,
        backend: &dyn GraphicsBackend,
        shader: ShaderProgramHandle,
        name: &str,
    ) -> Result<UniformHandle> {
        let handle = self.get_uniform_handle(backend, shader, name);
        if handle.is_valid() {
            return Ok(handle);
        }
        let program = self
            .programs
            .get(&shader)
            .map(|p| format!("{}+{}", p.vertex, p.fragment))
            .unwrap_or_else(|| format!("{shader:?}"));
        Err(GlassError::MissingUniform {
            program,
            uniform: name.to_owned(),
        })
    }

    pub fn get(&self, handle: ShaderProgramHandle) -> Option<&ShaderProgram> {
        self.programs.get(&handle)
    }

    pub fn native(&self, handle: ShaderProgramHandle) -> Result<NativeId> {
        self.programs
            .get(&handle)
            .map(ShaderProgram::native)
            .ok_or(GlassError::UnknownHandle {
                kind: "shader program",
                id: handle.raw(),
            })
    }

    /// Destroys a program and purges its uniform cache.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend, handle: ShaderProgramHandle) {
        let Some(program) = self.programs.remove(&handle) else {
            log::warn!("destroy of unknown shader {:?} ignored", handle);
            return;
        };
        self.by_name.remove(&(program.vertex, program.fragment));
        backend.destroy_program(program.native);
    }

    pub fn destroy_all(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, program) in self.programs.drain() {
            backend.destroy_program(program.native);
        }
        self.by_name.clear();
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
