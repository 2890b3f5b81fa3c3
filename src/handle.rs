//! Opaque resource handles.
//!
//! Every GPU object the engine knows about is referred to by a [`Handle`]: a
//! plain `i32` tagged with a zero-sized kind marker so a texture handle can
//! never be passed where a framebuffer is expected. Handles carry no native
//! object ids; the resource managers translate them when a command is played.
//!
//! Two values are reserved:
//!
//! - [`Handle::INVALID`] (`-1`) never refers to a live object
//! - [`FramebufferHandle::DEFAULT`] (`0`) is the window surface / default target

use std::{fmt, hash::Hash, marker::PhantomData};

/// Marker for framebuffer handles.
#[derive(Debug)]
pub enum FramebufferKind {}
/// Marker for texture handles.
#[derive(Debug)]
pub enum TextureKind {}
/// Marker for shader program handles.
#[derive(Debug)]
pub enum ShaderProgramKind {}
/// Marker for vertex array (mesh) handles.
#[derive(Debug)]
pub enum VertexArrayKind {}
/// Marker for uniform location handles.
#[derive(Debug)]
pub enum UniformKind {}

pub type FramebufferHandle = Handle<FramebufferKind>;
pub type TextureHandle = Handle<TextureKind>;
pub type ShaderProgramHandle = Handle<ShaderProgramKind>;
pub type VertexArrayHandle = Handle<VertexArrayKind>;
pub type UniformHandle = Handle<UniformKind>;

/// A typed integer id.
pub struct Handle<K> {
    id: i32,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Handle<K> {
    pub const INVALID: Self = Self::from_raw(-1);

    pub const fn from_raw(id: i32) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    pub const fn raw(self) -> i32 {
        self.id
    }

    pub const fn is_valid(self) -> bool {
        self.id >= 0
    }
}

impl FramebufferHandle {
    /// The window surface. Never pooled, never destroyed by the managers.
    pub const DEFAULT: Self = Self::from_raw(0);

    pub const fn is_default(self) -> bool {
        self.id == 0
    }
}

// Manual impls: deriving would put bounds on `K`, which is uninhabited.
impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<K> Copy for Handle<K> {}
impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<K> Eq for Handle<K> {}
impl<K> Hash for Handle<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl<K> PartialOrd for Handle<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<K> Ord for Handle<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}
impl<K> Default for Handle<K> {
    fn default() -> Self {
        Self::INVALID
    }
}
impl<K> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = std::any::type_name::<K>().rsplit("::").next().unwrap_or("?");
        match self.id {
            -1 => write!(f, "{kind}(Invalid)"),
            id => write!(f, "{kind}({id})"),
        }
    }
}

/// Monotonic id source for one handle kind.
///
/// Ids are never reused within one allocator, so a stale handle can only miss
/// a table lookup, never alias a newer object.
#[derive(Debug)]
pub struct HandleAllocator<K> {
    next: i32,
    _kind: PhantomData<fn() -> K>,
}

impl<K> HandleAllocator<K> {
    pub fn new() -> Self {
        Self {
            next: 1,
            _kind: PhantomData,
        }
    }

    pub fn allocate(&mut self) -> Handle<K> {
        let handle = Handle::from_raw(self.next);
        self.next += 1;
        handle
    }
}

impl<K> Default for HandleAllocator<K> {
    fn default() -> Self {
        Self::new()
    }
}
