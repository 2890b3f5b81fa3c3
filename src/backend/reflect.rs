//! WGSL validation and uniform reflection.
//!
//! A program is a vertex source concatenated with a fragment source. Both
//! backends run the result through `naga` once at creation: a parse or
//! validation failure is a compile failure, and the module's globals tell us
//! which named uniforms exist, where they live in their uniform block, and
//! which texture units the program samples.
//!
//! Binding conventions:
//!
//! - uniform blocks: any `@group/@binding`, usually `@group(0)`
//! - texture unit `n`: `@group(1) @binding(2n)` texture and `@binding(2n + 1)` sampler

use naga::{AddressSpace, ArraySize, ScalarKind, TypeInner, VectorSize};

use crate::error::{GlassError, Result};

/// Bind group holding the sampled textures.
pub const TEXTURE_GROUP: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec4,
    Int,
    IntArray { len: u32, stride: u32 },
    Mat4,
}

/// One named, settable value inside a uniform block.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub offset: u32,
    pub ty: UniformType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBlockInfo {
    pub group: u32,
    pub binding: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSlot {
    pub unit: u32,
    pub texture_binding: u32,
    pub sampler_binding: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProgramReflection {
    pub uniforms: Vec<UniformSlot>,
    pub blocks: Vec<UniformBlockInfo>,
    pub textures: Vec<TextureSlot>,
}

impl ProgramReflection {
    /// Location of `name`: its index in [`Self::uniforms`].
    pub fn location(&self, name: &str) -> Option<i32> {
        self.uniforms
            .iter()
            .position(|slot| slot.name == name)
            .map(|idx| idx as i32)
    }

    pub fn slot(&self, location: i32) -> Option<&UniformSlot> {
        usize::try_from(location)
            .ok()
            .and_then(|idx| self.uniforms.get(idx))
    }
}

/// Joins the two stages into one module source.
pub fn link_sources(vertex: &str, fragment: &str) -> String {
    format!("{vertex}\n{fragment}")
}

/// Parses, validates and reflects a linked program source.
pub fn compile(program: &str, source: &str) -> Result<(naga::Module, ProgramReflection)> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| GlassError::ShaderCompile {
        program: program.to_owned(),
        message: e.emit_to_string(source),
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    validator
        .validate(&module)
        .map_err(|e| GlassError::ShaderCompile {
            program: program.to_owned(),
            message: format!("{:?}", e.into_inner()),
        })?;

    let reflection = reflect(program, &module)?;
    Ok((module, reflection))
}

fn reflect(program: &str, module: &naga::Module) -> Result<ProgramReflection> {
    let mut reflection = ProgramReflection::default();
    let mut samplers = Vec::new();
    let mut textures = Vec::new();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        let ty = &module.types[var.ty];
        match (var.space, &ty.inner) {
            (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                reflection.blocks.push(UniformBlockInfo {
                    group: binding.group,
                    binding: binding.binding,
                    size: *span,
                });
                for member in members {
                    let Some(name) = member.name.as_ref() else {
                        continue;
                    };
                    match uniform_type(module, &module.types[member.ty].inner) {
                        Some(ty) => reflection.uniforms.push(UniformSlot {
                            name: name.clone(),
                            group: binding.group,
                            binding: binding.binding,
                            offset: member.offset,
                            ty,
                        }),
                        None => log::debug!(
                            "{program}: uniform member '{name}' has a type that cannot be set by commands"
                        ),
                    }
                }
            }
            (AddressSpace::Uniform, inner) => {
                let size = ty.inner.size(module.to_ctx());
                reflection.blocks.push(UniformBlockInfo {
                    group: binding.group,
                    binding: binding.binding,
                    size,
                });
                if let (Some(name), Some(ty)) = (var.name.as_ref(), uniform_type(module, inner)) {
                    reflection.uniforms.push(UniformSlot {
                        name: name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        offset: 0,
                        ty,
                    });
                }
            }
            (AddressSpace::Handle, TypeInner::Image { .. }) if binding.group == TEXTURE_GROUP => {
                textures.push(binding.binding);
            }
            (AddressSpace::Handle, TypeInner::Sampler { .. }) if binding.group == TEXTURE_GROUP => {
                samplers.push(binding.binding);
            }
            _ => log::debug!("{program}: ignoring global {:?}", var.name),
        }
    }

    for texture_binding in textures {
        if texture_binding % 2 != 0 || !samplers.contains(&(texture_binding + 1)) {
            return Err(GlassError::ShaderCompile {
                program: program.to_owned(),
                message: format!(
                    "texture at @group({TEXTURE_GROUP}) @binding({texture_binding}) must sit on an even binding followed by its sampler"
                ),
            });
        }
        reflection.textures.push(TextureSlot {
            unit: texture_binding / 2,
            texture_binding,
            sampler_binding: texture_binding + 1,
        });
    }
    reflection.textures.sort_by_key(|slot| slot.unit);
    Ok(reflection)
}

fn uniform_type(module: &naga::Module, inner: &TypeInner) -> Option<UniformType> {
    match inner {
        TypeInner::Scalar(scalar) if scalar.width == 4 => match scalar.kind {
            ScalarKind::Float => Some(UniformType::Float),
            ScalarKind::Sint => Some(UniformType::Int),
            _ => None,
        },
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => Some(UniformType::Vec2),
            VectorSize::Quad => Some(UniformType::Vec4),
            _ => None,
        },
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            ..
        } => Some(UniformType::Mat4),
        TypeInner::Array {
            base,
            size: ArraySize::Constant(len),
            stride,
        } => {
            let is_int = match &module.types[*base].inner {
                TypeInner::Scalar(scalar) => scalar.kind == ScalarKind::Sint,
                TypeInner::Vector { scalar, .. } => scalar.kind == ScalarKind::Sint,
                _ => false,
            };
            is_int.then_some(UniformType::IntArray {
                len: len.get(),
                stride: *stride,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
struct Params {
    u_alpha: f32,
    u_offset: vec2<f32>,
    u_rect: vec4<f32>,
    u_lanes: array<vec4<i32>, 3>,
};
@group(0) @binding(1) var<uniform> params: Params;
@group(1) @binding(0) var t_unit0: texture_2d<f32>;
@group(1) @binding(1) var s_unit0: sampler;

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(idx), 0.0, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let c = textureSample(t_unit0, s_unit0, pos.xy * params.u_offset);
    return c * params.u_alpha + params.u_rect + vec4<f32>(f32(params.u_lanes[0].x));
}
"#;

    #[test]
    fn reflects_uniform_offsets_and_texture_units() {
        let (_, reflection) = compile("test", SOURCE).unwrap();
        assert_eq!(reflection.location("u_alpha"), Some(0));
        assert_eq!(reflection.location("u_missing"), None);

        let rect = reflection.slot(reflection.location("u_rect").unwrap()).unwrap();
        assert_eq!(rect.offset, 16);
        assert_eq!(rect.ty, UniformType::Vec4);

        let lanes = reflection.slot(3).unwrap();
        assert_eq!(lanes.ty, UniformType::IntArray { len: 3, stride: 16 });

        assert_eq!(reflection.blocks.len(), 1);
        assert_eq!(reflection.textures.len(), 1);
        assert_eq!(reflection.textures[0].unit, 0);
    }

    #[test]
    fn rejects_invalid_wgsl() {
        let err = compile("broken", "fn oops( {").unwrap_err();
        assert!(matches!(err, GlassError::ShaderCompile { .. }));
    }
}
