use flow_glass::{
    backend::{
        headless::{DriverCall, HeadlessBackend},
        PixelFormat, TextureDescriptor,
    },
    commands::{encoder::CommandEncoder, player::CommandPlayer, pool::CommandBufferPool, RenderCommand},
    data_structures::geometry::Size,
    error::GlassError,
    handle::{FramebufferHandle, ShaderProgramHandle, TextureHandle, UniformHandle, VertexArrayHandle},
    renderers::quad::{quad_layout, QuadDraw, QuadRenderer},
    resources::{
        framebuffer::FramebufferSpecification,
        shader::{AssetSource, EmbeddedShaders},
        Resources,
    },
};

use crate::common::test_utils::init_logger;

mod common;

fn setup() -> (HeadlessBackend, Resources) {
    init_logger();
    (HeadlessBackend::new(Size::new(256, 256)), Resources::default())
}

fn copy_program(backend: &mut HeadlessBackend, resources: &mut Resources) -> ShaderProgramHandle {
    resources
        .shaders
        .load_shader_from_assets(
            backend,
            &EmbeddedShaders,
            EmbeddedShaders::QUAD_VERT,
            EmbeddedShaders::COPY_FRAG,
        )
        .unwrap()
}

fn texture(backend: &mut HeadlessBackend, resources: &mut Resources, label: &str) -> TextureHandle {
    resources
        .textures
        .create(
            backend,
            TextureDescriptor {
                label: label.to_owned(),
                size: Size::new(8, 8),
                format: PixelFormat::Rgba8,
                mipmaps: false,
            },
        )
        .unwrap()
}

#[test]
fn equal_specs_reuse_the_pooled_framebuffer() {
    let (mut backend, mut resources) = setup();
    let spec = FramebufferSpecification::color(Size::new(64, 32));

    let first = resources
        .framebuffers
        .acquire(&mut backend, &mut resources.textures, &spec)
        .unwrap();
    let second = resources
        .framebuffers
        .acquire(&mut backend, &mut resources.textures, &spec)
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(backend.framebuffer_allocations(), 2);

    resources.framebuffers.reset_pool_usage();
    let again = resources
        .framebuffers
        .acquire(&mut backend, &mut resources.textures, &spec)
        .unwrap();
    assert_eq!(again, first);
    assert_eq!(backend.framebuffer_allocations(), 2);
    assert_eq!(resources.framebuffers.bucket_len(&spec), 2);
    assert_eq!(resources.framebuffers.bucket_in_use(&spec), 1);
}

#[test]
fn downsampled_specs_allocate_smaller_attachments() {
    let (mut backend, mut resources) = setup();
    let spec = FramebufferSpecification::color(Size::new(100, 60)).with_downsample_factor(4);
    let handle = resources
        .framebuffers
        .acquire(&mut backend, &mut resources.textures, &spec)
        .unwrap();
    assert_eq!(resources.framebuffers.sampled_size(handle), Some(Size::new(25, 15)));
    assert_ne!(spec, FramebufferSpecification::color(Size::new(100, 60)));
}

#[test]
fn invalid_resize_keeps_the_framebuffer() {
    let (backend, mut resources) = setup();
    let backend_limit = 512;
    let mut backend = backend.with_max_texture_size(backend_limit);
    let handle = resources
        .framebuffers
        .create(
            &mut backend,
            &mut resources.textures,
            FramebufferSpecification::color(Size::new(64, 64)),
        )
        .unwrap();

    for size in [Size::new(0, 10), Size::new(backend_limit + 1, 10)] {
        resources
            .framebuffers
            .resize(&mut backend, &mut resources.textures, handle, size)
            .unwrap();
        assert_eq!(resources.framebuffers.sampled_size(handle), Some(Size::new(64, 64)));
    }

    resources
        .framebuffers
        .resize(&mut backend, &mut resources.textures, handle, Size::new(128, 32))
        .unwrap();
    assert_eq!(resources.framebuffers.sampled_size(handle), Some(Size::new(128, 32)));
    assert_eq!(backend.live_framebuffers(), 1);
}

#[test]
fn shader_programs_are_cached_by_name_pair() {
    let (mut backend, mut resources) = setup();
    let first = copy_program(&mut backend, &mut resources);
    let second = copy_program(&mut backend, &mut resources);

    assert_eq!(first, second);
    assert_eq!(backend.live_programs(), 1);
    assert_eq!(
        resources.shaders.find(EmbeddedShaders::QUAD_VERT, EmbeddedShaders::COPY_FRAG),
        Some(first)
    );
}

#[test]
fn missing_uniforms_are_invalid_or_errors() {
    let (mut backend, mut resources) = setup();
    let shader = copy_program(&mut backend, &mut resources);

    let alpha = resources.shaders.get_uniform_handle(&backend, shader, "u_alpha");
    assert!(alpha.is_valid());
    assert_eq!(
        resources.shaders.get_uniform_handle(&backend, shader, "u_alpha"),
        alpha
    );

    let missing = resources.shaders.get_uniform_handle(&backend, shader, "u_nope");
    assert_eq!(missing, UniformHandle::INVALID);

    let err = resources
        .shaders
        .require_uniform(&backend, shader, "u_nope")
        .unwrap_err();
    assert!(matches!(err, GlassError::MissingUniform { .. }));
}

#[test]
fn missing_shader_sources_fail() {
    let (mut backend, mut resources) = setup();
    let err = resources
        .shaders
        .load_shader_from_assets(
            &mut backend,
            &EmbeddedShaders,
            EmbeddedShaders::QUAD_VERT,
            "nowhere.frag.wgsl",
        )
        .unwrap_err();
    assert!(matches!(err, GlassError::ShaderSourceMissing(name) if name == "nowhere.frag.wgsl"));
}

struct Broken;

impl AssetSource for Broken {
    fn load(&self, name: &str) -> Option<std::borrow::Cow<'_, str>> {
        match name {
            "broken.frag.wgsl" => Some("@fragment fn fs_main( -> {".into()),
            other => EmbeddedShaders.load(other).map(|s| s.into_owned().into()),
        }
    }
}

#[test]
fn compile_failures_are_reported() {
    let (mut backend, mut resources) = setup();
    let err = resources
        .shaders
        .load_shader_from_assets(
            &mut backend,
            &Broken,
            EmbeddedShaders::QUAD_VERT,
            "broken.frag.wgsl",
        )
        .unwrap_err();
    assert!(matches!(err, GlassError::ShaderCompile { .. }));
    assert_eq!(backend.live_programs(), 0);
}

#[test]
fn dynamic_mesh_updates_are_validated() {
    let (mut backend, mut resources) = setup();
    let layout = quad_layout();
    let dynamic = resources
        .meshes
        .create_dynamic_mesh(&mut backend, 4, &[0, 1, 2, 2, 3, 0], layout.clone())
        .unwrap();
    let fixed = resources
        .meshes
        .create_static_mesh(&mut backend, &[0.0; 16], &[0, 1, 2], layout)
        .unwrap();
    backend.clear_calls();

    let updates = |backend: &HeadlessBackend| {
        backend.count_calls(|call| matches!(call, DriverCall::UpdateVertexBuffer { .. }))
    };

    resources
        .meshes
        .update_dynamic_vertex_buffer(&mut backend, dynamic, &[1.0; 12], 3);
    assert_eq!(updates(&backend), 1);
    assert_eq!(resources.meshes.get(dynamic).unwrap().vertex_count(), 3);

    // short data, too many vertices, static mesh and unknown handle
    resources
        .meshes
        .update_dynamic_vertex_buffer(&mut backend, dynamic, &[1.0; 7], 2);
    resources
        .meshes
        .update_dynamic_vertex_buffer(&mut backend, dynamic, &[1.0; 20], 5);
    resources
        .meshes
        .update_dynamic_vertex_buffer(&mut backend, fixed, &[1.0; 16], 4);
    resources.meshes.update_dynamic_vertex_buffer(
        &mut backend,
        VertexArrayHandle::from_raw(99),
        &[1.0; 16],
        4,
    );
    assert_eq!(updates(&backend), 1);
    assert_eq!(resources.meshes.get(dynamic).unwrap().vertex_count(), 3);
}

#[test]
fn player_elides_repeated_program_binds() {
    let (mut backend, mut resources) = setup();
    let shader = copy_program(&mut backend, &mut resources);
    backend.clear_calls();

    let commands = vec![RenderCommand::SetShader(shader); 3];
    let stats = CommandPlayer::new().execute(&mut backend, &resources, &commands);

    assert_eq!(
        backend.count_calls(|call| matches!(call, DriverCall::UseProgram(_))),
        1
    );
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.elided, 2);
}

#[test]
fn player_elides_repeated_texture_binds() {
    let (mut backend, mut resources) = setup();
    let a = texture(&mut backend, &mut resources, "a");
    let b = texture(&mut backend, &mut resources, "b");
    backend.clear_calls();

    let commands = vec![
        RenderCommand::SetTexture { unit: 0, texture: a },
        RenderCommand::SetTexture { unit: 0, texture: b },
        RenderCommand::SetTexture { unit: 0, texture: b },
    ];
    let mut player = CommandPlayer::new();
    player.execute(&mut backend, &resources, &commands);
    assert_eq!(
        backend.count_calls(|call| matches!(call, DriverCall::BindTexture { .. })),
        2
    );

    // the cache survives between frames until it is reset
    player.execute(&mut backend, &resources, &commands[2..]);
    assert_eq!(player.last_stats().elided, 1);
    player.reset_state_cache();
    player.execute(&mut backend, &resources, &commands[2..]);
    assert_eq!(player.last_stats().executed, 1);
}

#[test]
fn player_skips_invalid_handles() {
    let (mut backend, resources) = setup();
    let commands = vec![
        RenderCommand::SetShader(ShaderProgramHandle::INVALID),
        RenderCommand::SetTexture {
            unit: 0,
            texture: TextureHandle::from_raw(42),
        },
        RenderCommand::Draw {
            shader: ShaderProgramHandle::INVALID,
            vertex_array: VertexArrayHandle::INVALID,
        },
        RenderCommand::Clear([0.0; 4]),
    ];
    let stats = CommandPlayer::new().execute(&mut backend, &resources, &commands);

    assert_eq!(stats.skipped, 3);
    assert_eq!(stats.executed, 1);
    assert_eq!(backend.calls(), &[DriverCall::Clear([0.0; 4])]);
}

fn is_uniform(command: &RenderCommand) -> bool {
    matches!(
        command,
        RenderCommand::SetUniformFloat { .. }
            | RenderCommand::SetUniformVec2 { .. }
            | RenderCommand::SetUniformVec4 { .. }
            | RenderCommand::SetUniformInt { .. }
            | RenderCommand::SetUniformIntArray { .. }
            | RenderCommand::SetUniformMat4 { .. }
    )
}

/// Records `draw` into a fresh cycle of `pool` and counts its uniform commands.
fn uniforms_recorded(quad: &mut QuadRenderer, pool: &mut CommandBufferPool, draw: &QuadDraw) -> usize {
    pool.reset(false);
    quad.draw(&mut CommandEncoder::new(pool), draw, &[]);
    pool.commands().iter().filter(|command| is_uniform(command)).count()
}

fn quad_setup() -> (HeadlessBackend, Resources, QuadRenderer, QuadDraw) {
    let (mut backend, mut resources) = setup();
    let shader = copy_program(&mut backend, &mut resources);
    let mut quad = QuadRenderer::new(&mut backend, &mut resources).unwrap();
    quad.register(&backend, &mut resources.shaders, shader).unwrap();
    let source = texture(&mut backend, &mut resources, "source");
    let draw = QuadDraw::new(shader, FramebufferHandle::DEFAULT, Size::new(64, 64)).with_texture(0, source);
    (backend, resources, quad, draw)
}

#[test]
fn quad_renderer_uploads_only_changed_uniforms() {
    let (_backend, _resources, mut quad, draw) = quad_setup();
    let mut pool = CommandBufferPool::default();

    assert!(uniforms_recorded(&mut quad, &mut pool, &draw) > 0);
    assert_eq!(uniforms_recorded(&mut quad, &mut pool, &draw), 0);

    let faded = draw.with_alpha(0.5);
    pool.reset(false);
    quad.draw(&mut CommandEncoder::new(&mut pool), &faded, &[]);
    let uniforms: Vec<_> = pool.commands().iter().filter(|command| is_uniform(command)).collect();
    assert_eq!(uniforms.len(), 1);
    assert!(matches!(uniforms[0], RenderCommand::SetUniformFloat { value, .. } if *value == 0.5));

    assert_eq!(uniforms_recorded(&mut quad, &mut pool, &faded), 0);
}

#[test]
fn invalidated_quad_renderer_uploads_everything_again() {
    let (_backend, _resources, mut quad, draw) = quad_setup();
    let mut pool = CommandBufferPool::default();

    let first = uniforms_recorded(&mut quad, &mut pool, &draw);
    assert_eq!(uniforms_recorded(&mut quad, &mut pool, &draw), 0);

    quad.invalidate();
    assert_eq!(uniforms_recorded(&mut quad, &mut pool, &draw), first);
}
