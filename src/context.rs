//! The engine.
//!
//! A [`Context`] owns one backend together with every table, cache and
//! recorder built on top of it. It is deliberately `!Send`: it is created on
//! the GPU thread (see [`crate::flow::RenderThread`]) and never leaves it.
//!
//! A frame is recorded and played in one call to [`Context::render_frame`]:
//!
//! 1. chains of detached objects are disposed, then grain textures no chain
//!    uses any more
//! 2. the framebuffer pool and the command buffer start a new cycle
//! 3. the destination is cleared and every render object is recorded in
//!    ascending `(z_index, id)` order. An object whose chain fails is logged
//!    and its commands are rewound; the others still render
//! 4. host overlays are recorded on top
//! 5. the command player replays everything in record order and the backend
//!    submits

use std::{collections::HashMap, marker::PhantomData, time::Duration};

use crate::{
    backend::{GraphicsBackend, PixelFormat, TextureDescriptor},
    commands::{
        encoder::CommandEncoder,
        player::{CommandPlayer, PlayerStats},
        pool::{CommandBufferPool, DEFAULT_COMMAND_CAPACITY},
    },
    data_structures::{
        geometry::{PixelRect, Rect, Size},
        render_object::{Mask, RenderObject, RenderObjectId, RenderObjects},
        style::{Style, MAX_BLUR_PASSES},
    },
    error::{GlassError, Result},
    handle::FramebufferHandle,
    pipelines::{
        coordinator::{ChainReport, EffectCoordinator},
        EffectContext, EffectShaders, FrameContext,
    },
    renderers::{
        batch::{BatchRenderer, BatchStats, Overlay},
        quad::QuadRenderer,
    },
    resources::{framebuffer::FramebufferSpecification, shader::AssetSource, shader::EmbeddedShaders, Resources},
};

/// Tunables of one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Pixels the preprocess crop grows on each side.
    pub preprocess_margin: f32,
    /// Capture pixels per effect pixel.
    pub downsample_factor: u32,
    /// Size ratio between consecutive blur chain framebuffers.
    pub blur_scale: f32,
    /// Blur runs only for radii above this.
    pub blur_enable_radius: f32,
    pub max_blur_passes: u32,
    /// Noise below this alpha is not drawn.
    pub noise_min_alpha: f32,
    /// Opacities below this show the background only.
    pub blend_background_below: f32,
    /// Opacities above this show the foreground only.
    pub blend_foreground_above: f32,
    pub command_capacity: usize,
    /// Cleared into the destination at the start of every frame.
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preprocess_margin: 20.0,
            downsample_factor: 4,
            blur_scale: 0.67,
            blur_enable_radius: 2.0,
            max_blur_passes: MAX_BLUR_PASSES,
            noise_min_alpha: 0.05,
            blend_background_below: 0.1,
            blend_foreground_above: 0.95,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Captured screen pixels, tightly packed top-down RGBA8.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub size: Size,
    pub pixels: Vec<u8>,
}

impl CaptureFrame {
    pub fn new(size: Size, pixels: Vec<u8>) -> Self {
        Self { size, pixels }
    }

    /// A frame of one colour.
    pub fn solid(size: Size, rgba: [u8; 4]) -> Self {
        let count = size.width as usize * size.height as usize;
        Self::new(size, rgba.repeat(count))
    }
}

impl From<image::RgbaImage> for CaptureFrame {
    fn from(image: image::RgbaImage) -> Self {
        let size = Size::new(image.width(), image.height());
        Self::new(size, image.into_raw())
    }
}

/// One region a producer wants blurred this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionIntent {
    /// Stable producer-side identity of the region.
    pub key: String,
    pub rect: Rect,
    pub style: Style,
    pub z_index: i32,
}

/// The full set of regions a producer wants on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameIntent {
    pub regions: Vec<RegionIntent>,
}

impl FrameIntent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, key: impl Into<String>, rect: Rect, style: Style, z_index: i32) -> Self {
        self.regions.push(RegionIntent {
            key: key.into(),
            rect,
            style,
            z_index,
        });
        self
    }
}

/// Counters of one [`Context::render_frame`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub frame_index: u64,
    pub objects_rendered: usize,
    pub commands_recorded: usize,
    pub capture_changed: bool,
    pub reports: Vec<(RenderObjectId, ChainReport)>,
    /// Objects whose chain failed. Their commands were discarded and the
    /// rest of the frame still rendered.
    pub failed: Vec<RenderObjectId>,
    pub overlays: BatchStats,
    pub player: PlayerStats,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Capture {
    framebuffer: FramebufferHandle,
    size: Size,
}

pub struct Context<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,
    resources: Resources,
    commands: CommandBufferPool,
    player: CommandPlayer,
    quad: QuadRenderer,
    batch: BatchRenderer,
    shaders: EffectShaders,
    coordinator: EffectCoordinator,
    objects: RenderObjects,
    intents: HashMap<String, RenderObjectId>,
    capture: Option<Capture>,
    capture_changed: bool,
    frame_index: u64,
    // pins the context to the thread that created it
    _not_send: PhantomData<*const ()>,
}

impl<B: GraphicsBackend> std::fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.backend.name())
            .field("objects", &self.objects.len())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

impl<B: GraphicsBackend> Context<B> {
    /// Builds an engine with the shaders shipped in the crate.
    pub fn new(backend: B, config: EngineConfig) -> Result<Self> {
        Self::with_assets(backend, config, &EmbeddedShaders)
    }

    /// Builds an engine, compiling the effect programs from `assets`.
    pub fn with_assets(mut backend: B, config: EngineConfig, assets: &dyn AssetSource) -> Result<Self> {
        log::info!("creating engine on {}", backend.name());
        let mut resources = Resources::default();
        let mut quad = QuadRenderer::new(&mut backend, &mut resources)?;
        let shaders = EffectShaders::load(&mut backend, &mut resources, &mut quad, assets)?;
        Ok(Self {
            commands: CommandBufferPool::new(config.command_capacity),
            backend,
            config,
            resources,
            player: CommandPlayer::new(),
            quad,
            batch: BatchRenderer::new(),
            shaders,
            coordinator: EffectCoordinator::new(),
            objects: RenderObjects::default(),
            intents: HashMap::new(),
            capture: None,
            capture_changed: false,
            frame_index: 0,
            _not_send: PhantomData,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn shaders(&self) -> &EffectShaders {
        &self.shaders
    }

    pub fn objects(&self) -> &RenderObjects {
        &self.objects
    }

    pub fn object(&self, id: RenderObjectId) -> Option<&RenderObject> {
        self.objects.get(id)
    }

    pub fn coordinator(&self) -> &EffectCoordinator {
        &self.coordinator
    }

    pub fn commands(&self) -> &CommandBufferPool {
        &self.commands
    }

    pub fn player_stats(&self) -> PlayerStats {
        self.player.last_stats()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn capture_framebuffer(&self) -> Option<FramebufferHandle> {
        self.capture.map(|capture| capture.framebuffer)
    }

    pub fn capture_size(&self) -> Option<Size> {
        self.capture.map(|capture| capture.size)
    }

    /// Whether the capture changed since the last frame.
    pub fn capture_changed(&self) -> bool {
        self.capture_changed
    }

    /// Uploads a captured frame, creating or resizing the capture target first.
    pub fn update_capture(&mut self, frame: &CaptureFrame) -> Result<()> {
        let expected = frame.size.width as usize * frame.size.height as usize * 4;
        if frame.size.is_empty() || frame.pixels.len() != expected {
            log::error!(
                "capture of {}x{} with {} bytes ignored",
                frame.size.width,
                frame.size.height,
                frame.pixels.len()
            );
            return Ok(());
        }

        let framebuffer = match self.capture {
            Some(capture) if capture.size == frame.size => capture.framebuffer,
            Some(capture) => {
                self.resources.framebuffers.resize(
                    &mut self.backend,
                    &mut self.resources.textures,
                    capture.framebuffer,
                    frame.size,
                )?;
                if self.resources.framebuffers.sampled_size(capture.framebuffer) != Some(frame.size) {
                    return Ok(());
                }
                log::info!("capture resized to {}x{}", frame.size.width, frame.size.height);
                capture.framebuffer
            }
            None => {
                let framebuffer = self.resources.framebuffers.create(
                    &mut self.backend,
                    &mut self.resources.textures,
                    FramebufferSpecification::color(frame.size),
                )?;
                log::info!("capture target {}x{} created", frame.size.width, frame.size.height);
                framebuffer
            }
        };
        self.capture = Some(Capture {
            framebuffer,
            size: frame.size,
        });

        let texture = self
            .resources
            .framebuffers
            .color_attachment(framebuffer)
            .ok_or(GlassError::UnknownHandle {
                kind: "framebuffer",
                id: framebuffer.raw(),
            })?;
        self.resources
            .textures
            .upload(&mut self.backend, texture, &frame.pixels);
        self.capture_changed = true;
        Ok(())
    }

    /// Uploads `image` as an alpha mask.
    pub fn create_mask(&mut self, image: &image::RgbaImage, flipped: bool) -> Result<Mask> {
        let size = Size::new(image.width(), image.height());
        let texture = self.resources.textures.create(
            &mut self.backend,
            TextureDescriptor {
                label: "mask".to_owned(),
                size,
                format: PixelFormat::Rgba8,
                mipmaps: false,
            },
        )?;
        self.resources
            .textures
            .upload(&mut self.backend, texture, image.as_raw());
        Ok(Mask {
            texture,
            size,
            flipped,
        })
    }

    /// Attaches a new blurred region.
    pub fn attach(&mut self, rect: Rect, style: Style) -> RenderObjectId {
        let id = self.objects.insert(
            rect,
            style,
            self.config.downsample_factor,
            self.config.preprocess_margin,
        );
        log::debug!("attached render object {:?} at {:?}", id, rect);
        id
    }

    /// Returns `false` for unknown ids.
    pub fn update(&mut self, id: RenderObjectId, rect: Rect, style: Style) -> bool {
        let Some(object) = self.objects.get_mut(id) else {
            log::warn!("update of unknown render object {:?}", id);
            return false;
        };
        object.set_rect(rect);
        object.set_style(style);
        true
    }

    /// Moves a region by `(dx, dy)` capture pixels.
    pub fn offset(&mut self, id: RenderObjectId, dx: f32, dy: f32) -> bool {
        let Some(object) = self.objects.get_mut(id) else {
            log::warn!("offset of unknown render object {:?}", id);
            return false;
        };
        object.offset_by(dx, dy);
        true
    }

    pub fn set_mask(&mut self, id: RenderObjectId, mask: Option<Mask>) -> bool {
        self.with_object(id, |object| object.set_mask(mask))
    }

    pub fn set_z_index(&mut self, id: RenderObjectId, z_index: i32) -> bool {
        self.with_object(id, |object| object.set_z_index(z_index))
    }

    /// Composites `id` into `destination` instead of the default framebuffer.
    pub fn set_destination(&mut self, id: RenderObjectId, destination: FramebufferHandle) -> bool {
        self.with_object(id, |object| object.set_destination(destination))
    }

    /// An unpooled RGBA8 framebuffer that render objects can composite into.
    pub fn create_target(&mut self, size: Size) -> Result<FramebufferHandle> {
        self.resources.framebuffers.create(
            &mut self.backend,
            &mut self.resources.textures,
            FramebufferSpecification::color(size),
        )
    }

    fn with_object(&mut self, id: RenderObjectId, f: impl FnOnce(&mut RenderObject)) -> bool {
        match self.objects.get_mut(id) {
            Some(object) => {
                f(object);
                true
            }
            None => {
                log::warn!("unknown render object {:?}", id);
                false
            }
        }
    }

    /// Removes a region. Its effect chain is disposed at the next frame.
    pub fn detach(&mut self, id: RenderObjectId) -> bool {
        if self.objects.remove(id).is_none() {
            log::warn!("detach of unknown render object {:?}", id);
            return false;
        }
        self.intents.retain(|_, object| *object != id);
        self.coordinator.retire(id);
        log::debug!("detached render object {:?}", id);
        true
    }

    /// Reconciles the regions of `intent` with the live render objects:
    /// new keys are attached, known keys updated, missing keys detached.
    pub fn apply_intent(&mut self, intent: FrameIntent) {
        let mut seen = HashMap::with_capacity(intent.regions.len());
        for region in intent.regions {
            let id = match self.intents.get(&region.key).copied() {
                Some(id) if self.objects.get(id).is_some() => {
                    self.update(id, region.rect, region.style);
                    id
                }
                _ => self.attach(region.rect, region.style),
            };
            self.set_z_index(id, region.z_index);
            seen.insert(region.key, id);
        }

        let gone: Vec<RenderObjectId> = self
            .intents
            .iter()
            .filter(|(key, _)| !seen.contains_key(*key))
            .map(|(_, id)| *id)
            .collect();
        for id in gone {
            self.detach(id);
        }
        self.intents = seen;
    }

    /// Id of the object created for an intent key.
    pub fn intent_object(&self, key: &str) -> Option<RenderObjectId> {
        self.intents.get(key).copied()
    }

    /// Queues host quads drawn on top of the next frame.
    pub fn submit_overlay(&mut self, overlay: Overlay) {
        self.batch.submit(overlay);
    }

    pub fn resize_destination(&mut self, size: Size) {
        self.backend.resize_default_framebuffer(size);
    }

    /// Records and plays one frame.
    pub fn render_frame(&mut self) -> Result<FrameStats> {
        let started = instant::Instant::now();
        self.frame_index += 1;

        self.coordinator
            .dispose_retired(&mut self.backend, &mut self.resources);
        self.coordinator
            .evict_unused_noise(&mut self.backend, &mut self.resources);
        self.resources.framebuffers.reset_pool_usage();
        self.commands.reset(false);

        let destination_size = self.backend.default_framebuffer_size();
        let mut stats = FrameStats {
            frame_index: self.frame_index,
            capture_changed: self.capture_changed,
            ..FrameStats::default()
        };

        {
            let mut encoder = CommandEncoder::new(&mut self.commands);
            encoder.set_render_target(FramebufferHandle::DEFAULT);
            encoder.set_viewport(PixelRect::of_size(destination_size));
            encoder.clear(self.config.clear_color);

            match self.capture {
                Some(capture) => {
                    let frame = FrameContext {
                        capture: capture.framebuffer,
                        capture_size: capture.size,
                        destination_size,
                        frame_index: self.frame_index,
                    };
                    let mut cx = EffectContext {
                        backend: &mut self.backend,
                        resources: &mut self.resources,
                        encoder: &mut encoder,
                        quad: &mut self.quad,
                        shaders: &self.shaders,
                        config: &self.config,
                        frame: &frame,
                    };
                    for object in self.objects.ordered() {
                        let mark = cx.encoder.recorded();
                        match self.coordinator.render(&mut cx, object) {
                            Ok(Some(report)) => stats.reports.push((object.id(), report)),
                            Ok(None) => {}
                            Err(e) => {
                                log::error!("render object {:?} skipped: {}", object.id(), e);
                                // the dropped commands may have carried uniform uploads
                                cx.encoder.rewind(mark);
                                cx.quad.invalidate();
                                stats.failed.push(object.id());
                            }
                        }
                    }
                }
                None if !self.objects.is_empty() => {
                    log::debug!("no capture yet, {} render objects wait", self.objects.len());
                }
                None => {}
            }

            stats.overlays = self.batch.flush(
                &mut encoder,
                &mut self.quad,
                FramebufferHandle::DEFAULT,
                destination_size,
            );
            stats.commands_recorded = encoder.recorded();
        }

        stats.player = self.player.execute(
            &mut self.backend,
            &self.resources,
            self.commands.commands(),
        );
        self.backend.flush();

        self.capture_changed = false;
        stats.objects_rendered = stats.reports.len();
        stats.duration = started.elapsed();
        log::debug!(
            "frame {}: {} objects, {} commands, {} draws in {:?}",
            stats.frame_index,
            stats.objects_rendered,
            stats.commands_recorded,
            stats.player.draws,
            stats.duration
        );
        Ok(stats)
    }

    /// Destroys every native object the engine created. The engine cannot
    /// draw afterwards; this runs on drop.
    pub fn release_resources(&mut self) {
        self.coordinator
            .dispose_all(&mut self.backend, &mut self.resources);
        self.resources.destroy_all(&mut self.backend);
        self.capture = None;
        self.player.reset_state_cache();
    }

    /// Clears every framebuffer and forgets the cached driver state.
    pub fn erase_framebuffers(&mut self) {
        self.resources.framebuffers.erase_all(&mut self.backend);
        self.player.reset_state_cache();
    }
}

impl<B: GraphicsBackend> Drop for Context<B> {
    fn drop(&mut self) {
        self.release_resources();
    }
}
