#![allow(dead_code)]

use flow_glass::{
    backend::{
        headless::{DriverCall, HeadlessBackend},
        NativeId,
    },
    context::{CaptureFrame, Context, EngineConfig},
    data_structures::geometry::{PixelRect, Size},
};

/// Screen size used by the end-to-end scenarios.
pub(crate) const SCREEN: Size = Size::new(1000, 600);

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An engine on a headless backend whose destination matches [`SCREEN`].
pub(crate) fn headless_engine() -> Context<HeadlessBackend> {
    headless_engine_with(EngineConfig::default())
}

pub(crate) fn headless_engine_with(config: EngineConfig) -> Context<HeadlessBackend> {
    init_logger();
    Context::new(HeadlessBackend::new(SCREEN), config).expect("headless engine")
}

/// A capture with a horizontal gradient so neighbouring regions differ.
pub(crate) fn gradient_capture(size: Size) -> CaptureFrame {
    let image = image::RgbaImage::from_fn(size.width, size.height, |x, y| {
        image::Rgba([
            (x * 255 / size.width.max(1)) as u8,
            (y * 255 / size.height.max(1)) as u8,
            128,
            255,
        ])
    });
    image.into()
}

/// An engine that already holds a [`SCREEN`]-sized capture.
pub(crate) fn captured_engine() -> Context<HeadlessBackend> {
    let mut engine = headless_engine();
    engine
        .update_capture(&gradient_capture(SCREEN))
        .expect("capture upload");
    engine.backend_mut().clear_calls();
    engine
}

pub(crate) struct Blit {
    pub(crate) source: Option<NativeId>,
    pub(crate) destination: Option<NativeId>,
    pub(crate) source_rect: PixelRect,
    pub(crate) destination_rect: PixelRect,
}

/// Every blit the driver saw, in order.
pub(crate) fn blits(backend: &HeadlessBackend) -> Vec<Blit> {
    backend
        .calls()
        .iter()
        .filter_map(|call| match call {
            DriverCall::Blit {
                source,
                destination,
                source_rect,
                destination_rect,
                ..
            } => Some(Blit {
                source: *source,
                destination: *destination,
                source_rect: *source_rect,
                destination_rect: *destination_rect,
            }),
            _ => None,
        })
        .collect()
}
