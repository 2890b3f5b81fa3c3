//! Renders through a real `wgpu` device. Needs an adapter, so these only run
//! with `--features integration-tests`.

#[cfg(feature = "integration-tests")]
mod common;

#[cfg(feature = "integration-tests")]
fn wgpu_engine(size: flow_glass::Size) -> flow_glass::Context<flow_glass::backend::gpu::WgpuBackend> {
    use flow_glass::backend::gpu::{WgpuBackend, WgpuConfig};

    crate::common::test_utils::init_logger();
    let backend = WgpuBackend::new_blocking(WgpuConfig {
        default_size: size,
        ..WgpuConfig::default()
    })
    .unwrap();
    flow_glass::Context::new(backend, flow_glass::EngineConfig::default()).unwrap()
}

#[cfg(feature = "integration-tests")]
fn assert_close(pixel: image::Rgba<u8>, expected: [u8; 4]) {
    for (got, want) in pixel.0.iter().zip(expected) {
        assert!(
            got.abs_diff(want) <= 8,
            "pixel {:?} differs from {:?}",
            pixel.0,
            expected
        );
    }
}

#[test]
#[cfg(feature = "integration-tests")]
fn solid_capture_stays_solid_after_blurring() {
    use flow_glass::{CaptureFrame, Rect, Size, Style};

    let size = Size::new(64, 64);
    let mut engine = wgpu_engine(size);
    engine
        .update_capture(&CaptureFrame::solid(size, [255, 0, 0, 255]))
        .unwrap();
    engine.attach(Rect::new(0.0, 0.0, 64.0, 64.0), Style::default());

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.objects_rendered, 1);

    let image = engine.backend_mut().read_default_framebuffer().unwrap();
    assert_eq!(image.dimensions(), (64, 64));
    assert_close(*image.get_pixel(32, 32), [255, 0, 0, 255]);
}

#[test]
#[cfg(feature = "integration-tests")]
fn uncovered_pixels_keep_the_clear_colour() {
    use flow_glass::{CaptureFrame, EngineConfig, Rect, Size, Style};

    let size = Size::new(64, 64);
    let mut engine = wgpu_engine(size);
    assert_eq!(engine.config().clear_color, EngineConfig::default().clear_color);
    engine
        .update_capture(&CaptureFrame::solid(size, [0, 0, 255, 255]))
        .unwrap();
    engine.attach(Rect::new(0.0, 0.0, 32.0, 64.0), Style::default());
    engine.render_frame().unwrap();

    let image = engine.backend_mut().read_default_framebuffer().unwrap();
    assert_close(*image.get_pixel(8, 32), [0, 0, 255, 255]);
    assert_close(*image.get_pixel(56, 32), [0, 0, 0, 0]);
}
