use flow_glass::{
    backend::headless::DriverCall,
    context::{CaptureFrame, FrameIntent},
    data_structures::{
        geometry::{Rect, Size},
        render_object::RenderObjectId,
        style::Style,
    },
    renderers::batch::{Overlay, OverlayQuad},
};

use crate::common::test_utils::{captured_engine, gradient_capture, headless_engine, SCREEN};

mod common;

#[test]
fn derived_rect_follows_offsets() {
    let mut engine = headless_engine();
    let id = engine.attach(Rect::new(40.0, 80.0, 200.0, 100.0), Style::default());
    let object = engine.object(id).unwrap();
    assert_eq!(object.scaled_rect(), Rect::new(10.0, 20.0, 50.0, 25.0));
    assert_eq!(object.target_size(), Size::new(60, 35));

    assert!(engine.offset(id, 20.0, -40.0));
    let object = engine.object(id).unwrap();
    assert_eq!(object.rect(), Rect::new(60.0, 40.0, 200.0, 100.0));
    assert_eq!(object.scaled_rect(), Rect::new(15.0, 10.0, 50.0, 25.0));
    assert_eq!(object.target_size(), Size::new(60, 35));

    assert!(!engine.offset(RenderObjectId(999), 1.0, 1.0));
}

#[test]
fn update_replaces_rect_and_style() {
    let mut engine = headless_engine();
    let id = engine.attach(Rect::new(0.0, 0.0, 40.0, 40.0), Style::default());
    let style = Style::default().with_opacity(0.5).with_passes(2);

    assert!(engine.update(id, Rect::new(0.0, 0.0, 80.0, 40.0), style));
    let object = engine.object(id).unwrap();
    assert_eq!(*object.style(), style);
    assert_eq!(object.scaled_rect(), Rect::new(0.0, 0.0, 20.0, 10.0));
}

#[test]
fn capture_is_created_then_resized_in_place() {
    let mut engine = headless_engine();
    assert_eq!(engine.capture_framebuffer(), None);

    engine.update_capture(&gradient_capture(SCREEN)).unwrap();
    let framebuffer = engine.capture_framebuffer().unwrap();
    assert_eq!(engine.capture_size(), Some(SCREEN));
    assert!(engine.capture_changed());

    engine.render_frame().unwrap();
    assert!(!engine.capture_changed());

    let smaller = Size::new(640, 360);
    engine.update_capture(&gradient_capture(smaller)).unwrap();
    assert_eq!(engine.capture_framebuffer(), Some(framebuffer));
    assert_eq!(engine.capture_size(), Some(smaller));
    assert_eq!(
        engine.resources().framebuffers.sampled_size(framebuffer),
        Some(smaller)
    );
}

#[test]
fn malformed_captures_are_ignored() {
    let mut engine = headless_engine();
    let frame = CaptureFrame::new(Size::new(4, 4), vec![0; 10]);
    engine.update_capture(&frame).unwrap();
    assert_eq!(engine.capture_framebuffer(), None);
    assert!(!engine.capture_changed());
}

#[test]
fn solid_capture_is_uploaded() {
    let mut engine = headless_engine();
    engine
        .update_capture(&CaptureFrame::solid(Size::new(16, 8), [255, 0, 0, 255]))
        .unwrap();
    assert_eq!(
        engine
            .backend()
            .count_calls(|call| matches!(call, DriverCall::UploadTexture { size, .. } if *size == Size::new(16, 8))),
        1
    );
}

#[test]
fn intent_attaches_updates_and_detaches() {
    let mut engine = captured_engine();

    engine.apply_intent(
        FrameIntent::new()
            .with_region("sidebar", Rect::new(0.0, 0.0, 200.0, 600.0), Style::default(), 0)
            .with_region("dock", Rect::new(300.0, 500.0, 400.0, 80.0), Style::default(), 1),
    );
    assert_eq!(engine.objects().len(), 2);
    let sidebar = engine.intent_object("sidebar").unwrap();
    let dock = engine.intent_object("dock").unwrap();
    assert_eq!(engine.object(dock).unwrap().z_index(), 1);
    engine.render_frame().unwrap();

    let moved = Rect::new(0.0, 0.0, 240.0, 600.0);
    engine.apply_intent(FrameIntent::new().with_region("sidebar", moved, Style::default(), 3));
    assert_eq!(engine.objects().len(), 1);
    assert_eq!(engine.intent_object("sidebar"), Some(sidebar));
    assert_eq!(engine.intent_object("dock"), None);
    assert_eq!(engine.object(sidebar).unwrap().rect(), moved);
    assert_eq!(engine.object(sidebar).unwrap().z_index(), 3);
    assert_eq!(engine.coordinator().pending_disposal(), 1);

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.objects_rendered, 1);
    assert_eq!(engine.coordinator().len(), 1);
}

#[test]
fn overlays_are_drawn_after_the_regions() {
    let mut engine = captured_engine();
    engine.attach(Rect::new(100.0, 100.0, 200.0, 150.0), Style::default());
    let texture = engine
        .create_mask(&image::RgbaImage::new(4, 4), false)
        .unwrap()
        .texture;
    let copy = engine.shaders().copy;

    engine.submit_overlay(Overlay::Transparent(OverlayQuad {
        shader: copy,
        texture,
        rect: Rect::new(10.0, 10.0, 50.0, 50.0),
        alpha: 0.5,
        z_index: 0,
    }));
    let stats = engine.render_frame().unwrap();

    assert_eq!(stats.overlays.transparent_draws, 1);
    let calls = engine.backend().calls();
    let last_blit = calls
        .iter()
        .rposition(|call| matches!(call, DriverCall::Blit { .. }))
        .unwrap();
    let last_draw = calls
        .iter()
        .rposition(|call| matches!(call, DriverCall::DrawIndexed { framebuffer: None, .. }))
        .unwrap();
    assert!(last_blit < last_draw);
}

#[test]
fn released_engine_leaves_no_native_objects() {
    let mut engine = captured_engine();
    let id = engine.attach(
        Rect::new(100.0, 100.0, 200.0, 150.0),
        Style::default().with_noise_factor(0.2),
    );
    engine.render_frame().unwrap();
    assert!(engine.coordinator().contains(id));
    assert!(engine.backend().live_textures() > 0);

    engine.release_resources();
    let backend = engine.backend();
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_framebuffers(), 0);
    assert_eq!(backend.live_programs(), 0);
    assert_eq!(backend.live_vertex_arrays(), 0);
    assert!(engine.coordinator().is_empty());
    assert_eq!(engine.capture_framebuffer(), None);
}
