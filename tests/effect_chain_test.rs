use flow_glass::{
    backend::{
        headless::{DriverCall, HeadlessBackend},
        GraphicsBackend, NativeId,
    },
    commands::UniformData,
    context::Context,
    data_structures::{
        geometry::{PixelRect, Rect, Size},
        style::{EdgeTreatment, Style},
    },
    handle::{FramebufferHandle, ShaderProgramHandle},
    pipelines::blend::BlendPath,
    resources::framebuffer::FramebufferSpecification,
};

use crate::common::test_utils::{blits, captured_engine, headless_engine};

mod common;

fn region() -> Rect {
    Rect::from_corners(100.0, 100.0, 300.0, 250.0)
}

fn native(engine: &Context<HeadlessBackend>, shader: ShaderProgramHandle) -> NativeId {
    engine.resources().shaders.native(shader).unwrap()
}

#[test]
fn blurred_region_ends_with_one_foreground_blit() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default());

    let stats = engine.render_frame().unwrap();
    let backend = engine.backend();

    assert_eq!(backend.draws_with("blur_down"), 3);
    assert_eq!(backend.draws_with("blur_up"), 3);
    assert_eq!(backend.draws_with("preprocess_aa"), 1);
    assert_eq!(stats.reports.len(), 1);
    assert_eq!(stats.reports[0].0, id);
    assert!(stats.reports[0].1.blurred);
    assert_eq!(stats.reports[0].1.blend, BlendPath::ForegroundOnly);

    let blits = blits(backend);
    assert_eq!(blits.len(), 3);
    let last = blits.last().unwrap();
    assert_eq!(last.destination, None);
    assert_eq!(last.destination_rect, PixelRect::new(100, 100, 200, 150));
    assert_eq!(blits.iter().filter(|b| b.destination.is_none()).count(), 1);

    let calls = backend.calls();
    let last_draw = calls
        .iter()
        .rposition(|call| matches!(call, DriverCall::DrawIndexed { .. }))
        .unwrap();
    let last_blit = calls
        .iter()
        .rposition(|call| matches!(call, DriverCall::Blit { .. }))
        .unwrap();
    assert!(last_draw < last_blit);

    assert_eq!(stats.player.draws, 7);
    assert_eq!(stats.player.blits, 3);
    assert_eq!(stats.player.skipped, 0);
}

#[test]
fn small_radius_copies_without_blurring() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default().with_blur_radius(1.0));
    let target = engine.object(id).unwrap().target_size();

    let stats = engine.render_frame().unwrap();
    let backend = engine.backend();

    assert_eq!(backend.draws_with("blur_down"), 0);
    assert_eq!(backend.draws_with("blur_up"), 0);
    assert!(!stats.reports[0].1.blurred);

    let whole = PixelRect::of_size(target);
    let direct = blits(backend)
        .into_iter()
        .filter(|b| b.source_rect == whole && b.destination_rect == whole)
        .count();
    assert_eq!(direct, 1);
}

#[test]
fn second_frame_reuses_pooled_framebuffers() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default());
    let target = engine.object(id).unwrap().target_size();

    engine.render_frame().unwrap();
    let framebuffers = engine.backend().framebuffer_allocations();
    let textures = engine.backend().texture_allocations();

    engine.render_frame().unwrap();
    assert_eq!(engine.backend().framebuffer_allocations(), framebuffers);
    assert_eq!(engine.backend().texture_allocations(), textures);

    // preprocess output, blur output and the first chain entry
    let spec = FramebufferSpecification::color(target);
    assert_eq!(engine.resources().framebuffers.bucket_len(&spec), 3);
    assert_eq!(engine.resources().framebuffers.bucket_in_use(&spec), 3);
}

#[test]
fn half_opacity_blends_background_and_foreground() {
    let mut engine = captured_engine();
    engine.attach(region(), Style::default().with_opacity(0.5));

    let stats = engine.render_frame().unwrap();
    let backend = engine.backend();

    assert_eq!(stats.reports[0].1.blend, BlendPath::Blended);
    assert_eq!(backend.draws_with("copy"), 2);
    assert!(blits(backend).iter().all(|b| b.destination.is_some()));
}

#[test]
fn transparent_region_shows_background_only() {
    let mut engine = captured_engine();
    engine.attach(region(), Style::default().with_opacity(0.05));

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.reports[0].1.blend, BlendPath::BackgroundOnly);

    let capture = engine.capture_framebuffer().unwrap();
    let capture_native = engine.resources().framebuffers.get(capture).unwrap().native();
    let last = blits(engine.backend()).pop().unwrap();
    assert_eq!(last.source, Some(capture_native));
    assert_eq!(last.destination, None);
    assert_eq!(last.source_rect, PixelRect::new(100, 100, 200, 150));
}

#[test]
fn noise_texture_is_generated_once() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default().with_noise_factor(0.3));

    let stats = engine.render_frame().unwrap();
    assert!(stats.reports[0].1.noise);
    assert_eq!(engine.backend().draws_with("copy"), 1);
    let noise = engine.coordinator().chain(id).unwrap().noise.texture();
    assert!(noise.is_some());

    let textures = engine.backend().texture_allocations();
    engine.render_frame().unwrap();
    assert_eq!(engine.backend().texture_allocations(), textures);
    assert_eq!(engine.coordinator().chain(id).unwrap().noise.texture(), noise);
}

#[test]
fn masked_region_composites_through_the_mask() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default());
    let image = image::RgbaImage::from_pixel(32, 32, image::Rgba([0, 0, 0, 255]));
    let mask = engine.create_mask(&image, true).unwrap();
    assert!(engine.set_mask(id, Some(mask)));

    let stats = engine.render_frame().unwrap();
    assert!(stats.reports[0].1.masked);
    assert_eq!(engine.backend().draws_with("mask"), 1);

    let last = blits(engine.backend()).pop().unwrap();
    assert_eq!(last.source_rect, PixelRect::of_size(Size::new(32, 32)));
    assert_eq!(last.destination_rect, PixelRect::new(100, 100, 200, 150));
}

#[test]
fn offscreen_destination_is_scaled() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default());
    let target = engine.create_target(Size::new(500, 300)).unwrap();
    assert!(engine.set_destination(id, target));
    let target_native = engine.resources().framebuffers.get(target).unwrap().native();

    engine.render_frame().unwrap();
    let last = blits(engine.backend()).pop().unwrap();
    assert_eq!(last.destination, Some(target_native));
    assert_eq!(last.destination_rect, PixelRect::new(50, 50, 100, 75));
}

#[test]
fn objects_render_in_z_order() {
    let mut engine = captured_engine();
    let top = engine.attach(region(), Style::default());
    let bottom = engine.attach(Rect::new(400.0, 200.0, 120.0, 80.0), Style::default());
    engine.set_z_index(top, 5);

    let stats = engine.render_frame().unwrap();
    let order: Vec<_> = stats.reports.iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![bottom, top]);
}

#[test]
fn regions_outside_the_capture_are_skipped() {
    let mut engine = captured_engine();
    engine.attach(Rect::new(2000.0, 2000.0, 100.0, 100.0), Style::default());

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.objects_rendered, 0);
    assert_eq!(engine.backend().draws_with("blur_down"), 0);
}

#[test]
fn nothing_is_drawn_before_the_first_capture() {
    let mut engine = headless_engine();
    engine.attach(region(), Style::default());

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.objects_rendered, 0);
    assert_eq!(stats.player.draws, 0);
    assert!(engine.backend().calls().contains(&DriverCall::Flush));
}

#[test]
fn detached_chains_are_disposed_next_frame() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default().with_noise_factor(0.3));
    engine.render_frame().unwrap();
    assert!(engine.coordinator().contains(id));

    assert!(engine.detach(id));
    assert!(!engine.detach(id));
    assert_eq!(engine.coordinator().pending_disposal(), 1);

    engine.backend_mut().clear_calls();
    engine.render_frame().unwrap();
    assert!(engine.coordinator().is_empty());
    assert!(engine.coordinator().noise_textures().is_empty());
    assert_eq!(
        engine
            .backend()
            .count_calls(|call| matches!(call, DriverCall::DestroyTexture(_))),
        1
    );
}

#[test]
fn equal_sized_regions_share_one_noise_texture() {
    let mut engine = captured_engine();
    let style = Style::default().with_noise_factor(0.3);
    let a = engine.attach(region(), style);
    let b = engine.attach(region().offset(400.0, 200.0), style);
    assert_eq!(
        engine.object(a).unwrap().target_size(),
        engine.object(b).unwrap().target_size()
    );

    engine.render_frame().unwrap();
    let coordinator = engine.coordinator();
    let noise = coordinator.chain(a).unwrap().noise.texture();
    assert!(noise.is_some());
    assert_eq!(coordinator.chain(b).unwrap().noise.texture(), noise);
    assert_eq!(coordinator.noise_textures().len(), 1);

    let backend = engine.backend();
    let grain_textures = backend.count_calls(|call| match call {
        DriverCall::CreateTexture { texture, .. } => backend
            .texture_descriptor(*texture)
            .is_some_and(|desc| desc.label == "noise"),
        _ => false,
    });
    assert_eq!(grain_textures, 1);
}

#[test]
fn noise_texture_is_dropped_when_grain_is_switched_off() {
    let mut engine = captured_engine();
    let id = engine.attach(region(), Style::default().with_noise_factor(0.3));
    engine.render_frame().unwrap();
    assert_eq!(engine.coordinator().noise_textures().len(), 1);

    assert!(engine.update(id, region(), Style::default()));
    engine.render_frame().unwrap();
    engine.render_frame().unwrap();
    assert!(engine.coordinator().noise_textures().is_empty());
    assert_eq!(engine.coordinator().chain(id).unwrap().noise.texture(), None);
}

#[test]
fn seam_hiding_uses_the_edge_program_with_its_parameters() {
    let mut engine = captured_engine();
    engine.attach(
        region(),
        Style::default().with_edge_treatment(EdgeTreatment::SeamHiding {
            corner_radius: 16.0,
            falloff: 8.0,
        }),
    );

    engine.render_frame().unwrap();
    let backend = engine.backend();
    assert_eq!(backend.draws_with("preprocess_edge"), 1);
    assert_eq!(backend.draws_with("preprocess_aa"), 0);

    // a 240x190 crop into a 60x48 target scales by a quarter
    let edge = native(&engine, engine.shaders().seam_hiding.shader);
    assert_eq!(backend.uniform_value(edge, "u_corner_radius"), Some(&UniformData::Float(4.0)));
    assert_eq!(backend.uniform_value(edge, "u_falloff"), Some(&UniformData::Float(2.0)));
    assert_eq!(backend.uniform_value(edge, "u_rect_size"), Some(&UniformData::Vec2([60.0, 48.0])));
    assert!(matches!(backend.uniform_value(edge, "u_lod"), Some(UniformData::Float(_))));
}

#[test]
fn tint_only_reaches_the_final_upsample() {
    let mut engine = captured_engine();
    let tint = [0.2, 0.4, 0.6, 0.5];
    engine.attach(region(), Style::default().with_tint(tint));
    engine.render_frame().unwrap();

    let backend = engine.backend();
    let blur_up = native(&engine, engine.shaders().blur_up.shader);
    let tint_location = backend.uniform_location(blur_up, "u_tint").unwrap();

    // replay the log: the tint a draw sees is the last one set on its program
    let mut current = [0.0; 4];
    let mut upsamples = Vec::new();
    for call in backend.calls() {
        match call {
            DriverCall::SetUniform {
                program,
                location,
                value: UniformData::Vec4(value),
            } if *program == blur_up && *location == tint_location => current = *value,
            DriverCall::DrawIndexed {
                program,
                framebuffer,
                ..
            } if *program == blur_up => upsamples.push((*framebuffer, current)),
            _ => {}
        }
    }
    assert_eq!(upsamples.len(), 3);

    let blur_output = blits(backend).pop().unwrap().source;
    for (framebuffer, seen) in &upsamples {
        if *framebuffer == blur_output {
            assert_eq!(*seen, tint);
        } else {
            assert_eq!(*seen, [0.0; 4]);
        }
    }
    assert_eq!(upsamples.last().unwrap().0, blur_output);
    assert_eq!(upsamples.iter().filter(|(_, seen)| *seen != [0.0; 4]).count(), 1);
}

#[test]
fn partly_offscreen_region_composites_its_visible_part() {
    let mut engine = captured_engine();
    engine.attach(Rect::new(-100.0, 100.0, 200.0, 150.0), Style::default());

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.objects_rendered, 1);

    let last = blits(engine.backend()).pop().unwrap();
    assert_eq!(last.destination, None);
    assert_eq!(last.destination_rect, PixelRect::new(0, 100, 100, 150));

    // source and destination keep the aspect of the visible part
    let sx = last.source_rect.width as f32 / last.destination_rect.width as f32;
    let sy = last.source_rect.height as f32 / last.destination_rect.height as f32;
    assert!((sx - sy).abs() < 0.02, "source {:?}", last.source_rect);
}

#[test]
fn partly_offscreen_mask_is_sampled_over_the_visible_part() {
    let mut engine = captured_engine();
    let id = engine.attach(Rect::new(-100.0, 100.0, 200.0, 150.0), Style::default());
    let image = image::RgbaImage::from_pixel(32, 32, image::Rgba([0, 0, 0, 255]));
    let mask = engine.create_mask(&image, false).unwrap();
    assert!(engine.set_mask(id, Some(mask)));

    engine.render_frame().unwrap();
    let mask_program = native(&engine, engine.shaders().mask.shader);
    assert_eq!(
        engine.backend().uniform_value(mask_program, "u_mask_uv"),
        Some(&UniformData::Vec4([0.5, 0.0, 1.0, 1.0]))
    );
    let last = blits(engine.backend()).pop().unwrap();
    assert_eq!(last.destination_rect, PixelRect::new(0, 100, 100, 150));
}

#[test]
fn oversized_region_is_clamped_and_rendered() {
    let mut engine = captured_engine();
    engine.attach(region(), Style::default());
    let wide = engine.attach(Rect::new(-20000.0, 100.0, 45000.0, 100.0), Style::default());
    engine.set_z_index(wide, 1);
    let limit = engine.backend().max_texture_size();

    let stats = engine.render_frame().unwrap();
    assert!(stats.failed.is_empty());
    assert_eq!(stats.objects_rendered, 2);
    assert!(engine.backend().calls().iter().all(|call| match call {
        DriverCall::CreateTexture { size, .. } => size.fits_within(limit),
        _ => true,
    }));

    let last = blits(engine.backend()).pop().unwrap();
    assert_eq!(last.destination_rect, PixelRect::new(0, 100, 1000, 100));
}

#[test]
fn failing_object_is_skipped_and_uniforms_are_resent() {
    let mut engine = captured_engine();
    let broken = engine.attach(region(), Style::default());
    let healthy = engine.attach(Rect::new(400.0, 200.0, 200.0, 150.0), Style::default());
    engine.set_z_index(healthy, 1);
    // unknown destination: the chain records preprocess and blur, then fails
    assert!(engine.set_destination(broken, FramebufferHandle::from_raw(999)));

    let stats = engine.render_frame().unwrap();
    assert_eq!(stats.failed, vec![broken]);
    assert_eq!(stats.reports.len(), 1);
    assert_eq!(stats.reports[0].0, healthy);
    assert_eq!(stats.player.draws, 7);

    let backend = engine.backend();
    assert_eq!(backend.draws_with("preprocess_aa"), 1);
    for shader in [
        engine.shaders().preprocess.shader,
        engine.shaders().blur_down.shader,
        engine.shaders().blur_up.shader,
    ] {
        let program = native(&engine, shader);
        assert!(
            matches!(backend.uniform_value(program, "u_view_proj"), Some(UniformData::Mat4(_))),
            "{:?} never received u_view_proj",
            backend.program_label(program)
        );
    }

    let last = blits(backend).pop().unwrap();
    assert_eq!(last.destination, None);
    assert_eq!(last.destination_rect, PixelRect::new(400, 200, 200, 150));
}
