use flow_glass::{
    backend::{headless::HeadlessBackend, GraphicsBackend},
    context::{Context, EngineConfig, FrameIntent},
    data_structures::{geometry::Rect, style::Style},
    error::GlassError,
    flow::{Readiness, RenderThread},
};

use crate::common::test_utils::{gradient_capture, SCREEN};

mod common;

fn spawn_headless() -> RenderThread<HeadlessBackend> {
    RenderThread::spawn(|| {
        let mut context = Context::new(HeadlessBackend::new(SCREEN), EngineConfig::default())?;
        context.update_capture(&gradient_capture(SCREEN))?;
        Ok(context)
    })
    .unwrap()
}

#[test]
fn thread_becomes_ready_and_answers_calls() {
    let thread = spawn_headless();
    thread.wait_ready_blocking().unwrap();
    assert_eq!(thread.readiness(), Readiness::Ready);

    let handle = thread.handle();
    let name = handle.call_blocking(|cx| cx.backend().name()).unwrap();
    assert_eq!(name, "headless");
    thread.shutdown();
}

#[test]
fn failing_factory_reports_its_error() {
    let thread: RenderThread<HeadlessBackend> =
        RenderThread::spawn(|| Err(anyhow::anyhow!("no adapter found"))).unwrap();

    let err = thread.wait_ready_blocking().unwrap_err();
    assert!(matches!(&err, GlassError::BackendInit(message) if message.contains("no adapter found")));
    assert!(matches!(thread.readiness(), Readiness::Failed(_)));

    let handle = thread.handle();
    let result = handle.call_blocking(|cx| cx.frame_index());
    assert!(matches!(result, Err(GlassError::ThreadGone)));
}

#[test]
fn jobs_run_in_submission_order() {
    let thread = spawn_headless();
    let handle = thread.handle();

    let producer = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            for x in 0..4 {
                handle
                    .submit(move |cx| {
                        cx.attach(Rect::new(x as f32 * 100.0, 0.0, 80.0, 80.0), Style::default());
                    })
                    .unwrap();
            }
        })
    };
    producer.join().unwrap();

    let count = handle.call_blocking(|cx| cx.objects().len()).unwrap();
    assert_eq!(count, 4);
    thread.shutdown();
}

#[test]
fn intents_are_reconciled_and_rendered() {
    let thread = spawn_headless();
    let handle = thread.handle();

    handle
        .submit_intent(
            FrameIntent::new()
                .with_region("a", Rect::new(10.0, 10.0, 200.0, 100.0), Style::default(), 0)
                .with_region("b", Rect::new(400.0, 300.0, 120.0, 120.0), Style::default(), 0),
        )
        .unwrap();
    handle
        .submit_intent(FrameIntent::new().with_region(
            "b",
            Rect::new(420.0, 300.0, 120.0, 120.0),
            Style::default(),
            0,
        ))
        .unwrap();

    let (objects, frames, draws) = handle
        .call_blocking(|cx| {
            (
                cx.objects().len(),
                cx.frame_index(),
                cx.backend().draws_with("blur_up"),
            )
        })
        .unwrap();
    assert_eq!(objects, 1);
    assert_eq!(frames, 2);
    // three upsamples per region: two regions, then one
    assert_eq!(draws, 9);
    thread.shutdown();
}

#[tokio::test(flavor = "current_thread")]
async fn async_callers_await_results() {
    let thread = spawn_headless();
    thread.wait_ready().await.unwrap();

    let handle = thread.handle();
    let id = handle
        .call(|cx| cx.attach(Rect::new(0.0, 0.0, 64.0, 64.0), Style::default()))
        .await
        .unwrap();
    let stats = handle.call(|cx| cx.render_frame().map(|stats| stats.reports)).await.unwrap().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].0, id);
}

#[test]
fn handles_fail_after_shutdown() {
    let thread = spawn_headless();
    let handle = thread.handle();
    thread.shutdown();

    assert!(handle.is_closed());
    assert!(matches!(handle.submit(|_| {}), Err(GlassError::ThreadGone)));
    assert!(matches!(
        handle.submit_intent(FrameIntent::new()),
        Err(GlassError::ThreadGone)
    ));
}
