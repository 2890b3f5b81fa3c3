//! The GPU thread.
//!
//! Every resource mutation, command recording and draw call happens on one
//! dedicated thread. The [`Context`] is built there by a factory closure and
//! never leaves it; other threads reach it through a cloneable
//! [`RenderHandle`] that queues jobs or frame intents.
//!
//! # Lifecycle
//!
//! 1. [`RenderThread::spawn`] starts the thread and runs the factory
//! 2. [`RenderThread::wait_ready`] resolves once the factory returned
//! 3. producers submit jobs and intents, which run in submission order
//! 4. [`RenderThread::shutdown`] (or dropping the thread) lets the queue
//!    drain, drops the context and joins

use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    backend::GraphicsBackend,
    context::{Context, FrameIntent},
    error::{GlassError, Result},
};

/// Installs `env_logger` unless a logger is already set.
pub fn init_logging() {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}

type Job<B> = Box<dyn FnOnce(&mut Context<B>) + Send>;

enum Message<B: GraphicsBackend + 'static> {
    Job(Job<B>),
    /// Reconcile the render objects with the intent, then draw a frame.
    Intent(FrameIntent),
    Shutdown,
}

/// State of the engine on the GPU thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    /// The factory failed; carries its error.
    Failed(String),
}

/// Cheap, cloneable access to the context on the GPU thread.
pub struct RenderHandle<B: GraphicsBackend + 'static> {
    sender: mpsc::UnboundedSender<Message<B>>,
}

impl<B: GraphicsBackend + 'static> Clone for RenderHandle<B> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<B: GraphicsBackend + 'static> RenderHandle<B> {
    fn send(&self, message: Message<B>) -> Result<()> {
        self.sender.send(message).map_err(|_| GlassError::ThreadGone)
    }

    /// Queues `job` without waiting for it.
    pub fn submit(&self, job: impl FnOnce(&mut Context<B>) + Send + 'static) -> Result<()> {
        self.send(Message::Job(Box::new(job)))
    }

    /// Runs `job` on the GPU thread and resolves to its result.
    pub async fn call<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut Context<B>) -> R + Send + 'static,
    ) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.submit(move |context| {
            let _ = tx.send(job(context));
        })?;
        rx.await.map_err(|_| GlassError::ThreadGone)
    }

    /// Blocking [`Self::call`]. Must not be called on the GPU thread itself.
    pub fn call_blocking<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut Context<B>) -> R + Send + 'static,
    ) -> Result<R> {
        futures::executor::block_on(self.call(job))
    }

    /// Queues a frame for `intent`.
    pub fn submit_intent(&self, intent: FrameIntent) -> Result<()> {
        self.send(Message::Intent(intent))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub struct RenderThread<B: GraphicsBackend + 'static> {
    handle: RenderHandle<B>,
    ready: watch::Receiver<Readiness>,
    thread: Option<JoinHandle<()>>,
}

impl<B: GraphicsBackend + 'static> RenderThread<B> {
    /// Starts the GPU thread and builds the context on it with `factory`.
    pub fn spawn<F>(factory: F) -> anyhow::Result<Self>
    where
        F: FnOnce() -> anyhow::Result<Context<B>> + Send + 'static,
    {
        init_logging();

        let (sender, mut receiver) = mpsc::unbounded_channel::<Message<B>>();
        let (ready_tx, ready) = watch::channel(Readiness::Pending);

        let thread = std::thread::Builder::new()
            .name("flow-glass-gpu".to_owned())
            .spawn(move || {
                let mut context = match factory() {
                    Ok(context) => {
                        log::info!("GPU thread ready on {}", context.backend().name());
                        let _ = ready_tx.send(Readiness::Ready);
                        context
                    }
                    Err(e) => {
                        log::error!("GPU thread failed to start: {:#}", e);
                        let _ = ready_tx.send(Readiness::Failed(format!("{:#}", e)));
                        return;
                    }
                };

                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        Message::Job(job) => job(&mut context),
                        Message::Intent(intent) => {
                            context.apply_intent(intent);
                            if let Err(e) = context.render_frame() {
                                log::error!("frame {} failed: {}", context.frame_index(), e);
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
                log::info!("GPU thread stopped after {} frames", context.frame_index());
            })?;

        Ok(Self {
            handle: RenderHandle { sender },
            ready,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> RenderHandle<B> {
        self.handle.clone()
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.borrow().clone()
    }

    /// Resolves once the factory returned. A failed factory is reported as
    /// [`GlassError::BackendInit`].
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.ready.clone();
        let state = ready
            .wait_for(|state| *state != Readiness::Pending)
            .await
            .map_err(|_| GlassError::ThreadGone)?
            .clone();
        match state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(message) => Err(GlassError::BackendInit(message)),
            Readiness::Pending => Err(GlassError::ThreadGone),
        }
    }

    pub fn wait_ready_blocking(&self) -> Result<()> {
        futures::executor::block_on(self.wait_ready())
    }

    /// Processes everything queued so far, then stops and joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.send(Message::Shutdown);
        if thread.join().is_err() {
            log::error!("GPU thread panicked");
        }
    }
}

impl<B: GraphicsBackend + 'static> Drop for RenderThread<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
