use facebooth_core::enhancer::panic_message;
use facebooth_core::{Capabilities, PipelineError, SwapPipeline, SwapResult};
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("swap pipeline {0}")]
    Panicked(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Swap {
        captured: Vec<u8>,
        template: Vec<u8>,
        use_enhancement: bool,
        span: tracing::Span,
        reply: oneshot::Sender<Result<SwapResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    capabilities: Capabilities,
}

impl EngineHandle {
    /// Run the swap pipeline on encoded `captured` and `template` images.
    pub async fn swap(
        &self,
        captured: Vec<u8>,
        template: Vec<u8>,
        use_enhancement: bool,
    ) -> Result<SwapResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Swap {
                captured,
                template,
                use_enhancement,
                span: tracing::Span::current(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capabilities decided when the pipeline was loaded.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns `pipeline` and runs one request at a time, so model
/// sessions are never shared between threads. A panic inside a run fails
/// that request only; the thread keeps serving.
pub fn spawn_engine(mut pipeline: SwapPipeline) -> Result<EngineHandle, EngineError> {
    let capabilities = pipeline.capabilities();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facebooth-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Swap {
                        captured,
                        template,
                        use_enhancement,
                        span,
                        reply,
                    } => {
                        let _guard = span.enter();
                        let started = std::time::Instant::now();
                        let run = panic::catch_unwind(AssertUnwindSafe(|| {
                            pipeline.run(&captured, &template, use_enhancement)
                        }));
                        let result = match run {
                            Ok(result) => result.map_err(EngineError::from),
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                tracing::error!(error = %message, "engine: swap pipeline panicked");
                                Err(EngineError::Panicked(message))
                            }
                        };
                        tracing::debug!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            ok = result.is_ok(),
                            "engine: swap finished"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, capabilities })
}
