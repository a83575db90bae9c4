use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::resolver::ModelResolver;

/// One transcription outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    /// Transcribed text, trimmed.
    pub text: String,
    /// Confidence in `[0, 1]`. Backends without a calibrated score report 1.0.
    pub confidence: f32,
}

/// Capability contract of the opaque inference service.
///
/// The engine never depends on a concrete backend: the production whisper.cpp
/// implementation and test fakes both come in through this seam, injected via
/// a [`BackendLoader`] at engine construction.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechBackend: Send + Sync {
    /// Transcribes 16 kHz mono f32 samples.
    ///
    /// # Errors
    /// Returns error if inference fails; the engine degrades this to an
    /// empty-result failure rather than letting it escape the process.
    fn transcribe(&self, samples: &[f32]) -> anyhow::Result<Transcription>;
}

/// Turns a resolved model path into a loaded backend.
pub type BackendLoader =
    Arc<dyn Fn(&Path) -> anyhow::Result<Box<dyn SpeechBackend>> + Send + Sync>;

/// Engine lifecycle state.
///
/// Transitions: `Uninitialized → Initializing` on the first init call, then
/// `Initializing → Ready | Failed` when the load completes. `cleanup` resets
/// any state back to `Uninitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// No load attempted since process start or last cleanup.
    Uninitialized = 0,
    /// A load is in flight.
    Initializing = 1,
    /// Model loaded; transcription requests are accepted.
    Ready = 2,
    /// Load failed; stays failed until an explicit cleanup + re-init.
    Failed = 3,
}

const fn state_from(v: u8) -> EngineState {
    match v {
        1 => EngineState::Initializing,
        2 => EngineState::Ready,
        3 => EngineState::Failed,
        _ => EngineState::Uninitialized,
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transcription requested before a successful initialization.
    #[error("engine is not ready")]
    NotReady,

    /// Model resolution or load failed.
    #[error("engine initialization failed: {0}")]
    InitFailed(String),

    /// The backend failed during inference.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// The speech-to-text engine behind the FFI boundary.
///
/// One instance per process, shared via `Arc`. Initialization is serialized
/// through a dedicated async lock so concurrent callers collapse into a
/// single real model load; `is_ready` is a lock-free read so transcription
/// requests fail fast instead of queuing behind an in-flight init.
pub struct TranscriptionEngine {
    resolver: ModelResolver,
    loader: BackendLoader,
    backend: Mutex<Option<Arc<dyn SpeechBackend>>>,
    state: AtomicU8,
    failure: Mutex<Option<String>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl TranscriptionEngine {
    /// Creates an uninitialized engine over a resolver and backend loader.
    #[must_use]
    pub fn new(resolver: ModelResolver, loader: BackendLoader) -> Self {
        Self {
            resolver,
            loader,
            backend: Mutex::new(None),
            state: AtomicU8::new(EngineState::Uninitialized as u8),
            failure: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        state_from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Pure state read; never blocks.
    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Resolves and loads the model.
    ///
    /// Concurrent callers collapse into one real load: whoever holds the init
    /// lock performs it, later arrivals observe `Ready` (or `Failed`) and
    /// return immediately. A failed engine keeps reporting the original
    /// failure until [`Self::cleanup`] re-arms the load path.
    ///
    /// # Errors
    /// Returns [`EngineError::InitFailed`] when resolution or load fails.
    pub async fn initialize(&self, explicit: Option<PathBuf>) -> Result<(), EngineError> {
        let _guard = self.init_lock.lock().await;

        match self.state() {
            EngineState::Ready => return Ok(()),
            EngineState::Failed => {
                let reason = self
                    .failure
                    .lock()
                    .ok()
                    .and_then(|g| g.clone())
                    .unwrap_or_default();
                return Err(EngineError::InitFailed(reason));
            }
            EngineState::Uninitialized | EngineState::Initializing => {}
        }

        self.set_state(EngineState::Initializing);
        tracing::info!(explicit = ?explicit, "initializing engine");

        let resolver = self.resolver.clone();
        let loader = Arc::clone(&self.loader);
        let outcome = tokio::task::spawn_blocking(move || {
            resolver.resolve(explicit.as_deref(), |path| loader(path))
        })
        .await;

        let failed = |reason: String| {
            if let Ok(mut slot) = self.failure.lock() {
                *slot = Some(reason.clone());
            }
            self.set_state(EngineState::Failed);
            tracing::error!(reason = %reason, "engine initialization failed");
            EngineError::InitFailed(reason)
        };

        match outcome {
            Ok(Ok(backend)) => {
                if let Ok(mut slot) = self.backend.lock() {
                    *slot = Some(Arc::from(backend));
                } else {
                    return Err(failed("backend slot poisoned".to_owned()));
                }
                self.set_state(EngineState::Ready);
                tracing::info!("engine ready");
                Ok(())
            }
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(e) => Err(failed(format!("load task aborted: {e}"))),
        }
    }

    /// Transcribes samples through the loaded backend.
    ///
    /// Rejects immediately when the engine is not `Ready` rather than waiting
    /// on an in-flight init. Backend failures (including panics inside the
    /// foreign engine) are caught here and reported as [`EngineError`]; they
    /// never cross the FFI boundary as anything but an empty result.
    ///
    /// # Errors
    /// Returns [`EngineError::NotReady`] or [`EngineError::Inference`].
    pub async fn transcribe(&self, samples: &[f32]) -> Result<Transcription, EngineError> {
        if !self.is_ready() {
            tracing::debug!(state = ?self.state(), "transcription rejected, engine not ready");
            return Err(EngineError::NotReady);
        }

        let backend = self
            .backend
            .lock()
            .ok()
            .and_then(|g| g.clone())
            .ok_or(EngineError::NotReady)?;

        let samples = samples.to_vec();
        let joined = tokio::task::spawn_blocking(move || backend.transcribe(&samples)).await;

        match joined {
            Ok(Ok(result)) => {
                tracing::info!(
                    text_len = result.text.len(),
                    confidence = result.confidence,
                    "transcription completed"
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "inference failed");
                Err(EngineError::Inference(e.to_string()))
            }
            Err(e) => {
                tracing::error!(error = %e, "inference task panicked");
                Err(EngineError::Inference(format!("inference task aborted: {e}")))
            }
        }
    }

    /// Releases the backend handle and resets to `Uninitialized`.
    ///
    /// Idempotent: calling twice, or before any initialization, is a no-op.
    pub fn cleanup(&self) {
        if let Ok(mut slot) = self.backend.lock() {
            slot.take();
        }
        if let Ok(mut slot) = self.failure.lock() {
            slot.take();
        }
        self.set_state(EngineState::Uninitialized);
        tracing::info!("engine cleaned up");
    }
}
