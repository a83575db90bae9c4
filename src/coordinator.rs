//! Push-to-talk session orchestration.
//!
//! A single task owns the session state machine and consumes hotkey edges
//! from a channel, so no state is ever touched from an OS callback thread.
//! Exactly one session exists at a time: edges arriving while a transcription
//! is in flight are dropped, not queued.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::input::HotkeyEdge;
use crate::transcription::TranscriptionEngine;

/// Session state machine.
///
/// `Idle → Recording` on press, `Recording → Transcribing` on release,
/// `Transcribing → Idle` when the engine finishes. Every other edge/state
/// combination is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a press.
    Idle,
    /// Key held, capture running.
    Recording,
    /// Key released, inference in flight.
    Transcribing,
}

/// Events published to session observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Capture started.
    RecordingStarted,
    /// Capture stopped; transcription follows.
    RecordingStopped,
    /// Transcription finished.
    Transcribed {
        /// Transcribed text.
        text: String,
        /// Backend confidence.
        confidence: f32,
    },
    /// Transcription failed or timed out; the session still returned to idle.
    TranscriptionFailed,
    /// Engine initialization failed; sessions will fail until the host
    /// resolves it.
    InitFailed,
}

/// Audio capture collaborator.
///
/// The coordinator drives capture strictly bracketed by press and release;
/// the source owns the device and its buffer.
pub trait AudioSource: Send {
    /// Starts capturing.
    fn begin(&mut self);

    /// Stops capturing and returns the samples recorded since `begin`.
    fn finish(&mut self) -> Vec<f32>;
}

/// Drives push-to-talk sessions from hotkey edges.
pub struct SessionCoordinator {
    engine: Arc<TranscriptionEngine>,
    audio: Box<dyn AudioSource>,
    edges: mpsc::UnboundedReceiver<HotkeyEdge>,
    events: broadcast::Sender<SessionEvent>,
    transcribe_timeout: Duration,
    state: SessionState,
}

impl SessionCoordinator {
    /// Creates a coordinator; the returned sender is the edge inlet handed to
    /// the hotkey monitor's sink.
    #[must_use]
    pub fn new(
        engine: Arc<TranscriptionEngine>,
        audio: Box<dyn AudioSource>,
        transcribe_timeout: Duration,
    ) -> (Self, mpsc::UnboundedSender<HotkeyEdge>) {
        let (edge_tx, edge_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        (
            Self {
                engine,
                audio,
                edges: edge_rx,
                events: event_tx,
                transcribe_timeout,
                state: SessionState::Idle,
            },
            edge_tx,
        )
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current state. Only meaningful from within the coordinator task.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory
        let _ = self.events.send(event);
    }

    /// Runs the session loop until every edge sender is dropped.
    ///
    /// Kicks engine initialization first when the host has not done so;
    /// sessions started before the engine is ready fail individually rather
    /// than queuing.
    pub async fn run(mut self) {
        tracing::info!("session coordinator started");
        if !self.engine.is_ready() {
            if let Err(e) = self.engine.initialize(None).await {
                tracing::warn!(error = %e, "engine initialization failed");
                self.publish(SessionEvent::InitFailed);
            }
        }
        while let Some(edge) = self.edges.recv().await {
            self.handle_edge(edge).await;
        }
        tracing::info!("session coordinator stopped");
    }

    async fn handle_edge(&mut self, edge: HotkeyEdge) {
        match (self.state, edge) {
            (SessionState::Idle, HotkeyEdge::Pressed) => {
                self.audio.begin();
                self.state = SessionState::Recording;
                tracing::debug!("recording started");
                self.publish(SessionEvent::RecordingStarted);
            }
            (SessionState::Recording, HotkeyEdge::Released) => {
                let samples = self.audio.finish();
                self.state = SessionState::Transcribing;
                tracing::debug!(samples = samples.len(), "recording stopped");
                self.publish(SessionEvent::RecordingStopped);

                self.transcribe(samples).await;

                // Edges that arrived while transcribing belong to no session
                self.drain_stale_edges();
                self.state = SessionState::Idle;
            }
            (state, edge) => {
                tracing::debug!(state = ?state, edge = ?edge, "edge ignored");
            }
        }
    }

    async fn transcribe(&mut self, samples: Vec<f32>) {
        let outcome =
            tokio::time::timeout(self.transcribe_timeout, self.engine.transcribe(&samples)).await;

        match outcome {
            Ok(Ok(result)) => {
                self.publish(SessionEvent::Transcribed {
                    text: result.text,
                    confidence: result.confidence,
                });
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "session transcription failed");
                self.publish(SessionEvent::TranscriptionFailed);
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.transcribe_timeout.as_secs(),
                    "session transcription timed out"
                );
                self.publish(SessionEvent::TranscriptionFailed);
            }
        }
    }

    fn drain_stale_edges(&mut self) {
        let mut dropped = 0_usize;
        while self.edges.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "dropped edges received during transcription");
        }
    }
}
