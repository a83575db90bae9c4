//! Speech-to-text pipeline: model resolution, engine lifecycle, and the
//! whisper.cpp backend.

/// Model download over HTTP
pub mod download;
/// Engine lifecycle and the speech backend seam
pub mod engine;
/// Candidate-chain model resolution
pub mod resolver;
/// whisper.cpp backend
pub mod whisper;

pub use download::{model_filename, HttpModelFetcher, ModelFetcher};
pub use engine::{
    BackendLoader, EngineError, EngineState, SpeechBackend, Transcription, TranscriptionEngine,
};
pub use resolver::{ModelResolver, ResolveError};
pub use whisper::WhisperBackend;
