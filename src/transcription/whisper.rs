use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::engine::{SpeechBackend, Transcription};
use crate::config::EngineConfig;

/// whisper.cpp inference backend.
pub struct WhisperBackend {
    /// Whisper context (exclusive access via mutex)
    ctx: Mutex<WhisperContext>,
    /// Number of CPU threads for inference
    threads: i32,
    /// Beam size for beam search (1 = greedy)
    beam_size: i32,
    /// Language code, or None for auto-detection
    language: Option<String>,
}

impl WhisperBackend {
    /// Determines sampling strategy based on beam size (pure, testable)
    const fn get_sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    /// Loads a ggml model from `model_path` with the configured inference knobs.
    ///
    /// # Errors
    /// Returns error if the model file is missing or invalid, or if `threads`/`beam_size`
    /// are zero or exceed `i32::MAX`
    pub fn load(model_path: &Path, config: &EngineConfig) -> Result<Self> {
        if config.threads == 0 {
            anyhow::bail!("threads must be > 0");
        }
        if config.beam_size == 0 {
            anyhow::bail!("beam_size must be > 0");
        }

        // whisper-rs takes i32 for both knobs
        let threads = i32::try_from(config.threads)
            .map_err(|_| anyhow::anyhow!("threads value too large (max: {})", i32::MAX))?;
        let beam_size = i32::try_from(config.beam_size)
            .map_err(|_| anyhow::anyhow!("beam_size value too large (max: {})", i32::MAX))?;

        tracing::info!(
            path = %model_path.display(),
            threads = config.threads,
            beam_size = config.beam_size,
            language = ?config.language,
            "loading whisper model"
        );

        let path_str = model_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("model path contains invalid UTF-8"))?;

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| anyhow::anyhow!("failed to load whisper model: {e:?}"))?;

        tracing::info!("whisper model loaded successfully");

        Ok(Self {
            ctx: Mutex::new(ctx),
            threads,
            beam_size,
            language: config.language.clone(),
        })
    }
}

impl SpeechBackend for WhisperBackend {
    fn transcribe(&self, samples: &[f32]) -> Result<Transcription> {
        let _span = tracing::debug_span!("transcription", samples = samples.len()).entered();
        tracing::debug!("starting whisper inference");

        // Create state for this transcription
        let mut state = self
            .ctx
            .lock()
            .map_err(|e| anyhow::anyhow!("mutex poisoned: {e}"))?
            .create_state()
            .map_err(|e| anyhow::anyhow!("failed to create whisper state: {e:?}"))?;

        let strategy = Self::get_sampling_strategy(self.beam_size);
        let mut params = FullParams::new(strategy);
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(self.language.as_deref()); // None = auto-detect
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, samples)
            .context("whisper inference failed")?;
        let inference_duration = start.elapsed();

        // Extract text from all segments
        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
        }
        let text = text.trim().to_owned();

        tracing::info!(
            segments = state.full_n_segments(),
            text_len = text.len(),
            inference_ms = inference_duration.as_millis(),
            "whisper inference completed"
        );

        // whisper.cpp exposes no calibrated utterance-level confidence
        Ok(Transcription {
            text,
            confidence: 1.0,
        })
    }
}

// SAFETY: WhisperContext is only touched while holding the mutex, and no
// shared mutable state exists outside it. whisper-rs documents the context as
// thread-safe when access is synchronized.
#[allow(unsafe_code)]
unsafe impl Send for WhisperBackend {}
#[allow(unsafe_code)]
unsafe impl Sync for WhisperBackend {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_strategy_greedy_for_beam_one() {
        let strategy = WhisperBackend::get_sampling_strategy(1);
        assert!(matches!(strategy, SamplingStrategy::Greedy { best_of: 1 }));
    }

    #[test]
    fn test_sampling_strategy_beam_search_for_larger_beams() {
        let strategy = WhisperBackend::get_sampling_strategy(5);
        assert!(matches!(
            strategy,
            SamplingStrategy::BeamSearch {
                beam_size: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_load_rejects_zero_threads() {
        let config = EngineConfig {
            threads: 0,
            ..EngineConfig::default()
        };
        let result = WhisperBackend::load(Path::new("/nonexistent/model.bin"), &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_rejects_zero_beam_size() {
        let config = EngineConfig {
            beam_size: 0,
            ..EngineConfig::default()
        };
        let result = WhisperBackend::load(Path::new("/nonexistent/model.bin"), &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_model_fails() {
        let config = EngineConfig::default();
        let result = WhisperBackend::load(Path::new("/nonexistent/model.bin"), &config);
        assert!(result.is_err());
    }
}
