use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Maps a model variant to its distribution filename.
#[must_use]
pub fn model_filename(model_name: &str) -> String {
    format!("ggml-{model_name}.bin")
}

/// Download collaborator for model resolution.
///
/// Abstracted so resolver tests can count invocations and write fixture bytes
/// instead of hitting the network.
pub trait ModelFetcher: Send + Sync {
    /// Downloads `filename` to `dest`, creating parent directories.
    ///
    /// # Errors
    /// Returns error on any network or filesystem failure; the destination is
    /// left without a partial file.
    fn fetch(&self, filename: &str, dest: &Path) -> Result<()>;
}

/// Fetches whisper.cpp models over HTTPS.
pub struct HttpModelFetcher {
    base_url: String,
}

impl Default for HttpModelFetcher {
    fn default() -> Self {
        Self {
            base_url: MODEL_BASE_URL.to_owned(),
        }
    }
}

impl HttpModelFetcher {
    /// Creates a fetcher against an alternative distribution root.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ModelFetcher for HttpModelFetcher {
    fn fetch(&self, filename: &str, dest: &Path) -> Result<()> {
        let url = format!("{}/{}", self.base_url, filename);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("failed to create model directory")?;
        }

        tracing::info!(url = %url, "downloading model");

        // Download to a temporary file first so a failed transfer never leaves
        // a truncated model at the destination.
        let temp_path = dest.with_extension("tmp");

        let response = reqwest::blocking::get(&url)
            .with_context(|| format!("failed to download model from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("download failed with status {}: {}", response.status(), url);
        }

        let bytes = response.bytes().context("failed to read response bytes")?;

        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create temp file at {}", temp_path.display()))?;

        file.write_all(&bytes)
            .context("failed to write model to temp file")?;

        // Drop file handle before rename
        drop(file);

        fs::rename(&temp_path, dest).with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                dest.display()
            )
        })?;

        tracing::info!(
            path = %dest.display(),
            size = bytes.len(),
            "model downloaded successfully"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filename() {
        assert_eq!(model_filename("small"), "ggml-small.bin");
        assert_eq!(model_filename("base.en"), "ggml-base.en.bin");
        assert_eq!(model_filename("tiny"), "ggml-tiny.bin");
    }

    #[test]
    fn test_fetch_invalid_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ggml-nonexistent-model-xyz.bin");

        let fetcher = HttpModelFetcher::with_base_url("http://127.0.0.1:1/models");
        let result = fetcher.fetch("ggml-nonexistent-model-xyz.bin", &dest);

        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[test]
    #[ignore] // Requires network access and downloads a large file
    fn test_fetch_tiny_model_integration() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ggml-tiny.bin");

        let fetcher = HttpModelFetcher::default();
        fetcher.fetch("ggml-tiny.bin", &dest).unwrap();

        assert!(dest.exists());
        assert!(fs::metadata(&dest).unwrap().len() > 0);
    }
}
