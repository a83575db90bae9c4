use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::download::{model_filename, ModelFetcher};
use crate::config::{ModelConfig, MODEL_DIR_ENV};

/// Errors from model resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No candidate location contained the model and downloading is disabled.
    #[error("model {0} not found in any candidate location")]
    NotFound(String),

    /// Candidates existed but none of them produced a loadable model.
    #[error("model {0} found but failed to load from every candidate")]
    LoadFailed(String),

    /// The download-and-load fallback failed; terminal for this init attempt.
    #[error("model download failed")]
    DownloadFailed(#[source] anyhow::Error),
}

/// Locates or obtains the on-device model file.
///
/// Candidates are tried in a fixed priority order: an explicit path argument,
/// the `VOICY_MODEL_DIR` override root, the user cache directory, then the
/// app-data directory. The first existing candidate that loads wins; a
/// candidate that exists but fails to load is logged and skipped rather than
/// aborting the whole resolution. When every candidate is exhausted the
/// download collaborator runs once and the result is persisted into the
/// app-data directory for future runs (best-effort: a failed persist is
/// logged, not surfaced).
#[derive(Clone)]
pub struct ModelResolver {
    filename: String,
    override_root: Option<PathBuf>,
    user_cache: Option<PathBuf>,
    app_data: Option<PathBuf>,
    fetcher: Option<Arc<dyn ModelFetcher>>,
}

impl ModelResolver {
    /// Creates a resolver over explicit candidate roots.
    #[must_use]
    pub fn new(
        model_name: &str,
        override_root: Option<PathBuf>,
        user_cache: Option<PathBuf>,
        app_data: Option<PathBuf>,
        fetcher: Option<Arc<dyn ModelFetcher>>,
    ) -> Self {
        Self {
            filename: model_filename(model_name),
            override_root,
            user_cache,
            app_data,
            fetcher,
        }
    }

    /// Creates a resolver from config, reading the env override root and the
    /// platform cache/app-data directories.
    #[must_use]
    pub fn from_config(model: &ModelConfig, fetcher: Option<Arc<dyn ModelFetcher>>) -> Self {
        Self::new(
            &model.name,
            std::env::var_os(MODEL_DIR_ENV).map(PathBuf::from),
            dirs::cache_dir().map(|d| d.join("voicy").join("models")),
            dirs::data_dir().map(|d| d.join("voicy").join("models")),
            if model.auto_download { fetcher } else { None },
        )
    }

    /// Candidate paths in priority order.
    fn candidates(&self, explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(4);
        if let Some(path) = explicit {
            out.push(path.to_path_buf());
        }
        for root in [&self.override_root, &self.user_cache, &self.app_data]
            .into_iter()
            .flatten()
        {
            out.push(root.join(&self.filename));
        }
        out
    }

    /// Resolves the model and hands the winning path to `load`.
    ///
    /// # Errors
    /// Returns [`ResolveError`] when no candidate loads and the download
    /// fallback is disabled or fails.
    pub fn resolve<T>(
        &self,
        explicit: Option<&Path>,
        load: impl Fn(&Path) -> anyhow::Result<T>,
    ) -> Result<T, ResolveError> {
        let mut saw_broken_candidate = false;

        for candidate in self.candidates(explicit) {
            if !candidate.exists() {
                tracing::debug!(path = %candidate.display(), "model candidate missing");
                continue;
            }
            match load(&candidate) {
                Ok(model) => {
                    tracing::info!(path = %candidate.display(), "model resolved");
                    return Ok(model);
                }
                Err(e) => {
                    // A bad file at one location must not abort resolution.
                    saw_broken_candidate = true;
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "model candidate failed to load, trying next"
                    );
                }
            }
        }

        let Some(fetcher) = self.fetcher.as_ref() else {
            return Err(if saw_broken_candidate {
                ResolveError::LoadFailed(self.filename.clone())
            } else {
                ResolveError::NotFound(self.filename.clone())
            });
        };

        self.download_and_load(fetcher.as_ref(), load)
    }

    fn download_and_load<T>(
        &self,
        fetcher: &dyn ModelFetcher,
        load: impl Fn(&Path) -> anyhow::Result<T>,
    ) -> Result<T, ResolveError> {
        let staging = std::env::temp_dir().join("voicy-models").join(&self.filename);

        tracing::info!(model = %self.filename, "no local model, downloading");
        fetcher
            .fetch(&self.filename, &staging)
            .map_err(ResolveError::DownloadFailed)?;

        let load_path = self.persist(&staging);
        load(&load_path).map_err(ResolveError::DownloadFailed)
    }

    /// Moves a freshly downloaded model into the app-data directory.
    ///
    /// Best-effort: on any failure the staging path is returned and resolution
    /// continues from there.
    fn persist(&self, staging: &Path) -> PathBuf {
        let Some(app_data) = self.app_data.as_ref() else {
            return staging.to_path_buf();
        };
        let dest = app_data.join(&self.filename);

        let moved = std::fs::create_dir_all(app_data)
            .and_then(|()| std::fs::rename(staging, &dest))
            .or_else(|_| {
                // rename fails across filesystems; fall back to copy
                std::fs::copy(staging, &dest).map(|_| ())
            });

        match moved {
            Ok(()) => {
                tracing::info!(path = %dest.display(), "model persisted to app data");
                dest
            }
            Err(e) => {
                tracing::warn!(
                    path = %dest.display(),
                    error = %e,
                    "failed to persist downloaded model, using staging copy"
                );
                staging.to_path_buf()
            }
        }
    }
}
