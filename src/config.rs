use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Environment variable holding an override root directory for model resolution.
///
/// When set, `<root>/<model filename>` is tried right after an explicit path
/// argument and before the cache directories.
pub const MODEL_DIR_ENV: &str = "VOICY_MODEL_DIR";

/// Top-level configuration, loaded from `~/.voicy.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Push-to-talk hotkey settings.
    pub hotkey: HotkeyConfig,
    /// Model selection and resolution settings.
    pub model: ModelConfig,
    /// Inference parameters.
    pub engine: EngineConfig,
    /// Logging settings.
    pub telemetry: TelemetryConfig,
}

/// Push-to-talk hotkey settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Modifier key held for push-to-talk: `fn`, `command`, `option`,
    /// `control` or `shift`.
    pub key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            key: "fn".to_owned(),
        }
    }
}

/// Model selection and resolution settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    /// Whisper model variant (`tiny`, `base.en`, `small`, ...).
    pub name: String,
    /// Explicit model file path. Skips all other candidates when set.
    pub path: Option<String>,
    /// Download the model when no candidate directory contains it.
    pub auto_download: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "base.en".to_owned(),
            path: None,
            auto_download: true,
        }
    }
}

/// Inference parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// CPU threads for inference.
    pub threads: usize,
    /// Beam width; 1 selects greedy sampling.
    pub beam_size: usize,
    /// Language code (None = auto-detect).
    pub language: Option<String>,
    /// Upper bound on a single transcription, in seconds.
    pub transcribe_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            beam_size: 1,
            language: None,
            transcribe_timeout_secs: 60,
        }
    }
}

/// Logging settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout.
    pub enabled: bool,
    /// Log file location, `~` expanded.
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.voicy/voicy.log".to_owned(),
        }
    }
}

impl Config {
    /// Loads config from `~/.voicy.toml`, creating a default file on first run.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".voicy.toml"))
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[hotkey]
key = "fn"

[model]
name = "base.en"
auto_download = true

[engine]
threads = 4
beam_size = 1
transcribe_timeout_secs = 60

[telemetry]
enabled = false
log_path = "~/.voicy/voicy.log"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }

    /// Expands a leading `~/` to the home directory.
    ///
    /// # Errors
    /// Returns error if `HOME` is not set.
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
