//! C ABI surface for host applications.
//!
//! The host links this crate as a static or dynamic library and drives it
//! through blocking calls; async plumbing stays on a lazily created runtime
//! owned by this module. Each engine call is spawned onto the runtime and the
//! caller parks on a one-shot channel until the result lands, so host threads
//! never become runtime threads. String returns are heap-allocated C strings
//! the caller must hand back to [`voicy_free_string`]; failures come back as
//! an owned empty string, never a null pointer, so the free contract is
//! uniform.

use std::ffi::{c_char, c_float, CStr, CString};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::input::{HotkeyEdge, HotkeyMonitor, PushToTalkKey};
use crate::transcription::{
    HttpModelFetcher, ModelFetcher, ModelResolver, TranscriptionEngine, WhisperBackend,
};

static RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();
static CONFIG: OnceLock<Config> = OnceLock::new();
static ENGINE: OnceLock<Arc<TranscriptionEngine>> = OnceLock::new();
static MONITOR: Mutex<Option<HotkeyMonitor>> = Mutex::new(None);
static PTT_CALLBACK: Mutex<Option<extern "C" fn(bool)>> = Mutex::new(None);

/// Loads config once and arms logging.
///
/// Every entry point that needs configuration goes through here, so logging
/// works no matter which `voicy_*` call the host makes first.
fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        let config = Config::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "config load failed, using defaults");
            Config::default()
        });
        let _ = crate::telemetry::init(config.telemetry.enabled, &config.telemetry.log_path);
        config
    })
}

fn runtime() -> Option<&'static Runtime> {
    RUNTIME
        .get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| tracing::error!(error = %e, "failed to build tokio runtime"))
                .ok()
        })
        .as_ref()
}

fn engine() -> &'static Arc<TranscriptionEngine> {
    ENGINE.get_or_init(|| {
        let config = config();
        let fetcher: Arc<dyn ModelFetcher> = Arc::new(HttpModelFetcher::default());
        let resolver = ModelResolver::from_config(&config.model, Some(fetcher));
        let engine_config = config.engine.clone();
        Arc::new(TranscriptionEngine::new(
            resolver,
            Arc::new(move |path| {
                WhisperBackend::load(path, &engine_config)
                    .map(|backend| Box::new(backend) as Box<dyn crate::transcription::SpeechBackend>)
            }),
        ))
    })
}

fn transcribe_timeout() -> Duration {
    Duration::from_secs(config().engine.transcribe_timeout_secs)
}

/// The `[model] path` config value, expanded, when set.
///
/// Used as the explicit resolution candidate when `voicy_init` gets no path
/// argument, so a configured file skips the candidate chain the same way an
/// argument does.
fn configured_model_path(config: &Config) -> Option<PathBuf> {
    let path = config.model.path.as_deref()?;
    match Config::expand_path(path) {
        Ok(expanded) => Some(expanded),
        Err(e) => {
            tracing::warn!(path, error = %e, "configured model path ignored");
            None
        }
    }
}

/// Runs a future on the adapter's runtime and parks the caller on a one-shot
/// channel until the result arrives.
fn bridge<T, F>(rt: &Runtime, fut: F) -> Option<T>
where
    T: Send + 'static,
    F: std::future::Future<Output = T> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    rt.spawn(async move {
        let _ = tx.send(fut.await);
    });
    match rx.blocking_recv() {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::error!(error = %e, "async bridge task dropped its result");
            None
        }
    }
}

/// An owned empty string the caller can free like any other return.
fn empty_result() -> *mut c_char {
    CString::default().into_raw()
}

/// Initializes the transcription engine.
///
/// `model_path` optionally points to a model file and may be null, in which
/// case the `[model] path` config value is honored, and failing that the
/// model is resolved from the candidate directories (and downloaded when
/// absent). Safe to call repeatedly; concurrent callers share one load.
/// Returns 0 on success, -1 on failure.
///
/// # Safety
/// `model_path` must be null or a valid NUL-terminated string.
#[no_mangle]
#[allow(unsafe_code)]
pub unsafe extern "C" fn voicy_init(model_path: *const c_char) -> i32 {
    let explicit = if model_path.is_null() {
        None
    } else {
        // SAFETY: caller guarantees a valid NUL-terminated string.
        let raw = unsafe { CStr::from_ptr(model_path) };
        match raw.to_str() {
            Ok(s) if !s.is_empty() => Some(PathBuf::from(s)),
            Ok(_) => None,
            Err(_) => {
                tracing::error!("model path is not valid UTF-8");
                return -1;
            }
        }
    };

    let explicit = explicit.or_else(|| configured_model_path(config()));

    let engine = Arc::clone(engine());
    let Some(rt) = runtime() else {
        return -1;
    };

    match bridge(rt, async move { engine.initialize(explicit).await }) {
        Some(Ok(())) => 0,
        Some(Err(e)) => {
            tracing::error!(error = %e, "voicy_init failed");
            -1
        }
        None => -1,
    }
}

/// Transcribes 16 kHz mono f32 samples and returns the text.
///
/// Always returns an owned, non-null C string; on any failure (engine not
/// ready, invalid input, inference error, timeout) it is empty. The caller
/// must release it with [`voicy_free_string`].
///
/// # Safety
/// `samples` must be null or point to at least `sample_count` readable floats.
#[no_mangle]
#[allow(unsafe_code)]
pub unsafe extern "C" fn voicy_transcribe(
    samples: *const c_float,
    sample_count: i32,
) -> *mut c_char {
    if samples.is_null() || sample_count <= 0 {
        tracing::debug!(sample_count, "transcription request with no samples");
        return empty_result();
    }
    let Ok(count) = usize::try_from(sample_count) else {
        return empty_result();
    };

    let engine = Arc::clone(engine());
    if !engine.is_ready() {
        tracing::warn!("voicy_transcribe called before engine is ready");
        return empty_result();
    }
    let Some(rt) = runtime() else {
        return empty_result();
    };

    // SAFETY: caller guarantees `count` readable floats behind `samples`.
    let buffer = unsafe { std::slice::from_raw_parts(samples, count) }.to_vec();

    let timeout = transcribe_timeout();
    let outcome = bridge(rt, async move {
        tokio::time::timeout(timeout, engine.transcribe(&buffer)).await
    });

    match outcome {
        Some(Ok(Ok(result))) => CString::new(result.text).unwrap_or_default().into_raw(),
        Some(Ok(Err(e))) => {
            tracing::error!(error = %e, "voicy_transcribe failed");
            empty_result()
        }
        Some(Err(_)) => {
            tracing::error!("voicy_transcribe timed out");
            empty_result()
        }
        None => empty_result(),
    }
}

/// Releases a string returned by [`voicy_transcribe`].
///
/// Null is accepted and ignored.
///
/// # Safety
/// `s` must be null or a pointer previously returned by this library that has
/// not already been freed.
#[no_mangle]
#[allow(unsafe_code)]
pub unsafe extern "C" fn voicy_free_string(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: pointer came from CString::into_raw in this library.
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Whether the engine is initialized and accepting transcription requests.
///
/// Pure state read; never blocks behind an in-flight initialization.
#[no_mangle]
pub extern "C" fn voicy_is_ready() -> bool {
    ENGINE.get().is_some_and(|engine| engine.is_ready())
}

/// Releases the engine and stops keyboard monitoring.
///
/// Idempotent; a later [`voicy_init`] starts a fresh load.
#[no_mangle]
pub extern "C" fn voicy_cleanup() {
    if let Some(engine) = ENGINE.get() {
        engine.cleanup();
    }
    voicy_shutdown_keyboard_monitor();
}

fn dispatch_edge(edge: HotkeyEdge) {
    let callback = PTT_CALLBACK.lock().ok().and_then(|g| *g);
    if let Some(callback) = callback {
        callback(edge == HotkeyEdge::Pressed);
    }
}

/// Starts push-to-talk key monitoring.
///
/// Picks the first usable backend (event tap when the accessibility grant is
/// in place, observer pair otherwise). Returns `false` when no backend could
/// start. Safe to call while already running.
#[no_mangle]
pub extern "C" fn voicy_init_keyboard_monitor() -> bool {
    let Ok(mut slot) = MONITOR.lock() else {
        return false;
    };
    if slot.as_ref().is_some_and(HotkeyMonitor::is_running) {
        return true;
    }

    let key = PushToTalkKey::parse(&config().hotkey.key);

    #[cfg(target_os = "macos")]
    let mut monitor = HotkeyMonitor::for_key(key);
    #[cfg(not(target_os = "macos"))]
    let mut monitor = {
        let _ = key;
        HotkeyMonitor::with_backends(Vec::new())
    };

    // The callback is read per event so re-registration takes effect without
    // restarting the monitor
    let started = monitor.start(Arc::new(dispatch_edge));
    if started {
        *slot = Some(monitor);
    }
    started
}

/// Stops push-to-talk monitoring and drops the registered callback.
///
/// Idempotent.
#[no_mangle]
pub extern "C" fn voicy_shutdown_keyboard_monitor() {
    if let Ok(mut slot) = MONITOR.lock() {
        if let Some(mut monitor) = slot.take() {
            monitor.stop();
        }
    }
    if let Ok(mut callback) = PTT_CALLBACK.lock() {
        *callback = None;
    }
}

/// Registers the function invoked on push-to-talk edges.
///
/// The callback receives `true` on press and `false` on release, on the
/// monitor's event thread. Registering again replaces the previous callback;
/// each edge is delivered exactly once.
#[no_mangle]
pub extern "C" fn voicy_register_push_to_talk_callback(callback: extern "C" fn(bool)) {
    if let Ok(mut slot) = PTT_CALLBACK.lock() {
        *slot = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Engine-initializing paths are exercised in the integration tests with a
    // fake backend; calling voicy_init here would hit model resolution.

    #[test]
    fn test_configured_model_path_becomes_explicit_candidate() {
        let config = Config {
            model: crate::config::ModelConfig {
                path: Some("/opt/models/ggml-base.en.bin".to_owned()),
                ..crate::config::ModelConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(
            configured_model_path(&config),
            Some(PathBuf::from("/opt/models/ggml-base.en.bin"))
        );
    }

    #[test]
    fn test_configured_model_path_expands_tilde() {
        let home = std::env::var("HOME").unwrap();
        let config = Config {
            model: crate::config::ModelConfig {
                path: Some("~/models/ggml-tiny.bin".to_owned()),
                ..crate::config::ModelConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(
            configured_model_path(&config),
            Some(PathBuf::from(home).join("models/ggml-tiny.bin"))
        );
    }

    #[test]
    fn test_no_configured_model_path_by_default() {
        assert_eq!(configured_model_path(&Config::default()), None);
    }

    #[test]
    fn test_runtime_is_built_once() {
        let first = runtime().unwrap();
        let second = runtime().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    #[cfg(not(target_os = "macos"))]
    fn test_keyboard_monitor_arms_config_without_engine() {
        // No backends exist off macOS, so startup reports failure, but the
        // config/logging side effect still happens.
        assert!(!voicy_init_keyboard_monitor());
        assert!(std::ptr::eq(config(), config()));
    }

    #[test]
    fn test_transcribe_null_samples_returns_owned_empty() {
        #[allow(unsafe_code)]
        let result = unsafe { voicy_transcribe(std::ptr::null(), 16000) };
        assert!(!result.is_null());
        #[allow(unsafe_code)]
        let text = unsafe { CStr::from_ptr(result) }.to_str().unwrap().to_owned();
        assert!(text.is_empty());
        #[allow(unsafe_code)]
        unsafe {
            voicy_free_string(result);
        }
    }

    #[test]
    fn test_transcribe_zero_count_returns_owned_empty() {
        let samples = [0.0_f32; 4];
        #[allow(unsafe_code)]
        let result = unsafe { voicy_transcribe(samples.as_ptr(), 0) };
        assert!(!result.is_null());
        #[allow(unsafe_code)]
        unsafe {
            voicy_free_string(result);
        }
    }

    #[test]
    fn test_free_null_is_safe() {
        #[allow(unsafe_code)]
        unsafe {
            voicy_free_string(std::ptr::null_mut());
        }
    }

    // Single test for the keyboard globals: parallel tests sharing the
    // callback slot would race each other
    #[test]
    fn test_keyboard_callback_lifecycle() {
        static FIRST: AtomicUsize = AtomicUsize::new(0);
        static SECOND: AtomicUsize = AtomicUsize::new(0);

        extern "C" fn first(_pressed: bool) {
            FIRST.fetch_add(1, Ordering::SeqCst);
        }
        extern "C" fn second(_pressed: bool) {
            SECOND.fetch_add(1, Ordering::SeqCst);
        }

        // Shutdown before any init is a no-op
        voicy_shutdown_keyboard_monitor();
        voicy_shutdown_keyboard_monitor();

        // Re-registration replaces the previous callback
        voicy_register_push_to_talk_callback(first);
        voicy_register_push_to_talk_callback(second);
        dispatch_edge(HotkeyEdge::Pressed);
        assert_eq!(FIRST.load(Ordering::SeqCst), 0);
        assert_eq!(SECOND.load(Ordering::SeqCst), 1);

        // Shutdown drops the callback; later edges go nowhere
        voicy_shutdown_keyboard_monitor();
        dispatch_edge(HotkeyEdge::Released);
        assert_eq!(SECOND.load(Ordering::SeqCst), 1);
    }
}
