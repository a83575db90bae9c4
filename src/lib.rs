//! Voicy Core - on-device push-to-talk dictation engine
//!
//! This library is consumed by host applications over the C ABI in [`ffi`];
//! the Rust modules are exported for testing and embedding.

/// Configuration management
pub mod config;
/// Push-to-talk session orchestration
pub mod coordinator;
/// C ABI surface for host applications
pub mod ffi;
/// Hotkey monitoring backends and edge detection
pub mod input;
/// macOS permission checks
pub mod permissions;
/// Logging setup
pub mod telemetry;
/// Model resolution and whisper transcription engine
pub mod transcription;
