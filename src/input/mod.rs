//! Push-to-talk hotkey monitoring.
//!
//! Two interchangeable backends watch the configured modifier key:
//! a CGEventTap ([`event_tap`]) that needs the accessibility grant, and an
//! NSEvent monitor pair ([`observer`]) that works without it. The monitor
//! tries them in that order and keeps the first that starts. Both feed raw
//! key state through the same [`EdgeDetector`] so debouncing behaves
//! identically regardless of which backend won.

#[cfg(target_os = "macos")]
pub mod event_tap;
#[cfg(target_os = "macos")]
pub mod observer;

use std::sync::Arc;

/// A state transition of the push-to-talk key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEdge {
    /// Key went from up to down.
    Pressed,
    /// Key went from down to up.
    Released,
}

/// Collapses repeated raw key-state reports into clean press/release edges.
///
/// OS event streams repeat the current state (key-repeat, coalesced flag
/// changes), so a session must only ever see alternating edges. Backends
/// share one detector per monitor.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    held: bool,
}

impl EdgeDetector {
    /// Creates a detector with the key considered up.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a raw key-state report; returns an edge only when state changed.
    pub fn observe(&mut self, pressed: bool) -> Option<HotkeyEdge> {
        if pressed == self.held {
            return None;
        }
        self.held = pressed;
        Some(if pressed {
            HotkeyEdge::Pressed
        } else {
            HotkeyEdge::Released
        })
    }
}

/// Destination for debounced edges. Invoked on the backend's event thread.
pub type EdgeSink = Arc<dyn Fn(HotkeyEdge) + Send + Sync>;

/// The modifier key used for push-to-talk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushToTalkKey {
    /// The globe/fn key.
    Fn,
    /// Either command key.
    Command,
    /// Either option key.
    Option,
    /// Either control key.
    Control,
    /// Either shift key.
    Shift,
}

impl PushToTalkKey {
    /// Parses the config spelling; unknown values fall back to `Fn`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "command" | "cmd" => Self::Command,
            "option" | "alt" => Self::Option,
            "control" | "ctrl" => Self::Control,
            "shift" => Self::Shift,
            "fn" | "globe" => Self::Fn,
            other => {
                tracing::warn!(key = other, "unknown push-to-talk key, using fn");
                Self::Fn
            }
        }
    }

    /// Device-independent modifier bit shared by `CGEventFlags` and
    /// `NSEvent.ModifierFlags`.
    #[must_use]
    pub const fn flag_mask(self) -> u64 {
        match self {
            Self::Shift => 1 << 17,
            Self::Control => 1 << 18,
            Self::Option => 1 << 19,
            Self::Command => 1 << 20,
            Self::Fn => 1 << 23,
        }
    }
}

/// A key-monitoring strategy.
///
/// `try_start` must return quickly: `false` means this backend cannot run in
/// the current environment (missing permission, registration refused) and the
/// monitor moves on to the next candidate.
pub trait HotkeyBackend: Send {
    /// Attempts to start delivering edges to `sink`.
    fn try_start(&mut self, sink: EdgeSink) -> bool;

    /// Stops event delivery and releases OS resources. Must be safe to call
    /// when the backend never started.
    fn stop(&mut self);

    /// Stable name for logs.
    fn name(&self) -> &'static str;
}

/// Push-to-talk monitor over an ordered list of backend candidates.
pub struct HotkeyMonitor {
    candidates: Vec<Box<dyn HotkeyBackend>>,
    active: Option<usize>,
}

impl HotkeyMonitor {
    /// Creates a monitor over backend candidates in priority order.
    #[must_use]
    pub fn with_backends(candidates: Vec<Box<dyn HotkeyBackend>>) -> Self {
        Self {
            candidates,
            active: None,
        }
    }

    /// Creates the production monitor for `key`: event tap first (when the
    /// accessibility grant is in place), observer pair as fallback.
    #[cfg(target_os = "macos")]
    #[must_use]
    pub fn for_key(key: PushToTalkKey) -> Self {
        let mut candidates: Vec<Box<dyn HotkeyBackend>> = Vec::with_capacity(2);
        if crate::permissions::accessibility_trusted() {
            candidates.push(Box::new(event_tap::EventTapBackend::new(key)));
        }
        candidates.push(Box::new(observer::ObserverBackend::new(key)));
        Self::with_backends(candidates)
    }

    /// Starts the first backend that accepts. Returns `false` when every
    /// candidate refused. Calling on a running monitor is a no-op returning
    /// `true`.
    pub fn start(&mut self, sink: EdgeSink) -> bool {
        if self.active.is_some() {
            tracing::debug!("hotkey monitor already running");
            return true;
        }

        for (index, backend) in self.candidates.iter_mut().enumerate() {
            if backend.try_start(Arc::clone(&sink)) {
                tracing::info!(backend = backend.name(), "hotkey monitoring started");
                self.active = Some(index);
                return true;
            }
            tracing::warn!(backend = backend.name(), "hotkey backend unavailable");
        }

        tracing::error!("no hotkey backend available");
        false
    }

    /// Stops the running backend, if any. Idempotent.
    pub fn stop(&mut self) {
        if let Some(index) = self.active.take() {
            if let Some(backend) = self.candidates.get_mut(index) {
                backend.stop();
                tracing::info!(backend = backend.name(), "hotkey monitoring stopped");
            }
        }
    }

    /// Whether a backend is currently delivering events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for HotkeyMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeBackend {
        accepts: bool,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        sink: Option<EdgeSink>,
    }

    impl FakeBackend {
        fn new(accepts: bool) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let starts = Arc::new(AtomicUsize::new(0));
            let stops = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    accepts,
                    starts: Arc::clone(&starts),
                    stops: Arc::clone(&stops),
                    sink: None,
                },
                starts,
                stops,
            )
        }
    }

    impl HotkeyBackend for FakeBackend {
        fn try_start(&mut self, sink: EdgeSink) -> bool {
            if self.accepts {
                self.starts.fetch_add(1, Ordering::SeqCst);
                self.sink = Some(sink);
            }
            self.accepts
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.sink = None;
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn collecting_sink() -> (EdgeSink, Arc<Mutex<Vec<HotkeyEdge>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_sink = Arc::clone(&seen);
        let sink: EdgeSink = Arc::new(move |edge| {
            seen_in_sink.lock().unwrap().push(edge);
        });
        (sink, seen)
    }

    #[test]
    fn test_edge_detector_collapses_repeats() {
        let mut detector = EdgeDetector::new();
        assert_eq!(detector.observe(true), Some(HotkeyEdge::Pressed));
        assert_eq!(detector.observe(true), None);
        assert_eq!(detector.observe(true), None);
        assert_eq!(detector.observe(false), Some(HotkeyEdge::Released));
        assert_eq!(detector.observe(false), None);
        assert_eq!(detector.observe(true), Some(HotkeyEdge::Pressed));
    }

    #[test]
    fn test_edge_detector_starts_released() {
        let mut detector = EdgeDetector::new();
        // A key-up report with no prior press is not an edge
        assert_eq!(detector.observe(false), None);
    }

    #[test]
    fn test_parse_key_names() {
        assert_eq!(PushToTalkKey::parse("fn"), PushToTalkKey::Fn);
        assert_eq!(PushToTalkKey::parse("globe"), PushToTalkKey::Fn);
        assert_eq!(PushToTalkKey::parse("Command"), PushToTalkKey::Command);
        assert_eq!(PushToTalkKey::parse("cmd"), PushToTalkKey::Command);
        assert_eq!(PushToTalkKey::parse("alt"), PushToTalkKey::Option);
        assert_eq!(PushToTalkKey::parse("ctrl"), PushToTalkKey::Control);
        assert_eq!(PushToTalkKey::parse("shift"), PushToTalkKey::Shift);
        // Unknown spellings fall back rather than fail
        assert_eq!(PushToTalkKey::parse("hyper"), PushToTalkKey::Fn);
    }

    #[test]
    fn test_flag_masks_match_device_independent_bits() {
        assert_eq!(PushToTalkKey::Shift.flag_mask(), 0x0002_0000);
        assert_eq!(PushToTalkKey::Control.flag_mask(), 0x0004_0000);
        assert_eq!(PushToTalkKey::Option.flag_mask(), 0x0008_0000);
        assert_eq!(PushToTalkKey::Command.flag_mask(), 0x0010_0000);
        assert_eq!(PushToTalkKey::Fn.flag_mask(), 0x0080_0000);
    }

    #[test]
    fn test_monitor_falls_back_to_second_backend() {
        let (first, first_starts, _) = FakeBackend::new(false);
        let (second, second_starts, _) = FakeBackend::new(true);
        let mut monitor = HotkeyMonitor::with_backends(vec![Box::new(first), Box::new(second)]);

        let (sink, _) = collecting_sink();
        assert!(monitor.start(sink));
        assert!(monitor.is_running());
        assert_eq!(first_starts.load(Ordering::SeqCst), 0);
        assert_eq!(second_starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_monitor_fails_when_all_backends_refuse() {
        let (first, ..) = FakeBackend::new(false);
        let (second, ..) = FakeBackend::new(false);
        let mut monitor = HotkeyMonitor::with_backends(vec![Box::new(first), Box::new(second)]);

        let (sink, _) = collecting_sink();
        assert!(!monitor.start(sink));
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_monitor_start_idempotent() {
        let (backend, starts, _) = FakeBackend::new(true);
        let mut monitor = HotkeyMonitor::with_backends(vec![Box::new(backend)]);

        let (sink, _) = collecting_sink();
        assert!(monitor.start(Arc::clone(&sink)));
        assert!(monitor.start(sink));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_monitor_stop_idempotent() {
        let (backend, _, stops) = FakeBackend::new(true);
        let mut monitor = HotkeyMonitor::with_backends(vec![Box::new(backend)]);

        // Stop before start is a no-op
        monitor.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        let (sink, _) = collecting_sink();
        assert!(monitor.start(sink));
        monitor.stop();
        monitor.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_monitor_restart_after_stop() {
        let (backend, starts, stops) = FakeBackend::new(true);
        let mut monitor = HotkeyMonitor::with_backends(vec![Box::new(backend)]);

        let (sink, _) = collecting_sink();
        assert!(monitor.start(Arc::clone(&sink)));
        monitor.stop();
        assert!(monitor.start(sink));
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sink_receives_debounced_edges() {
        // Simulates what a backend does with a shared detector
        let (sink, seen) = collecting_sink();
        let mut detector = EdgeDetector::new();

        for pressed in [true, true, false, false, true, false] {
            if let Some(edge) = detector.observe(pressed) {
                sink(edge);
            }
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                HotkeyEdge::Pressed,
                HotkeyEdge::Released,
                HotkeyEdge::Pressed,
                HotkeyEdge::Released,
            ]
        );
    }
}
