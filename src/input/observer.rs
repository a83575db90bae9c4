//! NSEvent observer hotkey backend.
//!
//! Registers a global and a local `flagsChanged` monitor pair. The global
//! monitor sees events routed to other applications, the local one sees
//! events for the host application itself; together they cover the full
//! modifier stream without any privileged grant. Both feed the same
//! [`EdgeDetector`], so overlapping deliveries collapse into clean edges.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_app_kit::{NSEvent, NSEventMask};

use super::{EdgeDetector, EdgeSink, HotkeyBackend, PushToTalkKey};

/// A registered NSEvent monitor token, removed on drop.
struct MonitorHandle(Retained<AnyObject>);

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        // SAFETY: the token came from addGlobalMonitor/addLocalMonitor and is
        // removed exactly once.
        #[allow(unsafe_code)]
        unsafe {
            NSEvent::removeMonitor(&self.0);
        }
    }
}

// SAFETY: monitor tokens are registered and removed on the host's designated
// FFI thread; the handle is never touched concurrently.
#[allow(unsafe_code)]
unsafe impl Send for MonitorHandle {}

/// Hotkey backend over an NSEvent global + local monitor pair.
pub struct ObserverBackend {
    key: PushToTalkKey,
    monitors: Vec<MonitorHandle>,
}

impl ObserverBackend {
    /// Creates a stopped backend watching `key`.
    #[must_use]
    pub fn new(key: PushToTalkKey) -> Self {
        Self {
            key,
            monitors: Vec::new(),
        }
    }
}

fn feed(detector: &Mutex<EdgeDetector>, sink: &EdgeSink, mask: u64, flags: u64) {
    let pressed = (flags & mask) != 0;
    let edge = detector.lock().ok().and_then(|mut d| d.observe(pressed));
    if let Some(edge) = edge {
        sink(edge);
    }
}

impl HotkeyBackend for ObserverBackend {
    #[allow(unsafe_code)]
    fn try_start(&mut self, sink: EdgeSink) -> bool {
        let mask = self.key.flag_mask();
        // One detector across both monitors: an event the local monitor
        // already reported must not re-trigger through the global one.
        let detector = Arc::new(Mutex::new(EdgeDetector::new()));

        let global_detector = Arc::clone(&detector);
        let global_sink = Arc::clone(&sink);
        let global_block = RcBlock::new(move |event: NonNull<NSEvent>| {
            // SAFETY: AppKit hands us a valid event for the callback duration.
            let flags = unsafe { event.as_ref().modifierFlags() };
            feed(&global_detector, &global_sink, mask, flags.0 as u64);
        });

        let local_detector = Arc::clone(&detector);
        let local_sink = Arc::clone(&sink);
        let local_block = RcBlock::new(move |event: NonNull<NSEvent>| -> *mut NSEvent {
            // SAFETY: AppKit hands us a valid event for the callback duration.
            let flags = unsafe { event.as_ref().modifierFlags() };
            feed(&local_detector, &local_sink, mask, flags.0 as u64);
            // Pass the event through unmodified
            event.as_ptr()
        });

        // SAFETY: blocks are copied by AppKit on registration and stay valid
        // until removeMonitor.
        let global = unsafe {
            NSEvent::addGlobalMonitorForEventsMatchingMask_handler(
                NSEventMask::FlagsChanged,
                &global_block,
            )
        };
        let Some(global) = global else {
            tracing::warn!("global NSEvent monitor registration refused");
            return false;
        };
        self.monitors.push(MonitorHandle(global));

        // SAFETY: same contract as the global monitor.
        let local = unsafe {
            NSEvent::addLocalMonitorForEventsMatchingMask_handler(
                NSEventMask::FlagsChanged,
                &local_block,
            )
        };
        match local {
            Some(local) => {
                self.monitors.push(MonitorHandle(local));
                true
            }
            None => {
                tracing::warn!("local NSEvent monitor registration refused");
                self.monitors.clear();
                false
            }
        }
    }

    fn stop(&mut self) {
        self.monitors.clear();
    }

    fn name(&self) -> &'static str {
        "observer"
    }
}
