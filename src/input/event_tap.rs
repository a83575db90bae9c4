//! CGEventTap hotkey backend.
//!
//! Listens for `flagsChanged` events on a session event tap, which requires
//! the accessibility grant. Modifier state is read from the event flags and
//! fed through the shared [`EdgeDetector`], so key-repeat and coalesced flag
//! updates never produce duplicate edges.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use super::{EdgeDetector, EdgeSink, HotkeyBackend, PushToTalkKey};

const K_CG_SESSION_EVENT_TAP: i32 = 1;
const K_CG_HEAD_INSERT_EVENT_TAP: i32 = 0;
// kCGEventTapOptionListenOnly: we observe, never modify or swallow events.
const K_CG_EVENT_TAP_OPTION_LISTEN_ONLY: i32 = 1;
const K_CG_EVENT_FLAGS_CHANGED: i32 = 12;

#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: i32,
        place: i32,
        options: i32,
        events_of_interest: u64,
        callback: Option<extern "C" fn(i32, i32, *mut c_void, *mut c_void) -> *mut c_void>,
        user_info: *mut c_void,
    ) -> *mut c_void;

    fn CGEventTapEnable(tap: *mut c_void, enable: bool);

    fn CGEventGetFlags(event: *mut c_void) -> u64;

    fn CFMachPortCreateRunLoopSource(
        allocator: *mut c_void,
        port: *mut c_void,
        order: i32,
    ) -> *mut c_void;

    fn CFRunLoopGetCurrent() -> *mut c_void;
    fn CFRunLoopAddSource(rl: *mut c_void, source: *mut c_void, mode: *const c_void);
    fn CFRunLoopRemoveSource(rl: *mut c_void, source: *mut c_void, mode: *const c_void);
    fn CFRunLoopRunInMode(
        mode: *const c_void,
        seconds: f64,
        return_after_source_handled: i32,
    ) -> i32;

    fn CFRelease(cf: *const c_void);

    static kCFRunLoopDefaultMode: *const c_void;
    static kCFRunLoopCommonModes: *const c_void;
}

/// Per-tap state handed to the C callback through `user_info`.
struct TapContext {
    mask: u64,
    detector: EdgeDetector,
    sink: EdgeSink,
}

extern "C" fn flags_changed_callback(
    _proxy: i32,
    event_type: i32,
    event: *mut c_void,
    user_info: *mut c_void,
) -> *mut c_void {
    if event_type == K_CG_EVENT_FLAGS_CHANGED && !user_info.is_null() {
        // SAFETY: user_info points to the Box<TapContext> installed at tap
        // creation, and the callback only ever runs on the tap thread.
        #[allow(unsafe_code)]
        let ctx = unsafe { &mut *user_info.cast::<TapContext>() };
        #[allow(unsafe_code)]
        let flags = unsafe { CGEventGetFlags(event) };
        let pressed = (flags & ctx.mask) != 0;
        if let Some(edge) = ctx.detector.observe(pressed) {
            (ctx.sink)(edge);
        }
    }
    event
}

/// Outcome of tap creation, reported back to `try_start` before the run loop
/// begins ticking.
enum TapStartup {
    Running,
    Refused,
}

/// Hotkey backend over a listen-only CGEventTap.
pub struct EventTapBackend {
    key: PushToTalkKey,
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl EventTapBackend {
    /// Creates a stopped backend watching `key`.
    #[must_use]
    pub fn new(key: PushToTalkKey) -> Self {
        Self {
            key,
            stop: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }
}

#[allow(unsafe_code)]
fn run_tap(mask: u64, sink: EdgeSink, stop: &AtomicBool, ready: &mpsc::Sender<TapStartup>) {
    let ctx = Box::new(TapContext {
        mask,
        detector: EdgeDetector::new(),
        sink,
    });
    let user_info = Box::into_raw(ctx).cast::<c_void>();

    // SAFETY: arguments follow the CGEventTapCreate contract; user_info stays
    // alive until reclaimed below, after the run loop has exited.
    unsafe {
        let tap = CGEventTapCreate(
            K_CG_SESSION_EVENT_TAP,
            K_CG_HEAD_INSERT_EVENT_TAP,
            K_CG_EVENT_TAP_OPTION_LISTEN_ONLY,
            1_u64 << K_CG_EVENT_FLAGS_CHANGED,
            Some(flags_changed_callback),
            user_info,
        );

        if tap.is_null() {
            drop(Box::from_raw(user_info.cast::<TapContext>()));
            let _ = ready.send(TapStartup::Refused);
            return;
        }

        let source = CFMachPortCreateRunLoopSource(std::ptr::null_mut(), tap, 0);
        if source.is_null() {
            CFRelease(tap.cast_const());
            drop(Box::from_raw(user_info.cast::<TapContext>()));
            let _ = ready.send(TapStartup::Refused);
            return;
        }

        let rl = CFRunLoopGetCurrent();
        CFRunLoopAddSource(rl, source, kCFRunLoopCommonModes);
        CGEventTapEnable(tap, true);

        let _ = ready.send(TapStartup::Running);

        // Tick so the stop flag gets checked between event deliveries.
        while !stop.load(Ordering::Relaxed) {
            CFRunLoopRunInMode(kCFRunLoopDefaultMode, 0.25, 0);
        }

        CFRunLoopRemoveSource(rl, source, kCFRunLoopCommonModes);
        CFRelease(source.cast_const());
        CFRelease(tap.cast_const());

        // The callback can no longer fire; reclaim the context.
        drop(Box::from_raw(user_info.cast::<TapContext>()));
    }
}

impl HotkeyBackend for EventTapBackend {
    fn try_start(&mut self, sink: EdgeSink) -> bool {
        self.stop.store(false, Ordering::Relaxed);
        let mask = self.key.flag_mask();
        let stop = Arc::clone(&self.stop);
        let (ready_tx, ready_rx) = mpsc::channel();

        let spawned = std::thread::Builder::new()
            .name("voicy-event-tap".to_owned())
            .spawn(move || run_tap(mask, sink, &stop, &ready_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn event tap thread");
                return false;
            }
        };

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(TapStartup::Running) => {
                self.join = Some(handle);
                true
            }
            Ok(TapStartup::Refused) | Err(_) => {
                tracing::warn!("event tap creation refused");
                self.stop.store(true, Ordering::Relaxed);
                let _ = handle.join();
                false
            }
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }

    fn name(&self) -> &'static str {
        "event-tap"
    }
}
