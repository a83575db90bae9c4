/// Probes whether the accessibility grant needed by the event-tap hotkey
/// backend is in place.
///
/// Returns a plain boolean: the monitor falls back to the observer backend on
/// `false`, and surfacing the system permission prompt is the host
/// application's job. Creating a `CGEventSource` with `HIDSystemState` fails
/// without the grant, which makes it a cheap probe that never triggers the
/// prompt itself.
#[must_use]
pub fn accessibility_trusted() -> bool {
    #[cfg(target_os = "macos")]
    {
        use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

        match CGEventSource::new(CGEventSourceStateID::HIDSystemState) {
            Ok(_) => {
                tracing::debug!("accessibility permission granted");
                true
            }
            Err(()) => {
                tracing::warn!(
                    "accessibility permission not granted - event tap backend unavailable"
                );
                false
            }
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        false
    }
}
