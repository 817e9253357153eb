//! Hardware stop-button watcher: an interface-only description (§2.2) of a
//! momentary-button input that publishes `short_press`/`long_press` events
//! onto the event bus. No GPIO backend is implemented here — the stub lets
//! the orchestrator's wiring code be exercised without depending on
//! board-specific crates, grounded on the original's `ButtonConfig`
//! dataclass (button presence is configuration, not a hard dependency).

use crate::event_bus::{Event, EventBus};

pub trait ButtonWatcher: Send {
    /// Start watching for presses, publishing onto `bus` as they occur.
    /// Implementations own any background thread they need; this call
    /// returns once watching has started (or immediately, for a stub).
    fn start(&mut self, bus: std::sync::Arc<std::sync::Mutex<EventBus>>);
}

/// Never fires. The default when no button hardware is configured.
pub struct NullButtonWatcher;

impl ButtonWatcher for NullButtonWatcher {
    fn start(&mut self, _bus: std::sync::Arc<std::sync::Mutex<EventBus>>) {
        log::debug!("button watcher (stub): no hardware backend configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::Topic;
    use std::sync::{Arc, Mutex};

    #[test]
    fn null_watcher_never_publishes() {
        let bus = Arc::new(Mutex::new(EventBus::new()));
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = fired.clone();
        bus.lock().unwrap().subscribe(
            Topic::ButtonShortPress,
            Box::new(move |_| fired_clone.store(true, std::sync::atomic::Ordering::SeqCst)),
        );

        let mut watcher = NullButtonWatcher;
        watcher.start(bus.clone());
        bus.lock().unwrap().publish(Event::ButtonLongPress);

        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
