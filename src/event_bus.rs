//! In-process event bus (C9): decouples voice-pipeline events from
//! side-effect subscribers (LEDs, button watcher, anything else that wants
//! to react). Redesigned from the original's runtime-introspection
//! auto-subscribe into explicit `subscribe(topic, handler)` calls (§9 Design
//! Notes, "Dynamic message dispatch") — callers name exactly what they
//! listen for.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    WakeWord,
    Stop,
    TimerFinished,
    ButtonShortPress,
    ButtonLongPress,
    SessionStateChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WakeWord { phrase: String },
    Stop,
    TimerFinished,
    ButtonShortPress,
    ButtonLongPress,
    SessionStateChanged { listening: bool },
}

impl Event {
    fn topic(&self) -> Topic {
        match self {
            Event::WakeWord { .. } => Topic::WakeWord,
            Event::Stop => Topic::Stop,
            Event::TimerFinished => Topic::TimerFinished,
            Event::ButtonShortPress => Topic::ButtonShortPress,
            Event::ButtonLongPress => Topic::ButtonLongPress,
            Event::SessionStateChanged { .. } => Topic::SessionStateChanged,
        }
    }
}

type Handler = Box<dyn FnMut(&Event) + Send>;

/// A synchronous, single-threaded-dispatch pub/sub broker. `publish` runs
/// every matching subscriber's handler inline, in subscription order —
/// there is no queueing or cross-thread delivery (callers that need that
/// wrap the bus themselves, e.g. behind a channel).
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(Topic, Handler)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    pub fn subscribe(&mut self, topic: Topic, handler: Handler) {
        self.subscribers.push((topic, handler));
    }

    pub fn publish(&mut self, event: Event) {
        let topic = event.topic();
        for (subscribed_topic, handler) in &mut self.subscribers {
            if *subscribed_topic == topic {
                handler(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn publish_only_reaches_matching_topic() {
        let mut bus = EventBus::new();
        let wake_count = Arc::new(AtomicUsize::new(0));
        let stop_count = Arc::new(AtomicUsize::new(0));

        let wake_clone = wake_count.clone();
        bus.subscribe(Topic::WakeWord, Box::new(move |_| {
            wake_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let stop_clone = stop_count.clone();
        bus.subscribe(Topic::Stop, Box::new(move |_| {
            stop_clone.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(Event::WakeWord { phrase: "okay_nabu".to_string() });

        assert_eq!(wake_count.load(Ordering::SeqCst), 1);
        assert_eq!(stop_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn multiple_subscribers_on_same_topic_all_fire() {
        let mut bus = EventBus::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let clone = total.clone();
            bus.subscribe(Topic::TimerFinished, Box::new(move |_| {
                clone.fetch_add(1, Ordering::SeqCst);
            }));
        }

        bus.publish(Event::TimerFinished);
        assert_eq!(total.load(Ordering::SeqCst), 3);
    }
}
