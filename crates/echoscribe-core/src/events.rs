//! Event fan-out to connected clients
//!
//! The recorder and the pipeline publish protocol events through this
//! sink; the control channel forwards them to its client. A no-op sink
//! keeps headless use (tests, import tools) quiet.

use echoscribe_types::protocol::Event;
use std::sync::Arc;

/// Event consumer
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that drops everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Fan out one event to many sinks
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Arc<parking_lot::RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub fn emit(&self, event: Event) {
        for sink in self.sinks.read().iter() {
            sink.emit(event.clone());
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: Event) {
        EventBus::emit(self, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collector(Mutex<Vec<Event>>);
    impl EventSink for Collector {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_bus_fans_out() {
        let bus = EventBus::new();
        let a = Arc::new(Collector(Mutex::new(vec![])));
        let b = Arc::new(Collector(Mutex::new(vec![])));
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.emit(Event::SessionStopped {
            session_id: "s1".into(),
        });

        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }
}
