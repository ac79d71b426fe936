//! Event dispatch
//!
//! Modules return their events to the engine, which forwards them here. The
//! bus logs every event and hands it to the single registered sink.

use log::info;
use std::cell::RefCell;
use std::rc::Rc;

use crate::types::DetectionEvent;

/// Callback receiving committed detections
pub type EventSink = Box<dyn FnMut(&DetectionEvent)>;

/// Single-consumer dispatcher
#[derive(Default)]
pub struct DetectionBus {
    sink: Option<EventSink>,
    dispatched: u64,
}

impl DetectionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sink, replacing any previous one
    pub fn set_sink(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Number of events dispatched since construction
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn emit(&mut self, event: DetectionEvent) {
        info!("[detect] {}: {}", event.kind, event.message);
        self.dispatched += 1;
        if let Some(sink) = self.sink.as_mut() {
            sink(&event);
        }
    }

    pub fn emit_all(&mut self, events: impl IntoIterator<Item = DetectionEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Sink that keeps events for later collection.
///
/// Clones share the same buffer: hand one to the engine, drain the other.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<DetectionEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxed sink feeding this recorder
    pub fn sink(&self) -> EventSink {
        let events = Rc::clone(&self.events);
        Box::new(move |event: &DetectionEvent| events.borrow_mut().push(event.clone()))
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<DetectionEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}
