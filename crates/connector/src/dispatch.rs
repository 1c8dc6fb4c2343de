use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use transitedge_middleware::Frame;

/// Handler invoked with the payload of one inbound event
pub type EventHandler = Box<dyn FnMut(Value) + Send + 'static>;

/// Dispatch table mapping inbound event names to handlers
#[derive(Default)]
pub struct EventDispatch {
    handlers: HashMap<String, EventHandler>,
}

impl EventDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register)
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.register(event, handler);
        self
    }

    /// Register a handler, replacing any previous handler for the same event
    pub fn register<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: FnMut(Value) + Send + 'static,
    {
        self.handlers.insert(event.into(), Box::new(handler));
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Invoke the handler for `frame.event`. Unregistered events are ignored
    /// and reported by returning false.
    pub fn dispatch(&mut self, frame: Frame) -> bool {
        match self.handlers.get_mut(&frame.event) {
            Some(handler) => {
                handler(frame.payload);
                true
            }
            None => false,
        }
    }

    /// Registered event names, sorted
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }
}

impl fmt::Debug for EventDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatch")
            .field("events", &self.events())
            .finish()
    }
}
