//! Lifecycle event subscription.
//!
//! A transport owns one [`EventEmitter`]. Subscribers register a handler per
//! [`EventName`]; handlers are shared closures, so a subscriber can keep its
//! own state alive by capturing it in the closure.

use std::sync::Arc;

use crate::model::{Event, EventName};

/// A subscribed event handler.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registered handlers, invoked in subscription order.
#[derive(Clone, Default)]
pub struct EventEmitter {
    handlers: Vec<(EventName, EventHandler)>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to events named `name`.
    pub fn on(&mut self, name: EventName, handler: EventHandler) {
        self.handlers.push((name, handler));
    }

    /// Deliver `event` to every handler subscribed to its name.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &Event) -> usize {
        let name = event.name();
        let mut delivered = 0;
        for (subscribed, handler) in &self.handlers {
            if *subscribed == name {
                handler(event);
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of handlers subscribed to `name`.
    pub fn listener_count(&self, name: EventName) -> usize {
        self.handlers.iter().filter(|(n, _)| *n == name).count()
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("new_thing", &self.listener_count(EventName::NewThing))
            .field("data", &self.listener_count(EventName::Data))
            .field("start", &self.listener_count(EventName::Start))
            .finish()
    }
}
