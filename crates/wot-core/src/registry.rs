//! Thing registry.
//!
//! The framework keeps every thing a transport reports. The front-end calls
//! [`ThingRegistry::register_thing`] synchronously, before the user's
//! `onnewthing` callback sees the thing.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::model::Thing;

/// Trait for thing registry implementations.
pub trait ThingRegistry: Send + Sync {
    /// Record a thing. Registering an id again replaces the stored thing.
    fn register_thing(&self, thing: &Thing);

    /// Look up a thing by id.
    fn get(&self, id: &str) -> Option<Thing>;

    /// All registered things, in registration order.
    fn things(&self) -> Vec<Thing>;
}

/// In-memory registry. Things live for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    things: HashMap<String, Thing>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ThingRegistry for MemoryRegistry {
    fn register_thing(&self, thing: &Thing) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.things.insert(thing.id.clone(), thing.clone()).is_none() {
            inner.order.push(thing.id.clone());
        }
    }

    fn get(&self, id: &str) -> Option<Thing> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .things
            .get(id)
            .cloned()
    }

    fn things(&self) -> Vec<Thing> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|id| inner.things.get(id).cloned())
            .collect()
    }
}
