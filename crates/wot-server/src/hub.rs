//! State shared by all connections of one broker.
//!
//! The hub knows which things have made contact, keeps the latest payload
//! of each, fans payloads out to viewers and feeds lifecycle events to the
//! broker's event dispatcher.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use wot_core::{DataPayload, Event, Thing};
use wot_protocol::ThingStatus;

use crate::proxy::WebSocketProxy;

/// Capacity of the viewer feed before slow viewers start lagging.
const FEED_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ThingRecord {
    thing: Thing,
    latest: Option<DataPayload>,
    message_count: u64,
}

/// Per-broker connection state.
pub struct Hub {
    transport: &'static str,
    events: mpsc::UnboundedSender<Event>,
    things: Mutex<HashMap<String, ThingRecord>>,
    feed: broadcast::Sender<DataPayload>,
    viewers: Mutex<HashMap<String, usize>>,
    proxy: Option<WebSocketProxy>,
}

impl Hub {
    pub fn new(
        transport: &'static str,
        events: mpsc::UnboundedSender<Event>,
        proxy: Option<WebSocketProxy>,
    ) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            transport,
            events,
            things: Mutex::new(HashMap::new()),
            feed,
            viewers: Mutex::new(HashMap::new()),
            proxy,
        }
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }

    /// Send an event to the broker's subscribers.
    pub fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Event dispatcher for {} is gone", self.transport);
        }
    }

    /// Record contact from `id`. The first contact emits `NewThing`.
    ///
    /// Returns true if the thing was new.
    pub fn touch(&self, id: &str, peer: SocketAddr) -> bool {
        let mut things = self.things.lock().unwrap_or_else(PoisonError::into_inner);
        if things.contains_key(id) {
            return false;
        }

        let thing = Thing::new(id, self.transport).with_peer(peer);
        info!("New thing {} from {} over {}", id, peer, self.transport);
        // Emitted under the lock so no Data for this id can overtake it
        self.emit(Event::NewThing(thing.clone()));
        things.insert(
            id.to_string(),
            ThingRecord {
                thing,
                latest: None,
                message_count: 0,
            },
        );
        true
    }

    /// Publish a payload from `id`: record it, emit `Data`, fan it out to
    /// viewers and forward it upstream.
    pub fn publish(&self, id: &str, peer: SocketAddr, data: Value) -> DataPayload {
        self.touch(id, peer);

        let payload = DataPayload::new(id, data);
        {
            let mut things = self.things.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(record) = things.get_mut(id) {
                record.latest = Some(payload.clone());
                record.message_count += 1;
            }
            self.emit(Event::Data(payload.clone()));
        }

        // No receivers is fine
        let _ = self.feed.send(payload.clone());

        if let Some(proxy) = &self.proxy {
            proxy.forward(id, &payload.data);
        }

        payload
    }

    /// The latest payload from `id`.
    pub fn latest(&self, id: &str) -> Option<DataPayload> {
        self.things
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .and_then(|record| record.latest.clone())
    }

    /// The thing record for `id`, if it has made contact.
    pub fn thing(&self, id: &str) -> Option<Thing> {
        self.things
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|record| record.thing.clone())
    }

    /// Status document for `id`.
    pub fn status(&self, id: &str) -> ThingStatus {
        let viewers = self.viewers_of(id);
        let things = self.things.lock().unwrap_or_else(PoisonError::into_inner);
        match things.get(id) {
            Some(record) => ThingStatus {
                id: id.to_string(),
                registered: true,
                message_count: record.message_count,
                last_seen: record.latest.as_ref().map(|p| p.received_at),
                viewers,
            },
            None => ThingStatus::unknown(id, viewers),
        }
    }

    /// Attach a viewer to `id`. It counts towards the thing's viewers
    /// until dropped.
    pub fn watch(&self, id: &str) -> Viewer<'_> {
        *self
            .viewers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default() += 1;
        Viewer {
            hub: self,
            id: id.to_string(),
            feed: self.feed.subscribe(),
        }
    }

    /// Viewers attached to `id`.
    pub fn viewers_of(&self, id: &str) -> usize {
        self.viewers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Viewers attached to any thing.
    pub fn viewer_count(&self) -> usize {
        self.feed.receiver_count()
    }
}

/// A viewer of one thing's payloads.
pub struct Viewer<'a> {
    hub: &'a Hub,
    id: String,
    feed: broadcast::Receiver<DataPayload>,
}

impl Viewer<'_> {
    /// The next payload published by the watched thing.
    ///
    /// Cancel safe. Lagging reports how many payloads of all things were
    /// skipped.
    pub async fn recv(&mut self) -> Result<DataPayload, broadcast::error::RecvError> {
        loop {
            let payload = self.feed.recv().await?;
            if payload.thing_id == self.id {
                return Ok(payload);
            }
        }
    }
}

impl Drop for Viewer<'_> {
    fn drop(&mut self) {
        let mut viewers = self
            .hub
            .viewers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = viewers.get_mut(&self.id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                viewers.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("transport", &self.transport)
            .field("viewers", &self.viewer_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5683".parse().unwrap()
    }

    #[test]
    fn test_first_contact_emits_new_thing_once() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new("coap", events_tx, None);

        assert!(hub.touch("lamp", peer()));
        assert!(!hub.touch("lamp", peer()));

        match events_rx.try_recv().unwrap() {
            Event::NewThing(thing) => {
                assert_eq!(thing.id, "lamp");
                assert_eq!(thing.transport, "coap");
                assert_eq!(thing.peer, Some(peer()));
            }
            other => panic!("Expected NewThing, got {other:?}"),
        }
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_orders_new_thing_before_data() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new("coap", events_tx, None);

        hub.publish("sensor-1", peer(), serde_json::json!({"t": 20}));
        hub.publish("sensor-1", peer(), serde_json::json!({"t": 21}));

        let names: Vec<_> = std::iter::from_fn(|| events_rx.try_recv().ok())
            .map(|e| e.name().as_str())
            .collect();
        assert_eq!(names, vec!["newThing", "data", "data"]);

        assert_eq!(hub.latest("sensor-1").unwrap().data["t"], 21);
        let status = hub.status("sensor-1");
        assert!(status.registered);
        assert_eq!(status.message_count, 2);
        assert!(status.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_viewers_receive_their_thing_only() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new("websocket", events_tx, None);
        let mut viewer = hub.watch("a");

        hub.publish("b", peer(), serde_json::json!("off"));
        hub.publish("a", peer(), serde_json::json!("on"));

        let payload = viewer.recv().await.unwrap();
        assert_eq!(payload.thing_id, "a");
        assert_eq!(payload.data, serde_json::json!("on"));
    }

    #[test]
    fn test_status_counts_viewers_per_thing() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new("websocket", events_tx, None);

        let first = hub.watch("a");
        let second = hub.watch("a");
        let other = hub.watch("b");

        assert_eq!(hub.status("a").viewers, 2);
        assert_eq!(hub.status("b").viewers, 1);
        assert_eq!(hub.status("c").viewers, 0);
        assert_eq!(hub.viewer_count(), 3);

        drop(first);
        drop(other);
        assert_eq!(hub.status("a").viewers, 1);
        assert_eq!(hub.status("b").viewers, 0);

        drop(second);
        assert_eq!(hub.viewers_of("a"), 0);
    }

    #[test]
    fn test_unknown_status() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new("coap", events_tx, None);

        let status = hub.status("ghost");
        assert!(!status.registered);
        assert_eq!(status.message_count, 0);
        assert!(hub.latest("ghost").is_none());
        assert!(hub.thing("ghost").is_none());
    }

    #[test]
    fn test_emit_without_dispatcher_is_harmless() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        drop(events_rx);
        let hub = Hub::new("coap", events_tx, None);
        assert!(hub.touch("a", peer()));
    }
}
