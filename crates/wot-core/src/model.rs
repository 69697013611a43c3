//! WoT broker data model types.
//!
//! These types are what a transport reports to the front-end:
//! - Things, announced on first contact
//! - Data payloads, as they arrive from a thing
//! - Start information, once a listener is up

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A registered device or object.
///
/// Things are reported by a transport the first time an id is seen. The
/// front-end does not interpret them beyond handing them to the registry
/// and the `onnewthing` callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    /// The object identifier captured from the request path.
    pub id: String,

    /// Remote address of the first contact, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<SocketAddr>,

    /// Name of the transport that reported the thing ("coap", "websocket").
    pub transport: String,

    /// When the thing was first seen.
    pub registered_at: DateTime<Utc>,
}

impl Thing {
    /// Create a thing first seen now.
    pub fn new(id: &str, transport: &str) -> Self {
        Self {
            id: id.to_string(),
            peer: None,
            transport: transport.to_string(),
            registered_at: Utc::now(),
        }
    }

    /// Set the remote address of the first contact.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

/// Data received from a thing.
///
/// The shape of `data` is transport-defined; the front-end passes it on
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPayload {
    /// Id of the thing the data belongs to.
    pub thing_id: String,

    /// The decoded payload.
    pub data: serde_json::Value,

    /// When the payload arrived at the broker.
    pub received_at: DateTime<Utc>,
}

impl DataPayload {
    pub fn new(thing_id: &str, data: serde_json::Value) -> Self {
        Self {
            thing_id: thing_id.to_string(),
            data,
            received_at: Utc::now(),
        }
    }
}

/// Reported once a transport listener is bound and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInfo {
    /// Name of the transport ("coap", "websocket").
    pub transport: String,

    /// The address the listener is actually bound to.
    pub local_addr: SocketAddr,

    /// Upstream endpoints the broker forwards to.
    pub endpoints: Vec<String>,
}

/// Names of the lifecycle events a transport emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "newThing")]
    NewThing,
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "start")]
    Start,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::NewThing => "newThing",
            EventName::Data => "data",
            EventName::Start => "start",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event emitted by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A thing made first contact.
    NewThing(Thing),
    /// A thing sent data.
    Data(DataPayload),
    /// The listener started.
    Start(StartInfo),
}

impl Event {
    /// The name subscribers use for this event.
    pub fn name(&self) -> EventName {
        match self {
            Event::NewThing(_) => EventName::NewThing,
            Event::Data(_) => EventName::Data,
            Event::Start(_) => EventName::Start,
        }
    }
}
