//! Messages sent from a broker to its clients.
//!
//! - Viewers receive every payload a thing publishes
//! - Status clients receive one status document per request
//!
//! Messages are serialized as JSON with a `type` tag and a `data` body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wot_core::DataPayload;

/// Status of a thing as seen by one broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingStatus {
    /// The thing id.
    pub id: String,

    /// Whether the broker has seen this thing.
    pub registered: bool,

    /// Number of payloads received from the thing.
    pub message_count: u64,

    /// When the latest payload arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,

    /// Number of viewers attached to this thing.
    pub viewers: usize,
}

impl ThingStatus {
    /// Status for an id the broker has never seen.
    pub fn unknown(id: &str, viewers: usize) -> Self {
        Self {
            id: id.to_string(),
            registered: false,
            message_count: 0,
            last_seen: None,
            viewers,
        }
    }
}

/// Messages that can be sent from broker to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// A payload published by a thing.
    Data(DataPayload),

    /// A status document.
    Status(ThingStatus),
}
