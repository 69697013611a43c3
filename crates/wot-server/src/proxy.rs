//! Upstream forwarding over WebSocket.
//!
//! A broker configured with `ws://` or `wss://` endpoints forwards every
//! payload it receives to `<endpoint>/object/<id>/send` on each of them.
//! One outbound connection is opened lazily per (endpoint, thing) pair and
//! reopened on the next payload after it drops. A link idle for
//! [`LINK_IDLE`] is closed and its entry pruned on the next forward.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::SinkExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use wot_protocol::encode_payload;

/// How long an upstream link may stay without payloads before it closes.
pub const LINK_IDLE: Duration = Duration::from_secs(60);

/// Forwards payloads to upstream WebSocket brokers.
#[derive(Debug)]
pub struct WebSocketProxy {
    endpoints: Vec<String>,
    links: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
}

impl WebSocketProxy {
    /// Build a proxy for the WebSocket endpoints in `endpoints`.
    ///
    /// Returns `None` when no usable endpoint remains.
    pub fn new(endpoints: &[String]) -> Option<Self> {
        let usable: Vec<String> = endpoints
            .iter()
            .filter(|endpoint| {
                let supported = endpoint.starts_with("ws://") || endpoint.starts_with("wss://");
                if !supported {
                    warn!("Skipping endpoint {}: only ws:// and wss:// can be proxied", endpoint);
                }
                supported
            })
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
            .collect();

        if usable.is_empty() {
            return None;
        }

        info!("Forwarding payloads to {:?}", usable);
        Some(Self {
            endpoints: usable,
            links: Mutex::new(HashMap::new()),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Open upstream links.
    pub fn link_count(&self) -> usize {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop links whose task has exited.
    pub fn prune(&self) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|url, link| {
                let closed = link.is_closed();
                if closed {
                    debug!("Pruning closed upstream link {}", url);
                }
                !closed
            });
    }

    /// Upstream URL for a thing on one endpoint.
    pub fn link_url(endpoint: &str, thing_id: &str) -> String {
        format!("{}/object/{}/send", endpoint, thing_id)
    }

    /// Forward a payload for `thing_id` to every endpoint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn forward(&self, thing_id: &str, data: &Value) {
        let text = match encode_payload(data) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot encode payload of {} for forwarding: {}", thing_id, e);
                return;
            }
        };

        self.prune();
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        for endpoint in &self.endpoints {
            let url = Self::link_url(endpoint, thing_id);

            let link = links
                .entry(url.clone())
                .or_insert_with(|| open_link(url.clone()));
            if let Err(mpsc::error::SendError(text)) = link.send(text.clone()) {
                // The link task exited; reopen and retry once
                let fresh = open_link(url.clone());
                if fresh.send(text).is_err() {
                    warn!("Dropping payload for {}", url);
                }
                links.insert(url, fresh);
            }
        }
    }
}

fn open_link(url: String) -> mpsc::UnboundedSender<String> {
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_link(url, link_rx));
    link_tx
}

async fn run_link(url: String, mut link_rx: mpsc::UnboundedReceiver<String>) {
    let (mut ws, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!("Cannot connect to upstream {}: {}", url, e);
            return;
        }
    };
    debug!("Connected to upstream {}", url);

    loop {
        let text = match tokio::time::timeout(LINK_IDLE, link_rx.recv()).await {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(_) => {
                debug!("Closing idle upstream link {}", url);
                break;
            }
        };
        if let Err(e) = ws.send(Message::Text(text)).await {
            warn!("Upstream {} failed: {}", url, e);
            return;
        }
    }

    ws.close(None).await.ok();
}
