//! CoAP request handlers.
//!
//! Every CoAP request is a single datagram, so handlers answer immediately.

use wot_protocol::{decode_payload, ServerMessage};

use crate::hub::Hub;
use crate::router::{Method, Reply, Request};

/// POST/PUT `/object/<id>/send`: publish the body, forwarding it upstream
/// when the broker has WebSocket endpoints.
pub fn send_proxying_websocket(id: &str, request: &Request, hub: &Hub) -> Reply {
    if !matches!(request.method, Method::Post | Method::Put) {
        return Reply::MethodNotAllowed;
    }
    hub.publish(id, request.peer, decode_payload(&request.body));
    Reply::Changed
}

/// GET `/object/<id>/viewer`: the latest payload from the thing.
pub fn viewer(id: &str, request: &Request, hub: &Hub) -> Reply {
    if request.method != Method::Get {
        return Reply::MethodNotAllowed;
    }
    match hub.latest(id) {
        Some(payload) => Reply::Content(ServerMessage::Data(payload)),
        None => Reply::NotFound,
    }
}

/// GET `/object/<id>/status`.
pub fn status(id: &str, request: &Request, hub: &Hub) -> Reply {
    if request.method != Method::Get {
        return Reply::MethodNotAllowed;
    }
    Reply::Content(ServerMessage::Status(hub.status(id)))
}
