//! WoT broker front-end.
//!
//! One [`Server`] API over two transports:
//! - CoAP over UDP, optionally proxying payloads to WebSocket endpoints
//! - WebSocket over TCP
//!
//! Both serve the same three routes under `/object/<id>/`.

pub mod coap;
pub mod framework;
pub mod hub;
pub mod proxy;
pub mod router;
pub mod server;
pub mod transport;
pub mod websocket;

pub use coap::{CoapBroker, CoapTransport};
pub use framework::Framework;
pub use hub::{Hub, Viewer};
pub use proxy::WebSocketProxy;
pub use router::{Dispatch, Method, Reply, Request, RequestHandler, Router, Routes};
pub use server::{Server, ServerError};
pub use transport::{
    ShutdownCallback, ShutdownStatus, TransportBroker, TransportError, TransportFactory,
};
pub use websocket::{WebSocketBroker, WebSocketTransport};

/// A thing publishing its payloads.
pub const SEND_ROUTE: &str = "/object/([A-Za-z0-9-]+)/send";

/// A viewer of a thing's payloads.
pub const VIEWER_ROUTE: &str = "/object/([A-Za-z0-9-]+)/viewer";

/// A thing's status.
pub const STATUS_ROUTE: &str = "/object/([A-Za-z0-9-]+)/status";

/// A framework serving CoAP.
pub fn coap_server() -> Framework {
    Framework::new(Server::create(CoapTransport, wot_core::Options::new()))
}

/// A framework serving WebSocket.
pub fn websocket_server() -> Framework {
    Framework::new(Server::create(WebSocketTransport, wot_core::Options::new()))
}
