//! Request routing.
//!
//! A transport turns each inbound request into a [`Request`], hands it to
//! the dispatch function it was started with, and acts on the [`Reply`].

use std::net::SocketAddr;

use tracing::debug;
use wot_core::RouteTable;
use wot_protocol::ServerMessage;

use crate::hub::Hub;

/// Request method, as far as handlers care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    /// A WebSocket upgrade.
    Connect,
    Other,
}

/// An inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub peer: SocketAddr,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, path: &str, peer: SocketAddr) -> Self {
        Self {
            method,
            path: path.to_string(),
            peer,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

/// What a handler asks the transport to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The request changed broker state (CoAP 2.04).
    Changed,
    /// Answer with a message.
    Content(ServerMessage),
    /// Keep the connection open and publish what the thing sends.
    Produce(String),
    /// Keep the connection open and stream the thing's payloads to it.
    Observe(String),
    NotFound,
    MethodNotAllowed,
}

/// A request handler, called with the captured thing id.
pub type RequestHandler = fn(&str, &Request, &Hub) -> Reply;

/// A transport's route table.
pub type Routes = RouteTable<RequestHandler>;

/// The dispatch function a transport is started with.
pub type Dispatch = fn(&Routes, &Request, &Hub) -> Reply;

/// Resolves request paths against a route table.
#[derive(Debug, Default, Clone, Copy)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// The dispatch function handed to a transport.
    pub fn dispatch(&self) -> Dispatch {
        Router::route
    }

    /// Invoke the first matching handler, or answer `NotFound`.
    pub fn route(routes: &Routes, request: &Request, hub: &Hub) -> Reply {
        match routes.resolve(&request.path) {
            Some(found) => {
                debug!(
                    "Routing {:?} {} to {} (id {})",
                    request.method, request.path, found.pattern, found.id
                );
                (found.handler)(&found.id, request, hub)
            }
            None => {
                debug!("No route for {:?} {}", request.method, request.path);
                Reply::NotFound
            }
        }
    }
}
