//! The transport capability shared by the CoAP and WebSocket brokers.
//!
//! The front-end only ever sees a [`TransportBroker`]: subscribe to the
//! three lifecycle events, start serving with a dispatch function and a
//! route table, shut down with a completion callback.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use wot_core::{BrokerConfig, ConfigError, Event, EventEmitter, EventHandler, EventName, RouteError};
use wot_protocol::CodecError;

use crate::router::{Dispatch, Routes};

/// Outcome reported to a shutdown completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownStatus {
    /// Whether a listener was actually running and has now stopped.
    pub was_running: bool,
}

impl ShutdownStatus {
    pub fn stopped() -> Self {
        Self { was_running: true }
    }

    pub fn not_running() -> Self {
        Self { was_running: false }
    }
}

/// Called exactly once when a shutdown completes.
pub type ShutdownCallback = Box<dyn FnOnce(ShutdownStatus) + Send>;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport is already started")]
    AlreadyStarted,

    #[error("Transport must be started from within a tokio runtime")]
    NoRuntime,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("CoAP message error")]
    Coap(#[from] coap_lite::error::MessageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// A network listener for one protocol.
pub trait TransportBroker: Send {
    /// Transport name ("coap", "websocket").
    fn name(&self) -> &'static str;

    /// Subscribe a handler to a lifecycle event. Must be called before `start`.
    fn on(&mut self, event: EventName, handler: EventHandler);

    /// Bind the listener and begin serving, routing requests with
    /// `dispatch` over `routes`. Bind errors are returned; everything after
    /// that happens on the tokio runtime.
    fn start(&mut self, dispatch: Dispatch, routes: Routes) -> Result<(), TransportError>;

    /// Stop serving. `done` is invoked once teardown has finished.
    fn shutdown(&mut self, done: ShutdownCallback);

    /// The bound address while running.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Builds the broker and the route table for one transport variant.
pub trait TransportFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Construct a broker for `config`. Does not bind.
    fn build(&self, config: &BrokerConfig) -> Result<Box<dyn TransportBroker>, TransportError>;

    /// The variant's static route table.
    fn routes(&self) -> Result<Routes, RouteError>;
}

/// Book-keeping for a started broker.
pub(crate) struct Running {
    pub(crate) local_addr: SocketAddr,
    stop_tx: oneshot::Sender<ShutdownCallback>,
}

impl Running {
    /// Returns the handle and the receiver the serving task listens on.
    pub(crate) fn new(local_addr: SocketAddr) -> (Self, oneshot::Receiver<ShutdownCallback>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        (Self { local_addr, stop_tx }, stop_rx)
    }

    /// Ask the serving task to stop. If it has already exited the callback
    /// runs here.
    pub(crate) fn stop(self, done: ShutdownCallback) {
        if let Err(done) = self.stop_tx.send(done) {
            debug!("Serving task on {} already exited", self.local_addr);
            done(ShutdownStatus::not_running());
        }
    }
}

/// Fail with [`TransportError::NoRuntime`] unless called on a tokio runtime.
pub(crate) fn require_runtime() -> Result<(), TransportError> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| TransportError::NoRuntime)
}

/// Spawn the task that delivers events to subscribers one at a time.
///
/// The task ends when every sender is dropped.
pub(crate) fn spawn_event_dispatcher(emitter: EventEmitter) -> mpsc::UnboundedSender<Event> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let delivered = emitter.emit(&event);
            debug!("Delivered {} event to {} handler(s)", event.name(), delivered);
        }
    });
    events_tx
}
