//! WebSocket broker.
//!
//! This module provides the WebSocket listener that handles:
//! - Connection upgrade and routing on the handshake path
//! - Sender connections publishing a thing's payloads
//! - Viewer connections receiving a thing's payloads
//! - One-shot status connections

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as Handshake, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use wot_core::{BrokerConfig, Event, EventEmitter, EventHandler, EventName, RouteError, StartInfo};
use wot_protocol::{decode_payload, decode_text_payload, encode_server_message, ServerMessage};

use crate::hub::Hub;
use crate::router::{Dispatch, Method, Reply, Request, Routes};
use crate::transport::{
    require_runtime, spawn_event_dispatcher, Running, ShutdownCallback, ShutdownStatus,
    TransportBroker, TransportError, TransportFactory,
};
use crate::{SEND_ROUTE, STATUS_ROUTE, VIEWER_ROUTE};

pub const TRANSPORT: &str = "websocket";

/// The WebSocket route table.
pub fn routes() -> Result<Routes, RouteError> {
    Routes::new()
        .route(SEND_ROUTE, handlers::send)?
        .route(VIEWER_ROUTE, handlers::viewer)?
        .route(STATUS_ROUTE, handlers::status)
}

/// Builds [`WebSocketBroker`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl TransportFactory for WebSocketTransport {
    fn name(&self) -> &'static str {
        TRANSPORT
    }

    fn build(&self, config: &BrokerConfig) -> Result<Box<dyn TransportBroker>, TransportError> {
        Ok(Box::new(WebSocketBroker::new(config.clone())?))
    }

    fn routes(&self) -> Result<Routes, RouteError> {
        routes()
    }
}

/// The WebSocket listener.
pub struct WebSocketBroker {
    config: BrokerConfig,
    bind_addr: SocketAddr,
    emitter: EventEmitter,
    running: Option<Running>,
}

impl WebSocketBroker {
    pub fn new(config: BrokerConfig) -> Result<Self, TransportError> {
        let bind_addr = config.bind_addr()?;
        Ok(Self {
            config,
            bind_addr,
            emitter: EventEmitter::new(),
            running: None,
        })
    }
}

impl TransportBroker for WebSocketBroker {
    fn name(&self) -> &'static str {
        TRANSPORT
    }

    fn on(&mut self, event: EventName, handler: EventHandler) {
        self.emitter.on(event, handler);
    }

    fn start(&mut self, dispatch: Dispatch, routes: Routes) -> Result<(), TransportError> {
        if self.running.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        require_runtime()?;

        let listener = std::net::TcpListener::bind(self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let local_addr = listener.local_addr()?;

        let events = spawn_event_dispatcher(self.emitter.clone());
        // Only the CoAP broker forwards upstream
        let hub = Arc::new(Hub::new(TRANSPORT, events, None));
        hub.emit(Event::Start(StartInfo {
            transport: TRANSPORT.to_string(),
            local_addr,
            endpoints: self.config.endpoints.clone(),
        }));

        let (running, stop_rx) = Running::new(local_addr);
        tokio::spawn(serve(listener, dispatch, Arc::new(routes), hub, stop_rx));

        info!("WebSocket broker listening on {}", local_addr);
        self.running = Some(running);
        Ok(())
    }

    fn shutdown(&mut self, done: ShutdownCallback) {
        match self.running.take() {
            Some(running) => running.stop(done),
            None => done(ShutdownStatus::not_running()),
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }
}

/// Accept loop. Each connection runs in its own task; all of them are
/// aborted on shutdown.
async fn serve(
    listener: TcpListener,
    dispatch: Dispatch,
    routes: Arc<Routes>,
    hub: Arc<Hub>,
    mut stop_rx: oneshot::Receiver<ShutdownCallback>,
) {
    let mut connections = JoinSet::new();

    let done = loop {
        tokio::select! {
            done = &mut stop_rx => break done.ok(),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let routes = routes.clone();
                    let hub = hub.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, dispatch, routes, hub).await {
                            warn!("Connection error from {}: {}", peer, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    drop(listener);
    connections.shutdown().await;
    info!("WebSocket broker stopped");
    if let Some(done) = done {
        done(ShutdownStatus::stopped());
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatch: Dispatch,
    routes: Arc<Routes>,
    hub: Arc<Hub>,
) -> Result<(), TransportError> {
    debug!("New connection from {}", peer);

    // Capture the request path during the handshake
    let path = Arc::new(RwLock::new(String::from("/")));
    let path_clone = path.clone();

    let mut ws = tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Handshake, resp: HandshakeResponse| {
            if let Ok(mut path) = path_clone.try_write() {
                *path = req.uri().path().to_string();
            }
            Ok::<_, ErrorResponse>(resp)
        },
    )
    .await?;

    let path = path.read().await.clone();
    let request = Request::new(Method::Connect, &path, peer);

    match dispatch(&routes, &request, &hub) {
        Reply::Produce(id) => produce(ws, &id, peer, &hub).await,
        Reply::Observe(id) => observe(ws, &id, &hub).await,
        Reply::Content(message) => {
            let text = encode_server_message(&message)?;
            ws.send(Message::Text(text)).await?;
            ws.close(None).await?;
            Ok(())
        }
        other => {
            debug!("Closing {} from {}: {:?}", path, peer, other);
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "no route".into(),
            }))
            .await?;
            Ok(())
        }
    }
}

/// Publish every frame the thing sends until it disconnects.
async fn produce(
    mut ws: WebSocketStream<TcpStream>,
    id: &str,
    peer: SocketAddr,
    hub: &Hub,
) -> Result<(), TransportError> {
    info!("Thing {} sending from {}", id, peer);

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                hub.publish(id, peer, decode_text_payload(&text));
            }
            Message::Binary(bytes) => {
                hub.publish(id, peer, decode_payload(&bytes));
            }
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(_) => {
                info!("Thing {} closed connection", id);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

/// Stream the thing's payloads to a viewer until it disconnects.
async fn observe(
    ws: WebSocketStream<TcpStream>,
    id: &str,
    hub: &Hub,
) -> Result<(), TransportError> {
    let mut viewer = hub.watch(id);
    let (mut ws_tx, mut ws_rx) = ws.split();
    debug!("Viewer attached to {}", id);

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Ping(data))) => ws_tx.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Viewer of {} failed: {}", id, e);
                    break;
                }
            },
            payload = viewer.recv() => match payload {
                Ok(payload) => {
                    let text = encode_server_message(&ServerMessage::Data(payload))?;
                    ws_tx.send(Message::Text(text)).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Viewer of {} lagged {} payloads", id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    debug!("Viewer detached from {}", id);
    Ok(())
}
