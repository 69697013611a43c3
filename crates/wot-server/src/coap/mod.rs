//! CoAP broker.
//!
//! Serves CoAP over a single UDP socket. Each datagram is decoded with
//! `coap-lite`, routed, and answered with a piggybacked response. There is
//! no retransmission or congestion control: a lost response is the
//! client's to retry.

pub mod handlers;

use std::net::SocketAddr;

use coap_lite::{CoapRequest, CoapResponse, Packet, RequestType, ResponseType};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use wot_core::{BrokerConfig, Event, EventEmitter, EventHandler, EventName, RouteError, StartInfo};
use wot_protocol::encode_server_message;

use crate::hub::Hub;
use crate::proxy::WebSocketProxy;
use crate::router::{Dispatch, Method, Reply, Request, Routes};
use crate::transport::{
    require_runtime, spawn_event_dispatcher, Running, ShutdownCallback, ShutdownStatus,
    TransportBroker, TransportError, TransportFactory,
};
use crate::{SEND_ROUTE, STATUS_ROUTE, VIEWER_ROUTE};

pub const TRANSPORT: &str = "coap";

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 1500;

/// The CoAP route table.
pub fn routes() -> Result<Routes, RouteError> {
    Routes::new()
        .route(SEND_ROUTE, handlers::send_proxying_websocket)?
        .route(VIEWER_ROUTE, handlers::viewer)?
        .route(STATUS_ROUTE, handlers::status)
}

/// Builds [`CoapBroker`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoapTransport;

impl TransportFactory for CoapTransport {
    fn name(&self) -> &'static str {
        TRANSPORT
    }

    fn build(&self, config: &BrokerConfig) -> Result<Box<dyn TransportBroker>, TransportError> {
        Ok(Box::new(CoapBroker::new(config.clone())?))
    }

    fn routes(&self) -> Result<Routes, RouteError> {
        routes()
    }
}

/// A CoAP listener that proxies published payloads to WebSocket endpoints.
pub struct CoapBroker {
    config: BrokerConfig,
    bind_addr: SocketAddr,
    emitter: EventEmitter,
    running: Option<Running>,
}

impl CoapBroker {
    pub fn new(config: BrokerConfig) -> Result<Self, TransportError> {
        let bind_addr = config.bind_addr()?;
        Ok(Self {
            config,
            bind_addr,
            emitter: EventEmitter::new(),
            running: None,
        })
    }

    /// Bind and serve. Published payloads are also forwarded to the
    /// configured WebSocket endpoints.
    pub fn start_as_proxy(&mut self, dispatch: Dispatch, routes: Routes) -> Result<(), TransportError> {
        if self.running.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        require_runtime()?;

        let socket = std::net::UdpSocket::bind(self.bind_addr)?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;
        let local_addr = socket.local_addr()?;

        let events = spawn_event_dispatcher(self.emitter.clone());
        let hub = Hub::new(TRANSPORT, events, WebSocketProxy::new(&self.config.endpoints));
        hub.emit(Event::Start(StartInfo {
            transport: TRANSPORT.to_string(),
            local_addr,
            endpoints: self.config.endpoints.clone(),
        }));

        let (running, stop_rx) = Running::new(local_addr);
        tokio::spawn(serve(socket, dispatch, routes, hub, stop_rx));

        info!("CoAP broker listening on {}", local_addr);
        self.running = Some(running);
        Ok(())
    }
}

impl TransportBroker for CoapBroker {
    fn name(&self) -> &'static str {
        TRANSPORT
    }

    fn on(&mut self, event: EventName, handler: EventHandler) {
        self.emitter.on(event, handler);
    }

    fn start(&mut self, dispatch: Dispatch, routes: Routes) -> Result<(), TransportError> {
        self.start_as_proxy(dispatch, routes)
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

/// Receive loop. Datagrams are handled one at a time.
async fn serve(
    socket: UdpSocket,
    dispatch: Dispatch,
    routes: Routes,
    hub: Hub,
    mut stop_rx: oneshot::Receiver<ShutdownCallback>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let done = loop {
        tokio::select! {
            done = &mut stop_rx => break done.ok(),
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, peer)) => {
                    if let Err(e) = handle_datagram(&socket, &buf[..len], peer, dispatch, &routes, &hub).await {
                        warn!("Dropping CoAP datagram from {}: {}", peer, e);
                    }
                }
                Err(e) => error!("CoAP socket error: {}", e),
            }
        }
    };

    drop(socket);
    info!("CoAP broker stopped");
    if let Some(done) = done {
        done(ShutdownStatus::stopped());
    }
}

async fn handle_datagram(
    socket: &UdpSocket,
    bytes: &[u8],
    peer: SocketAddr,
    dispatch: Dispatch,
    routes: &Routes,
    hub: &Hub,
) -> Result<(), TransportError> {
    let packet = Packet::from_bytes(bytes)?;
    let request: CoapRequest<SocketAddr> = CoapRequest::from_packet(packet, peer);

    let method = match request.get_method() {
        RequestType::Get => Method::Get,
        RequestType::Post => Method::Post,
        RequestType::Put => Method::Put,
        RequestType::Delete => Method::Delete,
        _ => Method::Other,
    };
    let path = format!("/{}", request.get_path());
    debug!("CoAP {:?} {} from {}", method, path, peer);

    let reply = dispatch(
        routes,
        &Request::new(method, &path, peer).with_body(request.message.payload.clone()),
        hub,
    );

    // Acknowledgements and resets carry no request to answer
    let Some(mut response) = request.response else {
        return Ok(());
    };
    write_reply(&mut response, reply)?;

    let bytes = response.message.to_bytes()?;
    socket.send_to(&bytes, peer).await?;
    Ok(())
}

fn write_reply(response: &mut CoapResponse, reply: Reply) -> Result<(), TransportError> {
    let status = match reply {
        Reply::Changed => ResponseType::Changed,
        Reply::Content(message) => {
            response.message.payload = encode_server_message(&message)?.into_bytes();
            ResponseType::Content
        }
        Reply::NotFound => ResponseType::NotFound,
        Reply::MethodNotAllowed => ResponseType::MethodNotAllowed,
        // Streaming roles only exist on WebSocket
        Reply::Produce(_) | Reply::Observe(_) => ResponseType::BadRequest,
    };
    response.set_status(status);
    Ok(())
}
