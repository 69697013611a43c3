//! Integration tests for the WoT broker.
//!
//! These tests start real brokers on ephemeral ports and talk to them with
//! WebSocket and CoAP clients to verify end-to-end behavior.

use std::net::SocketAddr;
use std::time::Duration;

use coap_lite::{CoapRequest, MessageClass, Packet, RequestType, ResponseType};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use wot_core::{DataPayload, EnvSnapshot, Options, StartInfo, Thing};
use wot_protocol::{decode_server_message, ServerMessage};
use wot_server::{
    CoapTransport, Framework, Server, ShutdownStatus, TransportFactory, WebSocketTransport,
};

const WAIT: Duration = Duration::from_secs(2);

/// Environment that binds an ephemeral loopback port.
fn test_env() -> EnvSnapshot {
    EnvSnapshot::from_pairs([("PORT", "0"), ("HOST", "127.0.0.1")])
}

struct Harness {
    framework: Framework,
    addr: SocketAddr,
    data_rx: mpsc::UnboundedReceiver<DataPayload>,
    things_rx: mpsc::UnboundedReceiver<Thing>,
    start_rx: mpsc::UnboundedReceiver<StartInfo>,
}

/// Start a framework for `transport` with channel-backed callbacks.
fn start_framework(transport: impl TransportFactory + 'static) -> Harness {
    start_framework_with(transport, test_env())
}

/// Like [`start_framework`], proxying to `upstream`.
fn start_proxying_framework(
    transport: impl TransportFactory + 'static,
    upstream: SocketAddr,
) -> Harness {
    let upstream = format!("ws://{}", upstream);
    start_framework_with(
        transport,
        EnvSnapshot::from_pairs([
            ("PORT", "0"),
            ("HOST", "127.0.0.1"),
            ("ENDPOINT", upstream.as_str()),
        ]),
    )
}

fn start_framework_with(
    transport: impl TransportFactory + 'static,
    source: EnvSnapshot,
) -> Harness {
    let server = Server::create(transport, Options::new()).with_source(source);
    let mut framework = Framework::new(server);

    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (things_tx, things_rx) = mpsc::unbounded_channel();
    let (start_tx, start_rx) = mpsc::unbounded_channel();

    framework
        .start_with(
            Options::new()
                .on_data(move |payload| {
                    let _ = data_tx.send(payload.clone());
                })
                .on_new_thing(move |thing| {
                    let _ = things_tx.send(thing.clone());
                })
                .on_start(move |info| {
                    let _ = start_tx.send(info.clone());
                }),
        )
        .expect("Failed to start broker");

    let addr = framework
        .server()
        .local_addr()
        .expect("Broker has no local address");

    Harness {
        framework,
        addr,
        data_rx,
        things_rx,
        start_rx,
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("Timed out waiting for callback")
        .expect("Callback channel closed")
}

async fn connect(addr: SocketAddr, path: &str) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let url = format!("ws://{}{}", addr, path);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect");
    ws
}

async fn next_message(ws: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> ServerMessage {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("Timed out waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return decode_server_message(&text).expect("Failed to decode message");
        }
    }
}

/// Send a CoAP request and return the response packet.
async fn coap_request(
    addr: SocketAddr,
    method: RequestType,
    path: &str,
    payload: &[u8],
) -> Packet {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut request: CoapRequest<SocketAddr> = CoapRequest::new();
    request.set_method(method);
    request.set_path(path);
    request.message.header.message_id = 7;
    request.message.set_token(vec![0x2a]);
    request.message.payload = payload.to_vec();

    let bytes = request.message.to_bytes().unwrap();
    socket.send_to(&bytes, addr).await.unwrap();

    let mut buf = [0u8; 1500];
    let (len, _) = timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("Timed out waiting for CoAP response")
        .unwrap();
    Packet::from_bytes(&buf[..len]).unwrap()
}

#[tokio::test]
async fn test_websocket_start_event() {
    let mut harness = start_framework(WebSocketTransport);

    let info = recv(&mut harness.start_rx).await;
    assert_eq!(info.transport, "websocket");
    assert_eq!(info.local_addr, harness.addr);
    assert!(info.endpoints.is_empty());

    assert_eq!(harness.framework.stop().await, ShutdownStatus::stopped());
}

#[tokio::test]
async fn test_websocket_sender_reaches_viewer() {
    let mut harness = start_framework(WebSocketTransport);

    let mut viewer = connect(harness.addr, "/object/lamp-1/viewer").await;
    // Let the broker subscribe the viewer before anything is published
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut sender = connect(harness.addr, "/object/lamp-1/send").await;
    let thing = recv(&mut harness.things_rx).await;
    assert_eq!(thing.id, "lamp-1");
    assert_eq!(thing.transport, "websocket");

    sender
        .send(Message::Text(r#"{"on":true}"#.to_string()))
        .await
        .unwrap();

    let payload = recv(&mut harness.data_rx).await;
    assert_eq!(payload.thing_id, "lamp-1");
    assert_eq!(payload.data, serde_json::json!({"on": true}));

    match next_message(&mut viewer).await {
        ServerMessage::Data(payload) => {
            assert_eq!(payload.thing_id, "lamp-1");
            assert_eq!(payload.data["on"], true);
        }
        other => panic!("Expected data, got {other:?}"),
    }

    let ids: Vec<String> = harness.framework.things().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["lamp-1"]);

    assert_eq!(harness.framework.stop().await, ShutdownStatus::stopped());
    assert!(!harness.framework.server().is_running());
}

#[tokio::test]
async fn test_websocket_status() {
    let mut harness = start_framework(WebSocketTransport);

    let mut ws = connect(harness.addr, "/object/cam-3/status").await;
    match next_message(&mut ws).await {
        ServerMessage::Status(status) => {
            assert_eq!(status.id, "cam-3");
            assert!(!status.registered);
            assert_eq!(status.message_count, 0);
        }
        other => panic!("Expected status, got {other:?}"),
    }

    harness.framework.stop().await;
}

#[tokio::test]
async fn test_websocket_unknown_path_is_closed() {
    let mut harness = start_framework(WebSocketTransport);

    let mut ws = connect(harness.addr, "/things/cam-3").await;
    let msg = timeout(WAIT, ws.next()).await.expect("Timed out");
    assert!(matches!(msg, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    assert!(harness.things_rx.try_recv().is_err());

    harness.framework.stop().await;
}

#[tokio::test]
async fn test_websocket_double_start_rejected() {
    let mut harness = start_framework(WebSocketTransport);

    let err = harness.framework.start().unwrap_err();
    assert!(matches!(err, wot_server::ServerError::AlreadyRunning));
    assert_eq!(harness.framework.server().local_addr(), Some(harness.addr));

    assert_eq!(harness.framework.stop().await, ShutdownStatus::stopped());
    assert_eq!(harness.framework.stop().await, ShutdownStatus::not_running());
}

#[tokio::test]
async fn test_coap_send_viewer_and_status() {
    let mut harness = start_framework(CoapTransport);

    let info = recv(&mut harness.start_rx).await;
    assert_eq!(info.transport, "coap");

    let response = coap_request(
        harness.addr,
        RequestType::Post,
        "object/node-1/send",
        br#"{"temperature":21.5}"#,
    )
    .await;
    assert_eq!(response.header.code, MessageClass::Response(ResponseType::Changed));
    assert_eq!(response.get_token(), &[0x2a]);

    let thing = recv(&mut harness.things_rx).await;
    assert_eq!(thing.id, "node-1");
    assert_eq!(thing.transport, "coap");

    let payload = recv(&mut harness.data_rx).await;
    assert_eq!(payload.data["temperature"], 21.5);

    let response = coap_request(harness.addr, RequestType::Get, "object/node-1/viewer", b"").await;
    assert_eq!(response.header.code, MessageClass::Response(ResponseType::Content));
    let text = String::from_utf8(response.payload).unwrap();
    match decode_server_message(&text).unwrap() {
        ServerMessage::Data(latest) => assert_eq!(latest, payload),
        other => panic!("Expected data, got {other:?}"),
    }

    let response = coap_request(harness.addr, RequestType::Get, "object/node-1/status", b"").await;
    assert_eq!(response.header.code, MessageClass::Response(ResponseType::Content));
    let text = String::from_utf8(response.payload).unwrap();
    match decode_server_message(&text).unwrap() {
        ServerMessage::Status(status) => {
            assert!(status.registered);
            assert_eq!(status.message_count, 1);
        }
        other => panic!("Expected status, got {other:?}"),
    }

    assert_eq!(harness.framework.things().len(), 1);
    assert_eq!(harness.framework.stop().await, ShutdownStatus::stopped());
}

#[tokio::test]
async fn test_coap_rejects_bad_requests() {
    let mut harness = start_framework(CoapTransport);

    let response = coap_request(harness.addr, RequestType::Post, "object/bad id/send", b"1").await;
    assert_eq!(response.header.code, MessageClass::Response(ResponseType::NotFound));

    let response = coap_request(harness.addr, RequestType::Get, "object/node-2/send", b"").await;
    assert_eq!(
        response.header.code,
        MessageClass::Response(ResponseType::MethodNotAllowed)
    );

    let response = coap_request(harness.addr, RequestType::Get, "object/node-2/viewer", b"").await;
    assert_eq!(response.header.code, MessageClass::Response(ResponseType::NotFound));

    assert!(harness.things_rx.try_recv().is_err());
    harness.framework.stop().await;
}

#[tokio::test]
async fn test_restart_after_shutdown() {
    let mut harness = start_framework(CoapTransport);
    assert_eq!(harness.framework.stop().await, ShutdownStatus::stopped());

    harness.framework.start().expect("Failed to restart");
    assert!(harness.framework.server().is_running());
    assert_eq!(harness.framework.stop().await, ShutdownStatus::stopped());
}

#[tokio::test]
async fn test_coap_proxies_to_websocket_endpoint() {
    let mut upstream = start_framework(WebSocketTransport);
    let mut harness = start_proxying_framework(CoapTransport, upstream.addr);

    let info = recv(&mut harness.start_rx).await;
    assert_eq!(info.endpoints, vec![format!("ws://{}", upstream.addr)]);

    for body in [br#"{"v":1}"#, br#"{"v":2}"#] {
        let response =
            coap_request(harness.addr, RequestType::Post, "object/node-1/send", body).await;
        assert_eq!(response.header.code, MessageClass::Response(ResponseType::Changed));
    }

    let thing = recv(&mut upstream.things_rx).await;
    assert_eq!(thing.id, "node-1");
    assert_eq!(thing.transport, "websocket");

    let first = recv(&mut upstream.data_rx).await;
    let second = recv(&mut upstream.data_rx).await;
    assert_eq!(first.thing_id, "node-1");
    assert_eq!(first.data, serde_json::json!({"v": 1}));
    assert_eq!(second.data, serde_json::json!({"v": 2}));

    harness.framework.stop().await;
    upstream.framework.stop().await;
}

#[tokio::test]
async fn test_websocket_does_not_proxy() {
    let mut upstream = start_framework(WebSocketTransport);
    let mut harness = start_proxying_framework(WebSocketTransport, upstream.addr);

    let mut sender = connect(harness.addr, "/object/lamp-9/send").await;
    sender
        .send(Message::Text(r#"{"on":false}"#.to_string()))
        .await
        .unwrap();

    let payload = recv(&mut harness.data_rx).await;
    assert_eq!(payload.thing_id, "lamp-9");

    let forwarded = timeout(Duration::from_millis(300), upstream.things_rx.recv()).await;
    assert!(forwarded.is_err(), "payload was forwarded upstream");
    assert!(upstream.framework.things().is_empty());

    harness.framework.stop().await;
    upstream.framework.stop().await;
}
