//! WebSocket request handlers.
//!
//! A WebSocket request is the upgrade of one connection; the handler picks
//! the role the connection plays for the rest of its life.

use wot_protocol::ServerMessage;

use crate::hub::Hub;
use crate::router::{Reply, Request};

/// `/object/<id>/send`: the connection belongs to the thing. Connecting
/// counts as first contact.
pub fn send(id: &str, request: &Request, hub: &Hub) -> Reply {
    hub.touch(id, request.peer);
    Reply::Produce(id.to_string())
}

/// `/object/<id>/viewer`: stream the thing's payloads to the connection.
pub fn viewer(id: &str, _request: &Request, _hub: &Hub) -> Reply {
    Reply::Observe(id.to_string())
}

/// `/object/<id>/status`: one status message, then close.
pub fn status(id: &str, _request: &Request, hub: &Hub) -> Reply {
    Reply::Content(ServerMessage::Status(hub.status(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Method;
    use tokio::sync::mpsc;
    use wot_core::Event;

    #[test]
    fn test_send_registers_on_connect() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let hub = Hub::new("websocket", events_tx, None);
        let request = Request::new(Method::Connect, "/object/cam-2/send", "127.0.0.1:9000".parse().unwrap());

        assert_eq!(send("cam-2", &request, &hub), Reply::Produce("cam-2".to_string()));
        match events_rx.try_recv().unwrap() {
            Event::NewThing(thing) => assert_eq!(thing.id, "cam-2"),
            other => panic!("Expected NewThing, got {other:?}"),
        }

        match status("cam-2", &request, &hub) {
            Reply::Content(ServerMessage::Status(status)) => {
                assert!(status.registered);
                assert_eq!(status.message_count, 0);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }
}
