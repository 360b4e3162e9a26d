use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

use parley_protocol::{EventFrame, UserId, UserSummary, events};
use parley_registry::ConnectionHandle;

use crate::{
    state::GatewayState,
    ws::{OutMsg, spawn_writer},
};

/// The media-socket implementation of [`ConnectionHandle`]. Its connection
/// id is the client-chosen peer connection id.
pub struct PeerHandle {
    peer_conn_id: String,
    identity: UserId,
    sender: mpsc::UnboundedSender<OutMsg>,
}

impl ConnectionHandle for PeerHandle {
    fn conn_id(&self) -> &str {
        &self.peer_conn_id
    }

    fn identity(&self) -> UserId {
        self.identity
    }

    fn send(&self, event: &str, payload: Value) -> bool {
        self.sender
            .send(OutMsg::Frame(EventFrame::new(event, payload).to_wire()))
            .is_ok()
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) {
        let _ = self
            .sender
            .send(OutMsg::Close(code, reason.map(str::to_string)));
    }
}

/// Drive one media socket. The socket exists to track liveness of the peer
/// connection id: register on open, deregister on close. Media itself never
/// crosses this server.
pub async fn handle_peer(
    socket: WebSocket,
    state: Arc<GatewayState>,
    user: UserSummary,
    peer_conn_id: String,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    spawn_writer(ws_tx, rx);

    let handle: Arc<dyn ConnectionHandle> = Arc::new(PeerHandle {
        peer_conn_id: peer_conn_id.clone(),
        identity: user.id,
        sender: tx,
    });
    state.peers.attach(&peer_conn_id, user.id, handle.clone()).await;
    handle.send(events::PEER_OPEN, json!({ "id": &peer_conn_id }));
    info!(identity = user.id, peer_conn_id = %peer_conn_id, "peer connected");

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            // inbound frames carry nothing the registry cares about
            Ok(_) => {}
        }
    }

    // Safe against a racing re-register: eviction already removed this id's
    // reverse row, making this a no-op for the successor.
    state.peers.detach_conn(&peer_conn_id).await;
    info!(identity = user.id, peer_conn_id = %peer_conn_id, "peer disconnected");
}
