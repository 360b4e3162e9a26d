use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_protocol::{ConnectPayload, EventFrame, UserId, UserSummary, events};
use parley_registry::{ConnectionHandle, close_codes};

use crate::{
    events::{EventContext, EventRegistry},
    state::GatewayState,
};

// ── Outbound channel ─────────────────────────────────────────────────────────

/// What a connection's writer task can be asked to do. `Close` drains the
/// channel: the writer sends the close frame and stops.
pub(crate) enum OutMsg {
    Frame(String),
    Close(Option<u16>, Option<String>),
}

/// Forward queued frames to the socket until the channel or the socket dies.
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<OutMsg>,
) {
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                OutMsg::Frame(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                OutMsg::Close(code, reason) => {
                    let frame = code.map(|code| CloseFrame {
                        code,
                        reason: reason.unwrap_or_default().into(),
                    });
                    let _ = sink.send(Message::Close(frame)).await;
                    break;
                }
            }
        }
    });
}

// ── Chat-socket handle ───────────────────────────────────────────────────────

/// The chat-socket implementation of [`ConnectionHandle`]: an id, an owner
/// and a sender into the connection's writer task. Both capabilities are
/// enqueue-only, so registries can invoke them inside a critical section.
pub struct WsHandle {
    conn_id: String,
    identity: UserId,
    sender: mpsc::UnboundedSender<OutMsg>,
}

impl WsHandle {
    pub(crate) fn new(conn_id: String, identity: UserId, sender: mpsc::UnboundedSender<OutMsg>) -> Self {
        Self {
            conn_id,
            identity,
            sender,
        }
    }
}

impl ConnectionHandle for WsHandle {
    fn conn_id(&self) -> &str {
        &self.conn_id
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

// ── Connection lifecycle ─────────────────────────────────────────────────────

/// Drive one chat socket: authenticate the first frame, attach to the
/// session registry, dispatch events until the socket closes, then detach,
/// but only while the registry entry is still ours (a reconnect may have
/// superseded it).
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    events_reg: Arc<EventRegistry>,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    spawn_writer(ws_tx, rx);

    let Some(user) = authenticate(&mut ws_rx, &tx, &state).await else {
        return;
    };

    let conn_id = Uuid::new_v4().to_string();
    let handle: Arc<dyn ConnectionHandle> =
        Arc::new(WsHandle::new(conn_id.clone(), user.id, tx));
    state.sessions.attach(Arc::clone(&handle)).await;
    handle.send(events::CONNECT_OK, json!({ "user": &user }));
    info!(identity = user.id, username = %user.username, conn_id = %conn_id, "chat socket connected");

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                debug!(identity = user.id, error = %err, "chat socket read error");
                break;
            }
        };
        match msg {
            Message::Text(text) => match EventFrame::parse(text.as_str()) {
                // a second connect on a live socket is a no-op
                Ok(frame) if frame.event == events::CONNECT => {}
                Ok(frame) => {
                    let ctx = EventContext {
                        event: frame.event,
                        data: frame.data,
                        handle: Arc::clone(&handle),
                        state: Arc::clone(&state),
                    };
                    events_reg.dispatch(ctx).await;
                }
                Err(err) => {
                    warn!(identity = user.id, error = %err, "dropping malformed frame");
                    handle.send(events::ERROR, json!({ "message": "malformed frame" }));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    let detached = state.sessions.detach_conn(user.id, &conn_id).await;
    info!(identity = user.id, conn_id = %conn_id, detached, "chat socket disconnected");
}

/// The first frame must be `connect {token}`; anything else closes the
/// socket before it ever reaches a registry.
async fn authenticate(
    ws_rx: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<OutMsg>,
    state: &Arc<GatewayState>,
) -> Option<UserSummary> {
    let reject = |message: &str| {
        let _ = tx.send(OutMsg::Frame(
            EventFrame::new(events::ERROR, json!({ "message": message })).to_wire(),
        ));
        let _ = tx.send(OutMsg::Close(
            Some(close_codes::AUTH_FAILED),
            Some("unauthenticated".into()),
        ));
    };

    loop {
        let msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            _ => return None,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            // tolerate protocol frames before the handshake
            _ => continue,
        };

        let frame = match EventFrame::parse(text.as_str()) {
            Ok(frame) => frame,
            Err(_) => {
                reject("expected a connect frame");
                return None;
            }
        };
        if frame.event != events::CONNECT {
            reject("expected a connect frame");
            return None;
        }
        let Ok(ConnectPayload { token }) = serde_json::from_value(frame.data) else {
            reject("connect frame is missing a token");
            return None;
        };
        match state.auth.identify(&token).await {
            Ok(user) => return Some(user),
            Err(err) => {
                debug!(error = %err, "chat socket authentication failed");
                reject("authentication failed");
                return None;
            }
        }
    }
}
