//! Wire vocabulary shared by the gateway and the domain crates.
//!
//! Everything that crosses a socket lives here: the inbound event frame, the
//! event-name constants, the inbound payload DTOs and the outbound signal
//! shapes. The crate is serde-only so both the server and test clients can
//! depend on it without dragging in the runtime.

mod records;
mod signal;

pub use records::{CallRecord, CallStatus, ConversationItem, MessageRecord, UserSummary};
pub use signal::{CallAnswer, CallAnswerKind, CallSignal, CallSignalKind};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Authenticated user id, the key for all session state.
pub type UserId = i64;

/// Call record id.
pub type CallId = i64;

// ── Event names ──────────────────────────────────────────────────────────────

pub mod events {
    //! Event names on the chat socket. Inbound names are what clients emit;
    //! outbound names are what the gateway fans out.

    // inbound
    pub const CONNECT: &str = "connect";
    pub const MESSAGE_SEND: &str = "message.send";
    pub const CALL_REQUEST_SEND: &str = "call.request.send";
    pub const CALL_REQUEST_ACCEPT: &str = "call.request.accept";
    pub const CALL_REQUEST_REFUSE: &str = "call.request.refuse";
    pub const CALL_CLOSE: &str = "call.close";

    // outbound
    pub const CONNECT_OK: &str = "connect.ok";
    pub const ERROR: &str = "error";
    pub const PEER_OPEN: &str = "peer.open";
    pub const MESSAGE_RECEIVED: &str = "message.received";
    pub const CALL_RECEIVE: &str = "call.receive";
    pub const CALL_ANSWER_RECEIVE: &str = "call.answer.receive";
}

// ── Event frame ──────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame has an empty event name")]
    EmptyEvent,
}

/// One frame on the chat socket: a named event plus a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a frame off the wire. Rejects frames without an event name.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let frame: Self = serde_json::from_str(raw)?;
        if frame.event.is_empty() {
            return Err(FrameError::EmptyEvent);
        }
        Ok(frame)
    }

    /// Serialize for the wire. Frames are built from serde types, so
    /// serialization cannot fail.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Inbound payloads ─────────────────────────────────────────────────────────

/// Payload of `connect`, the first frame on a chat socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub token: String,
}

/// Payload of `message.send` and `call.request.send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub receiver_id: UserId,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of `call.request.accept` / `call.request.refuse` / `call.close`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallActionPayload {
    pub call_id: CallId,
    /// Media connection id, required by `call.request.accept` only.
    #[serde(default)]
    pub peer_id: Option<String>,
}
