use serde::{Deserialize, Serialize};

use crate::{CallId, UserId};

// ── Call status ──────────────────────────────────────────────────────────────

/// Lifecycle of a negotiated call.
///
/// `Pending → {Accepted, Refused}`, `Accepted → Closed`. `Refused` and
/// `Closed` accept no further transitions; rows are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Accepted,
    Refused,
    Closed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Accepted => "accepted",
            CallStatus::Refused => "refused",
            CallStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallStatus::Pending),
            "accepted" => Some(CallStatus::Accepted),
            "refused" => Some(CallStatus::Refused),
            "closed" => Some(CallStatus::Closed),
            _ => None,
        }
    }
}

// ── Enriched records ─────────────────────────────────────────────────────────

/// Participant summary joined into every record the store hands back, so
/// fan-out never needs a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// A delivered text message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: i64,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    pub body: String,
    pub created_at: i64,
}

/// A call record with its current lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: CallId,
    pub sender: UserSummary,
    pub receiver: UserSummary,
    pub status: CallStatus,
    pub payload: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CallRecord {
    /// Whether `user` is one of the two call participants.
    pub fn involves(&self, user: UserId) -> bool {
        self.sender.id == user || self.receiver.id == user
    }
}

/// One item of a conversation thread, ordered by creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ConversationItem {
    Message(MessageRecord),
    Call(CallRecord),
}

impl ConversationItem {
    pub fn created_at(&self) -> i64 {
        match self {
            ConversationItem::Message(m) => m.created_at,
            ConversationItem::Call(c) => c.created_at,
        }
    }
}
