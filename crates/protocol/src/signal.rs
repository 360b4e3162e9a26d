use serde::{Deserialize, Serialize};

use crate::records::CallRecord;

// ── call.receive ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallSignalKind {
    #[serde(rename = "request")]
    Request,
    #[serde(rename = "request.data")]
    RequestData,
    #[serde(rename = "request.close")]
    RequestClose,
    #[serde(rename = "request.error")]
    RequestError,
}

/// Payload of the `call.receive` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSignal {
    #[serde(rename = "type")]
    pub kind: CallSignalKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<CallRecord>,
}

impl CallSignal {
    pub fn new(kind: CallSignalKind, record: CallRecord) -> Self {
        Self {
            kind,
            record: Some(record),
        }
    }

    pub fn error() -> Self {
        Self {
            kind: CallSignalKind::RequestError,
            record: None,
        }
    }
}

// ── call.answer.receive ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallAnswerKind {
    #[serde(rename = "request.accept")]
    RequestAccept,
    #[serde(rename = "request.refuse")]
    RequestRefuse,
    #[serde(rename = "request.error")]
    RequestError,
}

/// Payload of the `call.answer.receive` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAnswer {
    #[serde(rename = "type")]
    pub kind: CallAnswerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<CallRecord>,
    #[serde(
        rename = "mediaConnectionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub media_connection_id: Option<String>,
}

impl CallAnswer {
    pub fn accept(record: CallRecord, media_connection_id: impl Into<String>) -> Self {
        Self {
            kind: CallAnswerKind::RequestAccept,
            record: Some(record),
            media_connection_id: Some(media_connection_id.into()),
        }
    }

    pub fn refuse(record: CallRecord) -> Self {
        Self {
            kind: CallAnswerKind::RequestRefuse,
            record: Some(record),
            media_connection_id: None,
        }
    }

    pub fn error(record: Option<CallRecord>) -> Self {
        Self {
            kind: CallAnswerKind::RequestError,
            record,
            media_connection_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CallStatus, UserSummary};

    fn record() -> CallRecord {
        let user = |id| UserSummary {
            id,
            username: format!("u{id}"),
            name: format!("User {id}"),
            avatar: None,
        };
        CallRecord {
            id: 9,
            sender: user(10),
            receiver: user(20),
            status: CallStatus::Pending,
            payload: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn signal_kind_wire_tags() {
        let v = serde_json::to_value(CallSignal::new(CallSignalKind::RequestData, record()))
            .unwrap();
        assert_eq!(v["type"], "request.data");
        assert_eq!(v["record"]["id"], 9);
    }

    #[test]
    fn error_signal_omits_record() {
        let v = serde_json::to_value(CallSignal::error()).unwrap();
        assert_eq!(v["type"], "request.error");
        assert!(v.get("record").is_none());
    }

    #[test]
    fn accept_answer_carries_media_connection_id() {
        let v = serde_json::to_value(CallAnswer::accept(record(), "peerXYZ")).unwrap();
        assert_eq!(v["type"], "request.accept");
        assert_eq!(v["mediaConnectionId"], "peerXYZ");
    }

    #[test]
    fn refuse_answer_has_no_media_connection_id() {
        let v = serde_json::to_value(CallAnswer::refuse(record())).unwrap();
        assert_eq!(v["type"], "request.refuse");
        assert!(v.get("mediaConnectionId").is_none());
    }
}
