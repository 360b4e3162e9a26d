use std::{collections::HashMap, sync::Arc};

use serde_json::{Value, json};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use parley_protocol::{
    CallAnswer, CallId, CallRecord, CallSignal, CallSignalKind, CallStatus, ConversationItem,
    UserId, events,
};
use parley_registry::{ConnectionHandle, SessionRegistry};
use parley_store::CallStore;

use crate::{SignalError, to_payload};

// ── Per-call serialization ───────────────────────────────────────────────────

/// One async mutex per live call id. The guard-and-reread discipline alone
/// cannot decide a true simultaneous double-accept; holding the call's lock
/// across read-guard-persist makes exactly one transition win.
#[derive(Default)]
struct CallLocks {
    inner: Mutex<HashMap<CallId, Arc<Mutex<()>>>>,
}

impl CallLocks {
    async fn acquire(&self, call_id: CallId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            Arc::clone(locks.entry(call_id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the entry once a call reached a terminal status. Stragglers that
    /// already cloned the lock still serialize among themselves and then fail
    /// their status guard.
    async fn discard(&self, call_id: CallId) {
        self.inner.lock().await.remove(&call_id);
    }
}

// ── Call engine ──────────────────────────────────────────────────────────────

/// The call-negotiation state machine.
///
/// `pending → {accepted, refused}`, `accepted → closed`; `refused` and
/// `closed` accept nothing further except the idempotent `close`. Every
/// mutating operation re-reads the authoritative record inside its per-call
/// critical section, persists the transition, and only then fans out: a
/// transition that did not commit is never announced.
pub struct CallEngine {
    store: Arc<dyn CallStore>,
    sessions: Arc<SessionRegistry>,
    locks: CallLocks,
}

impl CallEngine {
    pub fn new(store: Arc<dyn CallStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            sessions,
            locks: CallLocks::default(),
        }
    }

    /// Create a fresh `pending` call, unconditionally; a retry while an
    /// earlier call between the pair is still open creates a second record.
    /// The created record fans out as a conversation item to both live
    /// parties; the ring itself goes to the receiver (`request`) and the
    /// sender (`request.data`), or collapses to a sender-only error signal
    /// when the receiver has no live chat socket.
    pub async fn request(
        &self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<CallRecord, SignalError> {
        let record = self.store.create_call(sender, receiver).await?;
        debug!(call = record.id, sender, receiver, "call requested");

        let sender_handle = self.sessions.lookup(sender).await;
        let receiver_handle = if receiver == sender {
            sender_handle.clone()
        } else {
            self.sessions.lookup(receiver).await
        };

        let conversation = json!({
            "record": to_payload(&ConversationItem::Call(record.clone()))
        });
        fan(
            [&sender_handle, &receiver_handle],
            events::MESSAGE_RECEIVED,
            &conversation,
        );

        if let Some(rh) = &receiver_handle {
            rh.send(
                events::CALL_RECEIVE,
                to_payload(&CallSignal::new(CallSignalKind::Request, record.clone())),
            );
            if sender != receiver
                && let Some(sh) = &sender_handle
            {
                sh.send(
                    events::CALL_RECEIVE,
                    to_payload(&CallSignal::new(CallSignalKind::RequestData, record.clone())),
                );
            }
        } else if let Some(sh) = &sender_handle {
            sh.send(
                events::CALL_ANSWER_RECEIVE,
                to_payload(&CallAnswer::error(Some(record.clone()))),
            );
        }

        Ok(record)
    }

    /// Accept a pending call. Only the receiver may accept, only while the
    /// call is `pending`, and only with a media connection id in hand.
    pub async fn accept(
        &self,
        acceptor: UserId,
        call_id: CallId,
        media_connection_id: &str,
    ) -> Result<CallRecord, SignalError> {
        let media = media_connection_id.trim();
        if media.is_empty() {
            return Err(SignalError::Rejected("missing media connection id"));
        }

        let _guard = self.locks.acquire(call_id).await;
        let call = self
            .store
            .find_call(call_id)
            .await?
            .ok_or(SignalError::Rejected("unknown call"))?;
        if call.receiver.id != acceptor {
            return Err(SignalError::Rejected("only the call receiver can accept"));
        }
        if call.status != CallStatus::Pending {
            return Err(SignalError::Rejected("call is no longer pending"));
        }

        let updated = self
            .store
            .update_call_status(call_id, CallStatus::Accepted, Some("Call accept"))
            .await?;
        debug!(call = call_id, acceptor, "call accepted");

        let payload = to_payload(&CallAnswer::accept(updated.clone(), media));
        self.fan_to_participants(&updated, events::CALL_ANSWER_RECEIVE, &payload)
            .await;
        Ok(updated)
    }

    /// Refuse a pending call. Either participant may refuse.
    pub async fn refuse(
        &self,
        requester: UserId,
        call_id: CallId,
    ) -> Result<CallRecord, SignalError> {
        let updated = {
            let _guard = self.locks.acquire(call_id).await;
            let call = self
                .store
                .find_call(call_id)
                .await?
                .ok_or(SignalError::Rejected("unknown call"))?;
            if !call.involves(requester) {
                return Err(SignalError::Rejected("not a call participant"));
            }
            if call.status != CallStatus::Pending {
                return Err(SignalError::Rejected("call is no longer pending"));
            }

            self.store
                .update_call_status(call_id, CallStatus::Refused, Some("Call refuse"))
                .await?
        };
        self.locks.discard(call_id).await;
        debug!(call = call_id, requester, "call refused");

        let payload = to_payload(&CallAnswer::refuse(updated.clone()));
        self.fan_to_participants(&updated, events::CALL_ANSWER_RECEIVE, &payload)
            .await;
        Ok(updated)
    }

    /// Close a call from any existing status, idempotently: closing an
    /// already-closed call succeeds again. Only participants may close.
    pub async fn close(
        &self,
        requester: UserId,
        call_id: CallId,
    ) -> Result<CallRecord, SignalError> {
        let updated = {
            let _guard = self.locks.acquire(call_id).await;
            let call = self
                .store
                .find_call(call_id)
                .await?
                .ok_or(SignalError::Rejected("unknown call"))?;
            if !call.involves(requester) {
                return Err(SignalError::Rejected("not a call participant"));
            }

            self.store
                .update_call_status(call_id, CallStatus::Closed, Some("Call close"))
                .await?
        };
        self.locks.discard(call_id).await;
        debug!(call = call_id, requester, "call closed");

        let payload = to_payload(&CallSignal::new(CallSignalKind::RequestClose, updated.clone()));
        self.fan_to_participants(&updated, events::CALL_RECEIVE, &payload)
            .await;
        Ok(updated)
    }

    /// Deliver a committed transition to both participants' live handles.
    async fn fan_to_participants(&self, record: &CallRecord, event: &str, payload: &Value) {
        let sender = self.sessions.lookup(record.sender.id).await;
        let receiver = if record.receiver.id == record.sender.id {
            None
        } else {
            self.sessions.lookup(record.receiver.id).await
        };
        fan([&sender, &receiver], event, payload);
    }
}

/// Send `payload` to each live handle, at most once per connection.
fn fan(targets: [&Option<Arc<dyn ConnectionHandle>>; 2], event: &str, payload: &Value) {
    let mut sent_to: Option<String> = None;
    for handle in targets.into_iter().flatten() {
        if sent_to.as_deref() == Some(handle.conn_id()) {
            continue;
        }
        handle.send(event, payload.clone());
        sent_to = Some(handle.conn_id().to_string());
    }
}
