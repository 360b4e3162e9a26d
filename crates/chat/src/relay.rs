use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use parley_protocol::{ConversationItem, MessageRecord, UserId, events};
use parley_registry::SessionRegistry;
use parley_store::MessageStore;

use crate::{SignalError, to_payload};

/// Text-message relay: persist, then deliver to whichever of the two parties
/// currently holds a live chat socket.
pub struct MessageRelay {
    store: Arc<dyn MessageStore>,
    sessions: Arc<SessionRegistry>,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn MessageStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self { store, sessions }
    }

    /// Persist a message and fan the enriched record out. Absence of a live
    /// handle for a party is not an error; a failed write aborts delivery
    /// and nothing is sent.
    pub async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
    ) -> Result<MessageRecord, SignalError> {
        let record = self.store.create_message(sender, receiver, body).await?;

        let payload = json!({
            "record": to_payload(&ConversationItem::Message(record.clone()))
        });
        let mut delivered = 0usize;
        let targets = if sender == receiver {
            vec![sender]
        } else {
            vec![sender, receiver]
        };
        for party in targets {
            if let Some(handle) = self.sessions.lookup(party).await {
                handle.send(events::MESSAGE_RECEIVED, payload.clone());
                delivered += 1;
            }
        }
        debug!(id = record.id, sender, receiver, delivered, "message relayed");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeStore, RecordingHandle};

    struct Fixture {
        relay: MessageRelay,
        store: Arc<FakeStore>,
        sessions: Arc<SessionRegistry>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(FakeStore::new());
        let sessions = Arc::new(SessionRegistry::new());
        let relay = MessageRelay::new(store.clone(), sessions.clone());
        Fixture {
            relay,
            store,
            sessions,
        }
    }

    #[tokio::test]
    async fn delivers_to_both_live_parties() {
        let f = fixture();
        let h1 = Arc::new(RecordingHandle::new("c1", 1));
        let h2 = Arc::new(RecordingHandle::new("c2", 2));
        f.sessions.attach(h1.clone()).await;
        f.sessions.attach(h2.clone()).await;

        let record = f.relay.send(1, 2, "hello").await.unwrap();
        assert_eq!(record.body, "hello");

        for h in [&h1, &h2] {
            let payloads = h.payloads(events::MESSAGE_RECEIVED);
            assert_eq!(payloads.len(), 1);
            assert_eq!(payloads[0]["record"]["kind"], "message");
            assert_eq!(payloads[0]["record"]["body"], "hello");
            assert_eq!(payloads[0]["record"]["sender"]["id"], 1);
        }
    }

    #[tokio::test]
    async fn offline_receiver_narrows_the_fanout() {
        let f = fixture();
        let h1 = Arc::new(RecordingHandle::new("c1", 1));
        f.sessions.attach(h1.clone()).await;

        f.relay.send(1, 2, "hi").await.unwrap();
        assert_eq!(h1.payloads(events::MESSAGE_RECEIVED).len(), 1);
    }

    #[tokio::test]
    async fn fully_offline_pair_still_persists() {
        let f = fixture();
        let record = f.relay.send(1, 2, "hi").await.unwrap();
        assert_eq!(record.sender.id, 1);
    }

    #[tokio::test]
    async fn self_message_is_delivered_once() {
        let f = fixture();
        let h1 = Arc::new(RecordingHandle::new("c1", 1));
        f.sessions.attach(h1.clone()).await;

        f.relay.send(1, 1, "note to self").await.unwrap();
        assert_eq!(h1.payloads(events::MESSAGE_RECEIVED).len(), 1);
    }

    #[tokio::test]
    async fn failed_write_sends_nothing() {
        let f = fixture();
        let h1 = Arc::new(RecordingHandle::new("c1", 1));
        let h2 = Arc::new(RecordingHandle::new("c2", 2));
        f.sessions.attach(h1.clone()).await;
        f.sessions.attach(h2.clone()).await;
        f.store.fail_writes(true);

        let err = f.relay.send(1, 2, "lost").await.unwrap_err();
        assert!(matches!(err, SignalError::Persistence(_)));
        assert!(h1.events().is_empty());
        assert!(h2.events().is_empty());
    }
}
