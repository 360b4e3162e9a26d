use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::debug;

use parley_protocol::UserId;

use crate::{ConnectionHandle, close_codes};

/// Chat-socket registry: identity → its single live connection handle.
///
/// Attaching a second handle for an identity evicts the first and closes it;
/// the write lock makes the eviction race linearizable. The last attach to
/// complete its critical section is the one left registered, and every
/// superseded handle is closed exactly once.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<UserId, Arc<dyn ConnectionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under its identity, evicting and closing any prior
    /// handle. Returns the evicted handle, if there was one.
    pub async fn attach(
        &self,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Option<Arc<dyn ConnectionHandle>> {
        let identity = handle.identity();
        let evicted = {
            let mut sessions = self.inner.write().await;
            sessions.insert(identity, handle)
        };
        if let Some(old) = &evicted {
            debug!(identity, conn_id = old.conn_id(), "evicting superseded chat socket");
            old.close(Some(close_codes::SUPERSEDED), Some("superseded"));
        }
        evicted
    }

    /// Remove the entry for `identity` if present; no-op otherwise. The
    /// handle is not closed, the caller already observed the disconnect.
    pub async fn detach(&self, identity: UserId) -> Option<Arc<dyn ConnectionHandle>> {
        self.inner.write().await.remove(&identity)
    }

    /// Remove the entry for `identity` only while it still belongs to
    /// `conn_id`. The disconnect path of a superseded socket must not evict
    /// its successor.
    pub async fn detach_conn(&self, identity: UserId, conn_id: &str) -> bool {
        let mut sessions = self.inner.write().await;
        let still_ours = sessions
            .get(&identity)
            .is_some_and(|current| current.conn_id() == conn_id);
        if still_ours {
            sessions.remove(&identity);
        }
        still_ours
    }

    /// Current handle for `identity`, if one is live.
    pub async fn lookup(&self, identity: UserId) -> Option<Arc<dyn ConnectionHandle>> {
        self.inner.read().await.get(&identity).cloned()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn identities(&self) -> Vec<UserId> {
        let mut ids: Vec<_> = self.inner.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingHandle;

    #[tokio::test]
    async fn attach_evicts_and_closes_prior_handle() {
        let registry = SessionRegistry::new();
        let h1 = Arc::new(RecordingHandle::new("c1", 7));
        let h2 = Arc::new(RecordingHandle::new("c2", 7));

        assert!(registry.attach(h1.clone()).await.is_none());
        let evicted = registry.attach(h2.clone()).await.unwrap();
        assert_eq!(evicted.conn_id(), "c1");

        assert_eq!(h1.close_count(), 1);
        assert_eq!(h2.close_count(), 0);
        assert_eq!(registry.lookup(7).await.unwrap().conn_id(), "c2");
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn detach_unknown_identity_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.detach(42).await.is_none());
        assert!(registry.lookup(42).await.is_none());
    }

    #[tokio::test]
    async fn detach_does_not_close() {
        let registry = SessionRegistry::new();
        let h = Arc::new(RecordingHandle::new("c1", 7));
        registry.attach(h.clone()).await;
        registry.detach(7).await;
        assert_eq!(h.close_count(), 0);
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_successor() {
        let registry = SessionRegistry::new();
        let h1 = Arc::new(RecordingHandle::new("c1", 7));
        let h2 = Arc::new(RecordingHandle::new("c2", 7));
        registry.attach(h1).await;
        registry.attach(h2).await;

        // the superseded socket's disconnect arrives late
        assert!(!registry.detach_conn(7, "c1").await);
        assert_eq!(registry.lookup(7).await.unwrap().conn_id(), "c2");

        assert!(registry.detach_conn(7, "c2").await);
        assert!(registry.lookup(7).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_attach_leaves_one_winner() {
        let registry = Arc::new(SessionRegistry::new());
        let h1 = Arc::new(RecordingHandle::new("c1", 7));
        let h2 = Arc::new(RecordingHandle::new("c2", 7));

        let (r1, r2) = (Arc::clone(&registry), Arc::clone(&registry));
        let (a, b) = (h1.clone(), h2.clone());
        let t1 = tokio::spawn(async move { r1.attach(a).await });
        let t2 = tokio::spawn(async move { r2.attach(b).await });
        t1.await.unwrap();
        t2.await.unwrap();

        let winner = registry.lookup(7).await.unwrap();
        let closes = h1.close_count() + h2.close_count();
        assert_eq!(closes, 1, "exactly one handle must be evicted");
        let loser = if winner.conn_id() == "c1" { &h2 } else { &h1 };
        assert_eq!(loser.close_count(), 1);
    }

    #[tokio::test]
    async fn identities_are_sorted() {
        let registry = SessionRegistry::new();
        registry.attach(Arc::new(RecordingHandle::new("b", 9))).await;
        registry.attach(Arc::new(RecordingHandle::new("a", 3))).await;
        assert_eq!(registry.identities().await, vec![3, 9]);
    }
}
