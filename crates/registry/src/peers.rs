use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::debug;

use parley_protocol::UserId;

use crate::{ConnectionHandle, close_codes};

struct PeerEntry {
    peer_conn_id: String,
    handle: Arc<dyn ConnectionHandle>,
}

#[derive(Default)]
struct PeerMaps {
    /// identity → its live media connection
    by_user: HashMap<UserId, PeerEntry>,
    /// peer connection id → owning identity (for O(1) detach on disconnect)
    by_conn: HashMap<String, UserId>,
}

/// Media-transport registry: identity ↔ peer connection id.
///
/// Both directions are stored explicitly and mutated under one lock, so a
/// detach never scans and never races a concurrent attach. Same
/// single-entry-per-identity contract as [`crate::SessionRegistry`], with
/// eviction closing the superseded peer socket.
#[derive(Default)]
pub struct PeerRegistry {
    inner: RwLock<PeerMaps>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer connection for `identity`, evicting and closing any
    /// prior one. Returns the evicted handle, if there was one.
    pub async fn attach(
        &self,
        peer_conn_id: &str,
        identity: UserId,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Option<Arc<dyn ConnectionHandle>> {
        let evicted = {
            let mut maps = self.inner.write().await;
            let prior = maps.by_user.remove(&identity);
            if let Some(old) = &prior {
                maps.by_conn.remove(&old.peer_conn_id);
            }
            maps.by_user.insert(identity, PeerEntry {
                peer_conn_id: peer_conn_id.to_string(),
                handle,
            });
            maps.by_conn.insert(peer_conn_id.to_string(), identity);
            prior
        };
        evicted.map(|old| {
            debug!(identity, peer_conn_id = %old.peer_conn_id, "evicting superseded peer connection");
            old.handle
                .close(Some(close_codes::SUPERSEDED), Some("superseded"));
            old.handle
        })
    }

    /// Remove the registration owning `peer_conn_id`, if any. Returns the
    /// identity it belonged to. Does not close the handle.
    pub async fn detach_conn(&self, peer_conn_id: &str) -> Option<UserId> {
        let mut maps = self.inner.write().await;
        let identity = maps.by_conn.remove(peer_conn_id)?;
        // Remove the forward row only while it still points at this
        // connection; a newer attach for the same identity must survive.
        if maps
            .by_user
            .get(&identity)
            .is_some_and(|e| e.peer_conn_id == peer_conn_id)
        {
            maps.by_user.remove(&identity);
        }
        Some(identity)
    }

    /// The live peer connection id for `identity`, if one is registered.
    pub async fn peer_id_of(&self, identity: UserId) -> Option<String> {
        self.inner
            .read()
            .await
            .by_user
            .get(&identity)
            .map(|e| e.peer_conn_id.clone())
    }

    /// The identity owning `peer_conn_id`, if registered.
    pub async fn identity_of(&self, peer_conn_id: &str) -> Option<UserId> {
        self.inner.read().await.by_conn.get(peer_conn_id).copied()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.by_user.len()
    }
}
