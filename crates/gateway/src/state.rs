use std::sync::Arc;

use parley_auth::AuthService;
use parley_chat::{CallEngine, MessageRelay};
use parley_registry::{PeerRegistry, SessionRegistry};
use parley_store::{CallStore, MessageStore, SqliteStore};

/// Shared gateway runtime state, wrapped in `Arc` for use across async tasks.
///
/// The registries are owned here and injected into the engines; nothing else
/// in the process touches their maps directly.
pub struct GatewayState {
    pub sessions: Arc<SessionRegistry>,
    pub peers: Arc<PeerRegistry>,
    pub relay: MessageRelay,
    pub calls: CallEngine,
    pub store: Arc<SqliteStore>,
    pub auth: Arc<AuthService>,
    pub version: String,
}

impl GatewayState {
    pub fn new(store: Arc<SqliteStore>, auth: Arc<AuthService>) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new());
        let peers = Arc::new(PeerRegistry::new());
        let relay = MessageRelay::new(
            Arc::clone(&store) as Arc<dyn MessageStore>,
            Arc::clone(&sessions),
        );
        let calls = CallEngine::new(
            Arc::clone(&store) as Arc<dyn CallStore>,
            Arc::clone(&sessions),
        );

        Arc::new(Self {
            sessions,
            peers,
            relay,
            calls,
            store,
            auth,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
