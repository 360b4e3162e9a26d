//! Gateway: HTTP + WebSocket server, event dispatch, connection lifecycle.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Open the store, build the auth service and the engines
//! 3. Start the HTTP server (health, auth, conversation history)
//! 4. Attach the `/ws` chat-socket and `/peer` media-socket upgrade handlers
//!
//! Domain logic (message relay, call state machine) lives in `parley-chat`
//! and is invoked through event handlers registered in `events.rs`; the
//! gateway itself holds no state beyond [`state::GatewayState`].

pub mod events;
pub mod peer;
pub mod server;
pub mod state;
pub mod ws;

pub use server::{build_gateway_app, start_gateway};
