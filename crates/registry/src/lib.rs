//! Live-connection registries: one for chat sockets, one for media-transport
//! peer ids.
//!
//! These two maps are the only mutable shared state in the core. They are
//! mutated exclusively through their own operations, each of which is a single
//! write critical section: callers never see a partial write, and a
//! read-then-write race cannot lose an eviction. Handle `send`/`close` are
//! synchronous enqueues, so no lock is ever held across a suspension point.

mod peers;
mod sessions;

pub use peers::PeerRegistry;
pub use sessions::SessionRegistry;

use serde_json::Value;

use parley_protocol::UserId;

/// WebSocket close codes in the application policy range.
pub mod close_codes {
    /// A newer connection for the same identity replaced this one.
    pub const SUPERSEDED: u16 = 4000;
    /// The connection never authenticated.
    pub const AUTH_FAILED: u16 = 4001;
}

/// Capability surface of one live transport endpoint.
///
/// Concrete transport adapters (the gateway's WebSocket wrapper, test
/// doubles) implement this; registries and engines only ever see the trait.
/// Both operations are fire-and-forget: `send` reports whether the enqueue
/// succeeded, `close` is best-effort.
pub trait ConnectionHandle: Send + Sync {
    /// Transport-level connection id, unique per socket (not per user).
    fn conn_id(&self) -> &str;

    /// The identity that authenticated this connection.
    fn identity(&self) -> UserId;

    /// Enqueue a named event for delivery. No delivery acknowledgment.
    fn send(&self, event: &str, payload: Value) -> bool;

    /// Ask the transport to close the connection.
    fn close(&self, code: Option<u16>, reason: Option<&str>);
}
