//! The core engines between inbound client events and the live-connection
//! registries: text-message relay and the call-negotiation state machine.
//!
//! Both engines follow the same discipline: persist first, fan out only what
//! committed. Guard failures are values, not panics; the dispatcher turns a
//! [`SignalError::Rejected`] into a single error notification for the acting
//! identity, and the connection stays live.

mod calls;
mod relay;

pub use calls::CallEngine;
pub use relay::MessageRelay;

use parley_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Business-rule rejection: wrong actor, wrong state, missing field,
    /// unknown call. Always recoverable; no state was changed.
    #[error("rejected: {0}")]
    Rejected(&'static str),
    /// Backend failure. The operation is aborted and nothing was fanned out.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl SignalError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, SignalError::Rejected(_))
    }
}

/// Serialize an outbound payload. The signal types serialize infallibly;
/// a `Null` payload would only ever surface from a programming error.
pub(crate) fn to_payload<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}
