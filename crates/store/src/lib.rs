//! Persistence collaborator: users, messages and call records.
//!
//! The domain crates consume the `*Store` traits; [`SqliteStore`] is the
//! SQLite implementation behind all of them. Every record comes back enriched
//! with participant summaries so fan-out never needs a second round trip.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;

use parley_protocol::{
    CallId, CallRecord, CallStatus, ConversationItem, MessageRecord, UserId, UserSummary,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database failure: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("call {0} not found")]
    CallNotFound(CallId),
    #[error("username already taken")]
    UsernameTaken,
    #[error("stored call has unknown status {0:?}")]
    InvalidStatus(String),
}

/// A user row with the credential hash, for the auth collaborator only.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: UserSummary,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user. Fails with [`StoreError::UsernameTaken`] on a duplicate
    /// username.
    async fn create_user(
        &self,
        username: &str,
        name: &str,
        avatar: Option<&str>,
        password_hash: &str,
    ) -> Result<UserSummary, StoreError>;

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<UserSummary>, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return it enriched with both participants.
    async fn create_message(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
    ) -> Result<MessageRecord, StoreError>;
}

#[async_trait]
pub trait CallStore: Send + Sync {
    /// Create a call in `pending` status and return it enriched.
    async fn create_call(
        &self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<CallRecord, StoreError>;

    /// Persist a status transition and return the updated enriched record.
    async fn update_call_status(
        &self,
        call_id: CallId,
        status: CallStatus,
        payload: Option<&str>,
    ) -> Result<CallRecord, StoreError>;

    /// Authoritative read of a call record.
    async fn find_call(&self, call_id: CallId) -> Result<Option<CallRecord>, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The ordered thread of messages and calls between two identities.
    async fn list_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<ConversationItem>, StoreError>;
}
