use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use parley_protocol::{
    CallId, CallRecord, CallStatus, ConversationItem, MessageRecord, UserId, UserSummary,
};

use crate::{
    CallStore, ConversationStore, MessageStore, StoreError, UserCredentials, UserStore,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL DEFAULT '',
    avatar        TEXT,
    password_hash TEXT NOT NULL,
    created_at    INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   INTEGER NOT NULL REFERENCES users(id),
    receiver_id INTEGER NOT NULL REFERENCES users(id),
    body        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS calls (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   INTEGER NOT NULL REFERENCES users(id),
    receiver_id INTEGER NOT NULL REFERENCES users(id),
    status      TEXT NOT NULL,
    payload     TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages (sender_id, receiver_id);
CREATE INDEX IF NOT EXISTS idx_calls_pair ON calls (sender_id, receiver_id);
";

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    name: String,
    avatar: Option<String>,
}

impl From<UserRow> for UserSummary {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            username: r.username,
            name: r.name,
            avatar: r.avatar,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    body: String,
    created_at: i64,
    sender_id: i64,
    sender_username: String,
    sender_name: String,
    sender_avatar: Option<String>,
    receiver_id: i64,
    receiver_username: String,
    receiver_name: String,
    receiver_avatar: Option<String>,
}

impl From<MessageRow> for MessageRecord {
    fn from(r: MessageRow) -> Self {
        Self {
            id: r.id,
            sender: UserSummary {
                id: r.sender_id,
                username: r.sender_username,
                name: r.sender_name,
                avatar: r.sender_avatar,
            },
            receiver: UserSummary {
                id: r.receiver_id,
                username: r.receiver_username,
                name: r.receiver_name,
                avatar: r.receiver_avatar,
            },
            body: r.body,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CallRow {
    id: i64,
    status: String,
    payload: Option<String>,
    created_at: i64,
    updated_at: i64,
    sender_id: i64,
    sender_username: String,
    sender_name: String,
    sender_avatar: Option<String>,
    receiver_id: i64,
    receiver_username: String,
    receiver_name: String,
    receiver_avatar: Option<String>,
}

impl TryFrom<CallRow> for CallRecord {
    type Error = StoreError;

    fn try_from(r: CallRow) -> Result<Self, StoreError> {
        let status =
            CallStatus::parse(&r.status).ok_or_else(|| StoreError::InvalidStatus(r.status.clone()))?;
        Ok(Self {
            id: r.id,
            sender: UserSummary {
                id: r.sender_id,
                username: r.sender_username,
                name: r.sender_name,
                avatar: r.sender_avatar,
            },
            receiver: UserSummary {
                id: r.receiver_id,
                username: r.receiver_username,
                name: r.receiver_name,
                avatar: r.receiver_avatar,
            },
            status,
            payload: r.payload,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const MESSAGE_SELECT: &str = "
SELECT m.id, m.body, m.created_at,
       s.id AS sender_id, s.username AS sender_username,
       s.name AS sender_name, s.avatar AS sender_avatar,
       r.id AS receiver_id, r.username AS receiver_username,
       r.name AS receiver_name, r.avatar AS receiver_avatar
FROM messages m
JOIN users s ON s.id = m.sender_id
JOIN users r ON r.id = m.receiver_id
";

const CALL_SELECT: &str = "
SELECT c.id, c.status, c.payload, c.created_at, c.updated_at,
       s.id AS sender_id, s.username AS sender_username,
       s.name AS sender_name, s.avatar AS sender_avatar,
       r.id AS receiver_id, r.username AS receiver_username,
       r.name AS receiver_name, r.avatar AS receiver_avatar
FROM calls c
JOIN users s ON s.id = c.sender_id
JOIN users r ON r.id = c.receiver_id
";

// ── SqliteStore ──────────────────────────────────────────────────────────────

/// SQLite-backed store. The schema is created on connect when absent.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// In-memory database, for tests. A single pooled connection keeps the
    /// data alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        debug!("sqlite schema ready");
        Ok(Self { pool })
    }

    async fn fetch_message(&self, id: i64) -> Result<MessageRecord, StoreError> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?");
        let row: MessageRow = sqlx::query_as(&sql).bind(id).fetch_one(&self.pool).await?;
        Ok(row.into())
    }

    async fn fetch_call(&self, id: CallId) -> Result<Option<CallRecord>, StoreError> {
        let sql = format!("{CALL_SELECT} WHERE c.id = ?");
        let row: Option<CallRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CallRecord::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn create_user(
        &self,
        username: &str,
        name: &str,
        avatar: Option<&str>,
        password_hash: &str,
    ) -> Result<UserSummary, StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (username, name, avatar, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(name)
        .bind(avatar)
        .bind(password_hash)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::UsernameTaken
            } else {
                e.into()
            }
        })?;

        Ok(UserSummary {
            id: result.last_insert_rowid(),
            username: username.to_string(),
            name: name.to_string(),
            avatar: avatar.map(str::to_string),
        })
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, StoreError> {
        let row: Option<(i64, String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT id, username, name, avatar, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, username, name, avatar, password_hash)| UserCredentials {
            user: UserSummary {
                id,
                username,
                name,
                avatar,
            },
            password_hash,
        }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserSummary>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, name, avatar FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(UserSummary::from))
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(
        &self,
        sender: UserId,
        receiver: UserId,
        body: &str,
    ) -> Result<MessageRecord, StoreError> {
        let result = sqlx::query(
            "INSERT INTO messages (sender_id, receiver_id, body, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(sender)
        .bind(receiver)
        .bind(body)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        self.fetch_message(result.last_insert_rowid()).await
    }
}

#[async_trait]
impl CallStore for SqliteStore {
    async fn create_call(
        &self,
        sender: UserId,
        receiver: UserId,
    ) -> Result<CallRecord, StoreError> {
        let now = now_ms();
        let result = sqlx::query(
            "INSERT INTO calls (sender_id, receiver_id, status, payload, created_at, updated_at)
             VALUES (?, ?, ?, NULL, ?, ?)",
        )
        .bind(sender)
        .bind(receiver)
        .bind(CallStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.fetch_call(id)
            .await?
            .ok_or(StoreError::CallNotFound(id))
    }

    async fn update_call_status(
        &self,
        call_id: CallId,
        status: CallStatus,
        payload: Option<&str>,
    ) -> Result<CallRecord, StoreError> {
        let result = sqlx::query(
            "UPDATE calls SET status = ?, payload = COALESCE(?, payload), updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(payload)
        .bind(now_ms())
        .bind(call_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CallNotFound(call_id));
        }
        self.fetch_call(call_id)
            .await?
            .ok_or(StoreError::CallNotFound(call_id))
    }

    async fn find_call(&self, call_id: CallId) -> Result<Option<CallRecord>, StoreError> {
        self.fetch_call(call_id).await
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn list_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<ConversationItem>, StoreError> {
        let sql = format!(
            "{MESSAGE_SELECT} WHERE (m.sender_id = ? AND m.receiver_id = ?)
                OR (m.sender_id = ? AND m.receiver_id = ?)
             ORDER BY m.created_at, m.id"
        );
        let messages: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(&self.pool)
            .await?;

        let sql = format!(
            "{CALL_SELECT} WHERE (c.sender_id = ? AND c.receiver_id = ?)
                OR (c.sender_id = ? AND c.receiver_id = ?)
             ORDER BY c.created_at, c.id"
        );
        let calls: Vec<CallRow> = sqlx::query_as(&sql)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(&self.pool)
            .await?;

        let mut items: Vec<ConversationItem> = messages
            .into_iter()
            .map(|m| ConversationItem::Message(m.into()))
            .collect();
        for call in calls {
            items.push(ConversationItem::Call(call.try_into()?));
        }
        items.sort_by_key(ConversationItem::created_at);
        Ok(items)
    }
}
