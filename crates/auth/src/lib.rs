//! Identity collaborator: credential storage and token-based connection
//! authentication.
//!
//! Passwords are argon2-hashed; sessions are HS256 JWTs carrying the user id.
//! The gateway calls [`AuthService::identify`] once per connection
//! establishment; an `Err` means the connection is closed before it ever
//! reaches a registry.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_protocol::{UserId, UserSummary};
use parley_store::{StoreError, UserStore};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("incorrect username or password")]
    InvalidCredentials,
    #[error("username already taken")]
    UsernameTaken,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("invalid token")]
    InvalidToken,
    #[error("password hashing failed")]
    Hashing,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken => AuthError::UsernameTaken,
            other => AuthError::Store(other),
        }
    }
}

/// JWT claims for a signed-in user.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub username: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issued session: a bearer token plus the user it identifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: UserSummary,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    #[serde(default)]
    pub name: String,
    pub password: String,
    pub repassword: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct AuthService {
    users: Arc<dyn UserStore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserStore>, secret: &str, token_ttl: Duration) -> Self {
        Self {
            users,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    /// Register a new user and issue a session for it.
    pub async fn sign_up(&self, req: SignUpRequest) -> Result<Session, AuthError> {
        if req.username.is_empty() {
            return Err(AuthError::InvalidInput("username must not be empty"));
        }
        if req.password.is_empty() {
            return Err(AuthError::InvalidInput("password must not be empty"));
        }
        if req.password != req.repassword {
            return Err(AuthError::PasswordMismatch);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|_| AuthError::Hashing)?
            .to_string();

        let user = self
            .users
            .create_user(&req.username, &req.name, req.avatar.as_deref(), &hash)
            .await?;
        debug!(user = user.id, username = %user.username, "user registered");
        self.issue(user)
    }

    /// Verify credentials and issue a session.
    pub async fn sign_in(&self, req: SignInRequest) -> Result<Session, AuthError> {
        let Some(creds) = self.users.find_by_username(&req.username).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        let parsed =
            PasswordHash::new(&creds.password_hash).map_err(|_| AuthError::Hashing)?;
        if Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(AuthError::InvalidCredentials);
        }
        self.issue(creds.user)
    }

    /// Decode and validate a token. Pure JWT check, no store access.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    /// Resolve a token to the user it identifies. Called once per connection
    /// establishment; the user must still exist.
    pub async fn identify(&self, token: &str) -> Result<UserSummary, AuthError> {
        let claims = self.verify(token)?;
        self.users
            .find_user(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Re-issue a session for a still-valid token.
    pub async fn refresh(&self, token: &str) -> Result<Session, AuthError> {
        let user = self.identify(token).await?;
        self.issue(user)
    }

    fn issue(&self, user: UserSummary) -> Result<Session, AuthError> {
        let iat = now_secs();
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            iat,
            exp: iat + self.token_ttl.as_secs(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(Session { token, user })
    }
}
