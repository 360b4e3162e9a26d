use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use parley_auth::{AuthError, AuthService, SignInRequest, SignUpRequest};
use parley_config::ParleyConfig;
use parley_protocol::UserId;
use parley_store::{ConversationStore, SqliteStore, UserStore};

use crate::{events::EventRegistry, peer::handle_peer, state::GatewayState, ws::handle_connection};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
    events: Arc<EventRegistry>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, events: Arc<EventRegistry>) -> Router {
    let app_state = AppState {
        gateway: state,
        events,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .route("/peer", get(peer_upgrade_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/signin", post(signin_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/chat/{user_id}", get(chat_history_handler))
        .layer(cors)
        .with_state(app_state)
}

/// Start the gateway HTTP + WebSocket server.
pub async fn start_gateway(config: ParleyConfig) -> anyhow::Result<()> {
    if config.auth.secret.is_empty() {
        anyhow::bail!("auth secret is not configured (set [auth].secret or PARLEY_AUTH_SECRET)");
    }

    let store = Arc::new(SqliteStore::connect(&config.database.path).await?);
    let auth = Arc::new(AuthService::new(
        Arc::clone(&store) as Arc<dyn UserStore>,
        &config.auth.secret,
        Duration::from_secs(config.auth.token_ttl_secs),
    ));
    let state = GatewayState::new(store, auth);
    let events = Arc::new(EventRegistry::new());

    let app = build_gateway_app(Arc::clone(&state), Arc::clone(&events));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(
        version = %state.version,
        address = %addr,
        database = %config.database.path.display(),
        events = events.event_names().len(),
        "parley gateway listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

// ── HTTP handlers ────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.gateway.version,
        "connections": state.gateway.sessions.count().await,
        "peers": state.gateway.peers.count().await,
    }))
}

fn auth_error_response(err: AuthError) -> Response {
    let status = match &err {
        AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
        AuthError::UsernameTaken => StatusCode::CONFLICT,
        AuthError::PasswordMismatch | AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AuthError::Hashing | AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "auth backend failure");
        return (status, Json(json!({ "message": "internal error" }))).into_response();
    }
    (status, Json(json!({ "message": err.to_string() }))).into_response()
}

async fn signup_handler(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Response {
    match state.gateway.auth.sign_up(req).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => auth_error_response(err),
    }
}

async fn signin_handler(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Response {
    match state.gateway.auth.sign_in(req).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => auth_error_response(err),
    }
}

#[derive(Deserialize)]
struct RefreshRequest {
    token: String,
}

async fn refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Response {
    match state.gateway.auth.refresh(&req.token).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => auth_error_response(err),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn chat_history_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "missing bearer token" })),
        )
            .into_response();
    };
    let me = match state.gateway.auth.identify(token).await {
        Ok(user) => user,
        Err(err) => return auth_error_response(err),
    };

    match state.gateway.store.list_conversation(me.id, user_id).await {
        Ok(items) => Json(json!({ "chat": items })).into_response(),
        Err(err) => {
            warn!(error = %err, "unable to load conversation");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "unable to load conversation" })),
            )
                .into_response()
        }
    }
}

// ── WebSocket upgrades ───────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, state.events))
}

#[derive(Deserialize)]
struct PeerParams {
    token: String,
    /// Client-chosen media connection id.
    id: String,
}

async fn peer_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<PeerParams>,
    State(state): State<AppState>,
) -> Response {
    if params.id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "missing peer connection id" })),
        )
            .into_response();
    }
    // Authenticate before upgrading; a bad token never touches the registry.
    let user = match state.gateway.auth.identify(&params.token).await {
        Ok(user) => user,
        Err(err) => return auth_error_response(err),
    };

    ws.on_upgrade(move |socket| handle_peer(socket, state.gateway, user, params.id))
        .into_response()
}

/// Build a gateway state over an already-open store, without binding a
/// listener. Used by tests.
pub async fn build_state(
    store: Arc<SqliteStore>,
    secret: &str,
    token_ttl: Duration,
) -> Arc<GatewayState> {
    let auth = Arc::new(AuthService::new(
        Arc::clone(&store) as Arc<dyn UserStore>,
        secret,
        token_ttl,
    ));
    GatewayState::new(store, auth)
}
