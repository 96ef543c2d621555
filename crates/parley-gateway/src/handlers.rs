// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.
//!
//! The REST surface is the read path of the inbox: session lists, message
//! history, and marking a conversation read. Sending goes over `/ws` only.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use parley_core::wire::i64_string;
use parley_core::{ErrorKind, HealthStatus, Message, MessagePage, ParleyError, Session};

use crate::auth::AuthenticatedUser;
use crate::server::GatewayState;

/// Default page size for history queries.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error description.
    pub error: String,
    /// Taxonomy kind, e.g. `invalid_param`.
    pub kind: String,
}

/// A [`ParleyError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ParleyError);

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::InvalidParam => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Lower-layer details stay in the logs.
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(ErrorResponse {
                error,
                kind: kind.to_string(),
            }),
        )
            .into_response()
    }
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when every component is healthy, else `degraded`.
    pub status: String,
    /// Binary version.
    pub version: String,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Open client connections.
    pub connections: usize,
    /// Per-component status.
    pub components: Vec<ComponentHealth>,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let mut components = Vec::with_capacity(state.health.components.len());
    let mut all_healthy = true;
    for component in &state.health.components {
        let status = match component.health_check().await {
            Ok(HealthStatus::Healthy) => "healthy".to_string(),
            Ok(HealthStatus::Degraded(why)) => format!("degraded: {why}"),
            Ok(HealthStatus::Unhealthy(why)) => format!("unhealthy: {why}"),
            Err(e) => format!("unhealthy: {e}"),
        };
        all_healthy &= status == "healthy";
        components.push(ComponentHealth {
            name: component.name().to_string(),
            status,
        });
    }
    Json(HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        connections: state.connections.live_connections(),
        components,
    })
}

/// Response body for GET /v1/sessions.
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
}

/// GET /v1/sessions
pub async fn get_sessions(
    State(state): State<GatewayState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.sessions.list_for(user_id).await?;
    Ok(Json(SessionListResponse { sessions }))
}

/// POST /v1/sessions/{session_id}/read
pub async fn post_session_read(
    State(state): State<GatewayState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session_id: i64 = session_id
        .parse()
        .map_err(|_| ParleyError::InvalidParam(format!("invalid session id '{session_id}'")))?;
    state.sessions.clear_unread(user_id, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query for GET /v1/messages.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(with = "i64_string")]
    pub peer: i64,
    #[serde(default = "default_page_no")]
    pub page_no: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_no() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// GET /v1/messages
pub async fn get_messages(
    State(state): State<GatewayState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let page = state
        .messages
        .list_pair(user_id, query.peer, query.page_no, query.page_size)
        .await?;
    Ok(Json(page))
}

/// Query for GET /v1/messages/since.
#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    #[serde(with = "i64_string")]
    pub peer: i64,
    #[serde(default, with = "parley_core::wire::i64_string_option")]
    pub cursor: Option<i64>,
    #[serde(default = "default_page_size")]
    pub limit: u32,
}

/// Response body for GET /v1/messages/since.
#[derive(Debug, Serialize)]
pub struct SinceResponse {
    pub messages: Vec<Message>,
}

/// GET /v1/messages/since
///
/// Catch-up read: messages after `cursor` (a message id), oldest first.
pub async fn get_messages_since(
    State(state): State<GatewayState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<SinceResponse>, ApiError> {
    let messages = state
        .messages
        .list_since(user_id, query.peer, query.cursor.unwrap_or(0), query.limit)
        .await?;
    Ok(Json(SinceResponse { messages }))
}
