// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderMap, HeaderValue},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_config::model::{BrokerConfig, ServerConfig};
use parley_core::{IdentityResolver, MessageStore, ParleyError, PluginAdapter, SessionStore};

use crate::auth::require_user;
use crate::connection::ConnectionManager;
use crate::handlers;
use crate::ws;

/// Health state for the unauthenticated health endpoint.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Infrastructure clients probed by `/health`.
    pub components: Vec<Arc<dyn PluginAdapter>>,
}

/// Handshake and routing settings derived from configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Bounds identity resolution during the upgrade request.
    pub auth_timeout: Duration,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub device_classes: Vec<String>,
    pub default_device_class: String,
}

impl GatewaySettings {
    pub fn new(server: &ServerConfig, broker: &BrokerConfig) -> Self {
        Self {
            allowed_origins: server.allowed_origins.clone(),
            auth_timeout: server.auth_timeout(),
            read_buffer_size: server.read_buffer_size,
            write_buffer_size: server.write_buffer_size,
            device_classes: broker.device_classes.clone(),
            default_device_class: broker.default_device_class.clone(),
        }
    }

    /// Whether the request's `Origin` passes the configured allow-list.
    /// Requests without an `Origin` header (non-browser clients) pass.
    pub fn origin_allowed(&self, headers: &HeaderMap) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match headers.get("origin").and_then(|v| v.to_str().ok()) {
            Some(origin) => self.allowed_origins.iter().any(|o| o == origin),
            None => true,
        }
    }

    fn cors_layer(&self) -> CorsLayer {
        if self.allowed_origins.is_empty() {
            return CorsLayer::permissive();
        }
        let origins: Vec<HeaderValue> = self
            .allowed_origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub connections: ConnectionManager,
    pub identity: Arc<dyn IdentityResolver>,
    pub messages: Arc<dyn MessageStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub settings: Arc<GatewaySettings>,
    pub health: HealthState,
}

/// Build the gateway router:
/// - GET /health (public)
/// - GET /ws (auth during handshake)
/// - GET /v1/sessions, GET /v1/messages, GET /v1/messages/since,
///   POST /v1/sessions/{session_id}/read (bearer auth)
pub fn router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/sessions", get(handlers::get_sessions))
        .route("/v1/sessions/{session_id}/read", post(handlers::post_session_read))
        .route("/v1/messages", get(handlers::get_messages))
        .route("/v1/messages/since", get(handlers::get_messages_since))
        .route_layer(axum_middleware::from_fn_with_state(
            state.identity.clone(),
            require_user,
        ))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(state.settings.cors_layer())
}

/// Bind the configured address.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ParleyError> {
    let addr = format!("{}:{}", config.host, config.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })
}

/// Serve until `shutdown` is cancelled, then close every connection.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), ParleyError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("gateway listening on {addr}");
    }
    let connections = state.connections.clone();
    let app = router(state);
    let signal = {
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            // Upgraded sockets are not tracked by axum; end them ourselves.
            connections.shutdown();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| ParleyError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })
}
