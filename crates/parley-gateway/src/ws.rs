// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket upgrade endpoint.
//!
//! The handshake authenticates the caller, checks the origin, and picks the
//! device class; the upgraded socket is then adapted to [`Frame`]s and
//! handed to the connection manager.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;

use parley_core::ParleyError;

use crate::auth::credentials;
use crate::frame::Frame;
use crate::server::GatewayState;

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Credentials for clients that cannot set headers.
    #[serde(default)]
    pub token: Option<String>,
    /// Device class; selects the queue this connection consumes.
    #[serde(default)]
    pub device: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    if !state.settings.origin_allowed(&headers) {
        tracing::debug!("upgrade rejected: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    let Some(token) = credentials(&headers, params.token.as_deref()) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    // Only identity resolution is bounded here; hyper switches protocols
    // after this handler returns.
    let auth_timeout = state.settings.auth_timeout;
    let user_id = match tokio::time::timeout(auth_timeout, state.identity.resolve(token)).await {
        Ok(Ok(user_id)) => user_id,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "upgrade rejected: identity");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(_) => {
            tracing::warn!(?auth_timeout, "identity resolution timed out");
            return StatusCode::GATEWAY_TIMEOUT.into_response();
        }
    };

    let device_class = params
        .device
        .unwrap_or_else(|| state.settings.default_device_class.clone());
    if !state.settings.device_classes.contains(&device_class) {
        return (StatusCode::BAD_REQUEST, format!("unknown device class '{device_class}'"))
            .into_response();
    }

    let connections = state.connections.clone();
    ws.read_buffer_size(state.settings.read_buffer_size)
        .write_buffer_size(state.settings.write_buffer_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = adapt(socket);
            connections
                .connect(sink, stream, user_id, &device_class)
                .join()
                .await;
        })
}

/// Split an axum WebSocket into a [`Frame`] sink and stream.
pub fn adapt(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = ParleyError> + Send + Unpin + 'static,
    impl Stream<Item = Result<Frame, ParleyError>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| channel_error("websocket write failed", e))
        .with(|frame: Frame| future::ready(Ok::<_, ParleyError>(to_ws(frame))));
    let stream = stream.map(|next| {
        next.map(from_ws)
            .map_err(|e| channel_error("websocket read failed", e))
    });
    (sink, stream)
}

fn channel_error(message: &str, e: axum::Error) -> ParleyError {
    ParleyError::Channel {
        message: format!("{message}: {e}"),
        source: Some(Box::new(e)),
    }
}

fn to_ws(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        Frame::Ping(payload) => WsMessage::Ping(payload.into()),
        Frame::Pong(payload) => WsMessage::Pong(payload.into()),
        Frame::Close => WsMessage::Close(None),
    }
}

fn from_ws(msg: WsMessage) -> Frame {
    match msg {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        WsMessage::Ping(payload) => Frame::Ping(payload.to_vec()),
        WsMessage::Pong(payload) => Frame::Pong(payload.to_vec()),
        WsMessage::Close(_) => Frame::Close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_params_are_optional() {
        let params: WsParams = serde_json::from_str("{}").unwrap();
        assert!(params.token.is_none());
        assert!(params.device.is_none());
    }

    #[test]
    fn frames_map_to_websocket_messages() {
        assert_eq!(from_ws(to_ws(Frame::Text("hi".into()))), Frame::Text("hi".into()));
        assert_eq!(from_ws(to_ws(Frame::Ping(vec![1]))), Frame::Ping(vec![1]));
        assert_eq!(from_ws(to_ws(Frame::Close)), Frame::Close);
    }
}
