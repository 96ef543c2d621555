// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graceful shutdown: SIGINT/SIGTERM cancel a [`CancellationToken`] watched
//! by the gateway, then live connections are drained so their consumers hand
//! unacked deliveries back before the broker closes.

use std::time::Duration;

use parley_gateway::ConnectionManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Spawn a task that cancels the returned token on the first signal.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "shutdown requested");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, only Ctrl+C will stop the server");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

/// Close every connection and wait up to `timeout` for their cleanup.
///
/// Returns the number of connections still alive when the wait gave up.
pub async fn drain_connections(connections: &ConnectionManager, timeout: Duration) -> usize {
    connections.shutdown();
    let live = connections.live_connections();
    if live == 0 {
        return 0;
    }
    info!(live, "waiting for connections to close");

    let drained = tokio::time::timeout(timeout, async {
        while connections.live_connections() > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await;

    let left = connections.live_connections();
    if drained.is_err() {
        warn!(left, "connections still open after drain timeout");
    }
    left
}
