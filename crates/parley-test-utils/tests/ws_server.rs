// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket clients against a gateway bound to a real socket.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use parley_core::Message;
use parley_gateway::server::serve;
use parley_test_utils::TestHarness;

const WAIT: Duration = Duration::from_secs(5);

async fn start(harness: &TestHarness) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, harness.gateway_state(), shutdown.clone()));
    (addr, shutdown)
}

async fn next_message<S>(socket: &mut S) -> Message
where
    S: futures::Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("frame before timeout")
            .expect("socket open")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return Message::from_json(text.as_str()).unwrap();
        }
    }
}

/// Status code of a refused upgrade.
async fn rejection(url: String) -> u16 {
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("upgrade unexpectedly accepted"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_flow_between_websocket_clients() {
    let harness = TestHarness::builder().build().await.unwrap();
    let (addr, shutdown) = start(&harness).await;

    let url = |user: i64| format!("ws://{addr}/ws?token={}", harness.token(user));
    let (mut alice, _) = tokio_tungstenite::connect_async(url(1)).await.unwrap();
    let (mut bob, _) = tokio_tungstenite::connect_async(url(2)).await.unwrap();
    tokio::time::timeout(WAIT, async {
        while harness.connections().live_connections() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both connected");

    alice
        .send(WsMessage::text(r#"{"message_to":"2","content":"hey bob"}"#))
        .await
        .unwrap();

    let echoed = next_message(&mut alice).await;
    let delivered = next_message(&mut bob).await;
    assert_eq!(echoed, delivered);
    assert_eq!((delivered.from, delivered.to), (1, 2));
    assert_eq!(delivered.content, "hey bob");

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn upgrade_is_rejected_without_valid_credentials() {
    let harness = TestHarness::builder().build().await.unwrap();
    let (addr, shutdown) = start(&harness).await;

    for url in [
        format!("ws://{addr}/ws"),
        format!("ws://{addr}/ws?token=1.00"),
    ] {
        assert_eq!(rejection(url).await, 401);
    }

    let url = format!("ws://{addr}/ws?token={}&device=fridge", harness.token(1));
    assert_eq!(rejection(url).await, 400);

    shutdown.cancel();
}
