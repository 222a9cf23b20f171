//! End-to-end session tests against a loopback WebSocket server.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wsrpc_session::{ConnectionStatus, Session, SessionConfig, SessionError, SessionEvent};
use wsrpc_wire::Request;

/// Answers every request with its own method name. Requests are batched up
/// to `batch` per reply frame, so replies arrive concatenated.
async fn spawn_server(batch: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                let mut replies = Vec::new();

                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let request: Value = serde_json::from_str(text.as_str()).unwrap();
                    if request["method"] == "close" {
                        let _ = ws.close(None).await;
                        break;
                    }
                    replies.push(
                        json!({"jsonrpc": "2.0", "id": request["id"], "result": request["method"]})
                            .to_string(),
                    );
                    if replies.len() == batch {
                        ws.send(Message::text(replies.concat())).await.unwrap();
                        replies.clear();
                    }
                }
            });
        }
    });

    format!("ws://{}", addr)
}

async fn wait_connected(session: &Session) {
    let mut events = session.subscribe();
    if session.status() == ConnectionStatus::Connected {
        return;
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            if matches!(event, SessionEvent::Connect) {
                break;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_request_roundtrip() {
    let endpoint = spawn_server(1).await;
    let session = Session::websocket(endpoint, SessionConfig::default());

    session.connect().unwrap();
    let handle = session
        .request(Request::new(1u64, "eth_chainId", None))
        .unwrap();
    let response = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.outcome(), Ok(&json!("eth_chainId")));
    assert_eq!(session.status(), ConnectionStatus::Connected);
    session.dispose();
}

#[tokio::test]
async fn test_concatenated_replies_are_split() {
    let endpoint = spawn_server(2).await;
    let session = Session::websocket(endpoint, SessionConfig::default());

    session.connect().unwrap();
    wait_connected(&session).await;

    let first = session.request(Request::new("a", "first", None)).unwrap();
    let second = session.request(Request::new("b", "second", None)).unwrap();

    let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
        (first.await, second.await)
    })
    .await
    .unwrap();

    assert_eq!(first.unwrap().result, Some(json!("first")));
    assert_eq!(second.unwrap().result, Some(json!("second")));
    assert_eq!(session.sent_queue_size(), 0);
    session.dispose();
}

#[tokio::test]
async fn test_server_close_rejects_outstanding() {
    let endpoint = spawn_server(2).await;
    let session = Session::websocket(
        endpoint,
        SessionConfig {
            auto_reconnect: false,
            ..SessionConfig::default()
        },
    );

    session.connect().unwrap();
    wait_connected(&session).await;

    // Held by the server until a second request arrives, which never happens.
    let waiting = session.request(Request::new(1u64, "slow", None)).unwrap();
    let _close = session.request(Request::new(2u64, "close", None)).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap();
    assert!(matches!(result, Err(SessionError::Closed { code: 1005, .. })));
    session.dispose();
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let session = Session::websocket(
        endpoint,
        SessionConfig {
            auto_reconnect: false,
            ..SessionConfig::default()
        },
    );
    let mut events = session.subscribe();
    session.connect().unwrap();

    let saw_disconnect = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::Disconnect { code, .. } = event {
                return code;
            }
        }
        0
    })
    .await
    .unwrap();

    assert_eq!(saw_disconnect, 1006);
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
}
