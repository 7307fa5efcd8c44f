//! Integration tests for WebSocket chat streaming.
//!
//! A real server is bound to a free local port and driven with a
//! tungstenite client.

mod common;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use common::{topics, ScriptedModel};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;
use tutor_engine::{create_router, AppState, Config, InMemoryPersistence};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_state(model: Arc<ScriptedModel>) -> AppState {
    AppState::new(
        Config::default(),
        Arc::new(InMemoryPersistence::new()),
        model,
    )
}

/// Spawns the test server and returns the streaming chat URL.
async fn spawn_test_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let ws_url = format!("ws://{addr}/api/tutor/chat/stream");

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (ws_url, handle)
}

async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text frame as JSON, answering pings on the way.
async fn receive_event(client: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

async fn send_chat(client: &mut WsClient, session_id: &str, message: &str) {
    let request = serde_json::json!({ "sessionId": session_id, "message": message });
    client
        .send(Message::Text(request.to_string()))
        .await
        .expect("Failed to send request");
}

#[tokio::test]
async fn test_tokens_then_complete() {
    let model = ScriptedModel::streaming(&["러스트는 ", "漢", "안전합니다"]);
    let state = test_state(Arc::clone(&model));
    state
        .controller
        .start("s1", topics(&["Ownership"]))
        .await
        .expect("start failed");
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    send_chat(&mut client, "s1", "<IS>one owner per value</IS>").await;

    let mut tokens = String::new();
    let complete = loop {
        let event = receive_event(&mut client).await;
        match event["event"].as_str() {
            Some("token") => tokens.push_str(event["payload"]["content"].as_str().unwrap()),
            Some("complete") => break event,
            other => panic!("unexpected event {other:?}: {event}"),
        }
    };

    assert_eq!(tokens, "러스트는 漢안전합니다");
    let payload = &complete["payload"];
    assert_eq!(payload["response"], "러스트는 안전합니다");
    assert_eq!(payload["hasSummary"], true);
    assert_eq!(payload["stepCount"], 1);
}

#[tokio::test]
async fn test_unknown_session_yields_error_event() {
    let state = test_state(ScriptedModel::new());
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    send_chat(&mut client, "missing", "hello").await;

    let event = receive_event(&mut client).await;
    assert_eq!(event["event"], "error");
    assert!(event["payload"]["message"]
        .as_str()
        .unwrap()
        .contains("missing"));
}

#[tokio::test]
async fn test_malformed_request_yields_error_event() {
    let state = test_state(ScriptedModel::new());
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    client
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();

    let event = receive_event(&mut client).await;
    assert_eq!(event["event"], "error");
    assert!(event["payload"]["message"]
        .as_str()
        .unwrap()
        .starts_with("invalid request"));
}

#[tokio::test]
async fn test_connection_serves_consecutive_requests() {
    let state = test_state(ScriptedModel::streaming(&["첫 번째"]));
    state
        .controller
        .start("s1", topics(&["A"]))
        .await
        .expect("start failed");
    let (ws_url, _handle) = spawn_test_server(state).await;

    let mut client = connect_client(&ws_url).await;
    for message in ["first question", "second question"] {
        send_chat(&mut client, "s1", message).await;
        loop {
            let event = receive_event(&mut client).await;
            if event["event"] == "complete" {
                break;
            }
            assert_eq!(event["event"], "token");
        }
    }
}
