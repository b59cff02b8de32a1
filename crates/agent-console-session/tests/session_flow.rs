//! End-to-end session flows against in-memory and WebSocket backends.

use std::{net::SocketAddr, time::Duration};

use agent_console_core::{
    ConnectionState, ConversationSummary, ExecutionPhase, Message, Projection,
};
use agent_console_session::{ConnectionEvent, SessionConfig, SessionFacade, Submission};
use agent_console_transport::{ChannelConnector, ClientFrame, websocket::WebSocketConnector};
use axum::{
    Router,
    extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_index_request_populates_conversations() {
    let (connector, mut peers) = ChannelConnector::new();
    let mut facade = SessionFacade::new(SessionConfig::new("mem://backend/ws"), connector);
    facade.connect();
    assert_eq!(facade.next_connection_event().await, ConnectionEvent::Open);

    let mut peer = peers.recv().await.unwrap();
    assert_eq!(
        peer.recv_json().await.unwrap(),
        json!({"type": "meta", "action": "get_conversations"})
    );

    peer.send_json(&json!({
        "type": "meta",
        "action": "conversations",
        "data": [{"conversation_id": "A", "summary": "s1"}]
    }))
    .unwrap();
    facade.next_connection_event().await;

    let projection = facade.projection();
    assert_eq!(projection.conversations, [ConversationSummary::new("A", "s1")]);
    assert_eq!(projection.active_conversation, None);
}

#[tokio::test]
async fn test_result_lands_in_active_history() {
    let (connector, mut peers) = ChannelConnector::new();
    let mut facade = SessionFacade::new(SessionConfig::new("mem://backend/ws"), connector);
    facade.connect();
    facade.next_connection_event().await;
    let mut peer = peers.recv().await.unwrap();
    peer.recv_json().await.unwrap();

    peer.send_json(&json!({
        "type": "meta",
        "action": "conversations",
        "data": [{"conversation_id": "A", "summary": "s1"}]
    }))
    .unwrap();
    facade.next_connection_event().await;
    assert!(facade.select_conversation("A"));
    peer.recv_json().await.unwrap();

    facade
        .submit(Submission::Instructions("print 42".into()))
        .unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["conversation_id"], "A");

    peer.send_json(&json!({
        "type": "result",
        "output": "42",
        "generated_code": "print(42)"
    }))
    .unwrap();
    facade.next_connection_event().await;

    let projection = facade.projection();
    assert_eq!(
        projection.messages,
        [Message::assistant("42").collapsible()]
    );
    assert_eq!(projection.phase, ExecutionPhase::Idle);
    assert_eq!(projection.output, "42");
    assert_eq!(projection.generated_code.as_deref(), Some("print(42)"));
}

#[tokio::test]
async fn test_spawned_session_streams_execution() {
    let (connector, mut peers) = ChannelConnector::new();
    let (handle, task) =
        SessionFacade::spawn(SessionConfig::new("mem://backend/ws"), connector);

    handle.connect().unwrap();
    let mut peer = peers.recv().await.unwrap();
    peer.recv_json().await.unwrap();
    handle
        .wait_for(Projection::is_connected)
        .await
        .unwrap();

    handle.submit(Submission::Code("for i in range(2): print(i)".into())).unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["type"], "execute");

    for chunk in ["0\n", "1\n", "EXECUTION_COMPLETE"] {
        peer.send_json(&json!({"type": "output", "output": chunk}))
            .unwrap();
    }
    let done = tokio::time::timeout(
        WAIT,
        handle.wait_for(|p| p.phase == ExecutionPhase::Idle && !p.output.is_empty()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(done.output, "0\n1\n");
    assert!(done.messages.is_empty());

    drop(handle);
    task.await.unwrap();
}

// Mirrors the reference backend: index on request, then a load sequence of
// conversation_info, chat_message frames and conversation_loaded.
async fn backend(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let ServerMessage::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
            continue;
        };
        let replies = if frame == ClientFrame::get_conversations() {
            vec![json!({
                "type": "meta",
                "action": "conversations",
                "data": [
                    {"conversation_id": "old", "summary": "Sine plot"},
                    {"conversation_id": "new", "summary": null}
                ]
            })]
        } else if frame == ClientFrame::load_conversation("old") {
            vec![
                json!({"type": "meta", "action": "conversation_info", "data": {"id": "old", "summary": "Sine plot"}}),
                json!({"type": "chat_message", "message": {"role": "human", "content": "plot a sine"}}),
                json!({"type": "chat_message", "message": {"role": "assistant", "content": "Generated Code"}}),
                json!({"type": "meta", "action": "conversation_loaded"}),
            ]
        } else {
            Vec::new()
        };
        for reply in replies {
            if socket
                .send(ServerMessage::Text(reply.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(backend)
}

async fn spawn_backend() -> SocketAddr {
    let app = Router::new().route("/ws", get(ws_handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_websocket_backend_load_sequence() {
    let addr = spawn_backend().await;
    let (handle, _task) =
        SessionFacade::spawn(SessionConfig::new(format!("ws://{addr}/ws")), WebSocketConnector);
    handle.connect().unwrap();

    let listed = tokio::time::timeout(WAIT, handle.wait_for(|p| p.conversations.len() == 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(listed.connection.state, ConnectionState::Open);
    let ids: Vec<&str> = listed.conversations.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["new", "old"]);

    handle.select_conversation("old").unwrap();
    let loaded = tokio::time::timeout(WAIT, handle.wait_for(|p| p.messages.len() == 2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.active_conversation.as_deref(), Some("old"));
    assert_eq!(loaded.messages[0], Message::human("plot a sine"));

    handle.close().unwrap();
    let closed = tokio::time::timeout(
        WAIT,
        handle.wait_for(|p| p.connection.state == ConnectionState::Closed),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(closed.connection.retry_count, 0);
}
