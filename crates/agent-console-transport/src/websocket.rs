//! WebSocket client transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::link::{Connector, Link, TransportError};

/// Upper bound on the close handshake once the link is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connects to the backend's `/ws` endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::info!("WebSocket connected to {url}");

        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        // One task owns the socket; the link only holds channel ends.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => {
                        let Some(text) = outbound else {
                            // Link dropped
                            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_sender.close()).await;
                            break;
                        };
                        if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                            tracing::warn!("WebSocket send failed: {e}");
                            break;
                        }
                    }
                    inbound = ws_receiver.next() => {
                        let text = match inbound {
                            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                                Ok(s) => s,
                                Err(_) => {
                                    tracing::warn!("Dropping non-UTF-8 binary frame");
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                tracing::warn!("WebSocket error: {e}");
                                break;
                            }
                        };
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("WebSocket task finished");
        });

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{
        Router,
        extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade},
        response::IntoResponse,
        routing::get,
    };

    use super::*;
    use crate::protocol::{ClientFrame, InboundFrame};

    async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(reply_with_index)
    }

    // Answers every get_conversations request with a one-entry index.
    async fn reply_with_index(mut socket: WebSocket) {
        while let Some(Ok(msg)) = socket.recv().await {
            let ServerMessage::Text(text) = msg else {
                continue;
            };
            let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
                continue;
            };
            if frame == ClientFrame::get_conversations() {
                let reply = serde_json::json!({
                    "type": "meta",
                    "action": "conversations",
                    "data": [{"conversation_id": "A", "summary": "s1"}]
                });
                if socket
                    .send(ServerMessage::Text(reply.to_string().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
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
    async fn test_round_trip_against_websocket_backend() {
        let addr = spawn_backend().await;
        let mut link = WebSocketConnector
            .connect(&format!("ws://{addr}/ws"))
            .await
            .unwrap();

        link.send(ClientFrame::get_conversations().to_json().unwrap())
            .unwrap();
        let raw = link.recv().await.unwrap();

        let frame = InboundFrame::decode(&raw).unwrap();
        assert!(matches!(frame, InboundFrame::Conversations(ref list) if list[0].id == "A"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocketConnector.connect(&format!("ws://{addr}/ws")).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
