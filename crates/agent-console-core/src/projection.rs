//! Immutable state snapshots for presentation.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{
    ConversationId, ConversationStore, ExecutionPhase, ExecutionSession, PlotPayload,
    conversation::{ConversationSummary, Message},
};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Also the state before the first `connect`.
    #[default]
    Closed,
    Reconnecting,
}

/// Connection state as shown to presentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub retry_count: u32,
}

/// Everything presentation needs to render one frame of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub connection: ConnectionSnapshot,
    pub conversations: Vec<ConversationSummary>,
    pub active_conversation: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub phase: ExecutionPhase,
    pub output: String,
    pub generated_code: Option<String>,
    pub plot: Option<PlotPayload>,
    pub submit_rejected: bool,
    pub error: Option<String>,
}

impl Projection {
    /// Capture the current state of the session entities.
    #[must_use]
    pub fn capture(
        connection: ConnectionSnapshot,
        store: &ConversationStore,
        execution: &ExecutionSession,
    ) -> Self {
        Self {
            connection,
            conversations: store.index().to_vec(),
            active_conversation: store.active_id().map(str::to_string),
            messages: store.history().to_vec(),
            phase: execution.phase(),
            output: execution.output(),
            generated_code: execution.generated_code().map(str::to_string),
            plot: execution.plot().cloned(),
            submit_rejected: execution.rejected(),
            error: execution.error().map(ToString::to_string),
        }
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.connection.state, ConnectionState::Open)
    }
}

/// Publishes projections to any number of presentation subscribers.
///
/// Subscribers always see the latest snapshot; intermediate snapshots may be
/// skipped if a subscriber falls behind.
pub struct ProjectionPublisher {
    sender: watch::Sender<Projection>,
}

impl Default for ProjectionPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionPublisher {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Projection::default());
        Self { sender }
    }

    /// Replace the current snapshot. Subscribers are only woken if it changed.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn publish(&self, next: Projection) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        })
    }

    /// Get the latest snapshot.
    #[must_use]
    pub fn current(&self) -> Projection {
        self.sender.borrow().clone()
    }

    /// Get a receiver for live snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Projection> {
        self.sender.subscribe()
    }

    /// Stream that yields the latest snapshot, then every change.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, Projection> {
        WatchStream::new(self.subscribe()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn test_capture_reflects_entities() {
        let mut store = ConversationStore::default();
        store.create_conversation("a", "New conversation");
        store.append_message(Message::human("hi"));
        let mut exec = ExecutionSession::new();
        exec.start().unwrap();
        exec.on_chunk("partial");

        let snapshot = ConnectionSnapshot {
            state: ConnectionState::Open,
            retry_count: 0,
        };
        let projection = Projection::capture(snapshot, &store, &exec);

        assert!(projection.is_connected());
        assert_eq!(projection.active_conversation.as_deref(), Some("a"));
        assert_eq!(projection.messages, vec![Message::human("hi")]);
        assert_eq!(projection.phase, ExecutionPhase::Executing);
        assert_eq!(projection.output, "partial");
    }

    #[test]
    fn test_publish_skips_identical_snapshots() {
        let publisher = ProjectionPublisher::new();
        let rx = publisher.subscribe();

        assert!(!publisher.publish(Projection::default()));
        assert!(!rx.has_changed().unwrap());

        let next = Projection {
            output: "x".into(),
            ..Projection::default()
        };
        assert!(publisher.publish(next));
        assert!(rx.has_changed().unwrap());
        assert_eq!(publisher.current().output, "x");
    }

    #[tokio::test]
    async fn test_stream_starts_with_latest_snapshot() {
        let publisher = ProjectionPublisher::new();
        publisher.publish(Projection {
            output: "latest".into(),
            ..Projection::default()
        });

        let mut stream = publisher.stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.output, "latest");
    }
}
