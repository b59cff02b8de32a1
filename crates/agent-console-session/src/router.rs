//! Inbound frame routing.

use agent_console_core::{ConversationStore, ExecutionError, ExecutionSession};
use agent_console_transport::{InboundFrame, ProtocolError};

/// Outcome of routing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routed {
    /// Frame kind, for diagnostics.
    pub kind: &'static str,
    /// Whether the frame changed session state. Invariant violations such as
    /// a chunk while idle or a stale history are routed but not applied.
    pub applied: bool,
}

/// Decodes inbound frames and applies each to exactly one handler.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    placeholder_summary: String,
}

impl MessageRouter {
    #[must_use]
    pub fn new(placeholder_summary: impl Into<String>) -> Self {
        Self {
            placeholder_summary: placeholder_summary.into(),
        }
    }

    /// Decode `raw` and apply it.
    ///
    /// # Errors
    /// Returns the [`ProtocolError`] for frames that cannot be decoded. The
    /// error is already logged and nothing was mutated.
    pub fn route(
        &self,
        raw: &str,
        store: &mut ConversationStore,
        execution: &mut ExecutionSession,
    ) -> Result<Routed, ProtocolError> {
        let frame = match InboundFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_unknown_discriminator() {
                    tracing::warn!("Ignoring frame: {e}");
                } else {
                    tracing::warn!("Dropping undecodable frame: {e}");
                    tracing::debug!("Raw frame: {raw}");
                }
                return Err(e);
            }
        };
        Ok(self.dispatch(frame, store, execution))
    }

    /// Apply an already decoded frame.
    pub fn dispatch(
        &self,
        frame: InboundFrame,
        store: &mut ConversationStore,
        execution: &mut ExecutionSession,
    ) -> Routed {
        let kind = frame.kind();
        tracing::trace!(kind, "Routing frame");

        let applied = match frame {
            InboundFrame::Chunk(text) => {
                let executing = execution.is_executing();
                execution.on_chunk(&text);
                executing
            }
            InboundFrame::Result {
                output,
                generated_code,
            } => {
                let on_active = targets_active(store, execution);
                match execution.on_result(output, generated_code) {
                    Some(message) if on_active => {
                        store.append_message(message);
                        true
                    }
                    Some(_) => {
                        tracing::debug!(
                            target_conversation = execution.target(),
                            "Result for an inactive conversation kept out of history"
                        );
                        true
                    }
                    None => false,
                }
            }
            InboundFrame::ExecutionFailed(message) => {
                execution.fail(ExecutionError::Backend(message));
                true
            }
            InboundFrame::Plot(plot) => {
                execution.on_plot(plot);
                true
            }
            InboundFrame::ChatMessage(message) => {
                if store.history_pending() {
                    tracing::debug!("Chat message for the previous conversation discarded");
                    false
                } else if execution.is_executing() && !targets_active(store, execution) {
                    tracing::debug!(
                        target_conversation = execution.target(),
                        "Chat message for an inactive conversation discarded"
                    );
                    false
                } else {
                    store.append_message(message)
                }
            }
            InboundFrame::Conversations(list) => {
                tracing::debug!(count = list.len(), "Conversation index received");
                store.replace_index(list);
                true
            }
            InboundFrame::ConversationInfo { id, summary } => {
                store.activate(&id, summary, &self.placeholder_summary);
                true
            }
            InboundFrame::NewConversation { id, summary } => {
                tracing::info!(conversation_id = %id, "Conversation created");
                store.create_conversation(
                    id,
                    summary.unwrap_or_else(|| self.placeholder_summary.clone()),
                );
                true
            }
            InboundFrame::LoadedHistory { id, messages } => {
                store.loaded_history(id.as_deref(), messages)
            }
            InboundFrame::HistoryComplete => {
                tracing::debug!(
                    messages = store.history().len(),
                    "Conversation history loaded"
                );
                store.finish_load()
            }
            InboundFrame::Summary { id, summary } => store.upsert_summary(&id, summary),
            InboundFrame::DeleteConversation { id } => store.delete_conversation(&id),
            InboundFrame::ClearConversation { id } => store.clear_conversation(&id),
        };

        Routed { kind, applied }
    }
}

/// Whether the running (or last) execution was submitted in the active
/// conversation. Executions without a conversation follow the active one.
fn targets_active(store: &ConversationStore, execution: &ExecutionSession) -> bool {
    execution
        .target()
        .is_none_or(|target| store.active_id() == Some(target))
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PLACEHOLDER_SUMMARY)
    }
}

#[cfg(test)]
mod tests {
    use agent_console_core::{ExecutionPhase, IndexOrder, Message, Role};
    use serde_json::json;

    use super::*;

    fn setup() -> (MessageRouter, ConversationStore, ExecutionSession) {
        (
            MessageRouter::default(),
            ConversationStore::new(IndexOrder::NewestFirst),
            ExecutionSession::new(),
        )
    }

    fn route(
        router: &MessageRouter,
        store: &mut ConversationStore,
        exec: &mut ExecutionSession,
        frame: &serde_json::Value,
    ) -> Result<Routed, ProtocolError> {
        router.route(&frame.to_string(), store, exec)
    }

    #[test]
    fn test_unknown_type_and_action_change_nothing() {
        let (router, mut store, mut exec) = setup();
        store.create_conversation("a", "s");
        store.append_message(Message::human("hi"));
        exec.start().unwrap();
        exec.on_chunk("partial");

        let bad = [
            json!({"type": "telemetry", "output": "x"}),
            json!({"type": "meta", "action": "rename_conversation", "id": "a"}),
            json!({"type": "meta"}),
            json!([1, 2, 3]),
        ];
        for frame in &bad {
            assert!(route(&router, &mut store, &mut exec, frame).is_err());
        }
        assert!(router.route("not json", &mut store, &mut exec).is_err());

        assert_eq!(store.history(), [Message::human("hi")].as_slice());
        assert_eq!(store.index().len(), 1);
        assert_eq!(exec.buffer(), "partial");
        assert_eq!(exec.phase(), ExecutionPhase::Executing);
    }

    #[test]
    fn test_streamed_chunks_then_sentinel() {
        let (router, mut store, mut exec) = setup();
        exec.start().unwrap();

        for chunk in ["ab", "cd", "EXECUTION_COMPLETE"] {
            let routed = route(&router, &mut store, &mut exec, &json!({"output": chunk})).unwrap();
            assert_eq!(routed.kind, "chunk");
        }

        assert_eq!(exec.buffer(), "abcd");
        assert_eq!(exec.phase(), ExecutionPhase::Idle);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_chunk_while_idle_is_not_applied() {
        let (router, mut store, mut exec) = setup();
        let routed = route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "stream", "output": "late"}),
        )
        .unwrap();
        assert!(!routed.applied);
        assert_eq!(exec.buffer(), "");
    }

    #[test]
    fn test_result_appends_collapsible_assistant_message() {
        let (router, mut store, mut exec) = setup();
        store.create_conversation("A", "s");
        exec.start().unwrap();

        route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "result", "execution_id": "e1", "output": "42", "generated_code": "print(42)"}),
        )
        .unwrap();

        assert_eq!(
            store.history(),
            [Message::assistant("42").collapsible()].as_slice()
        );
        assert_eq!(exec.phase(), ExecutionPhase::Idle);
        assert_eq!(exec.generated_code(), Some("print(42)"));
    }

    #[test]
    fn test_error_result_fails_execution() {
        let (router, mut store, mut exec) = setup();
        exec.start().unwrap();

        route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "result", "error": "NameError: x"}),
        )
        .unwrap();

        assert_eq!(exec.phase(), ExecutionPhase::Idle);
        assert_eq!(exec.output(), "Error: NameError: x");
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_load_sequence_from_reference_backend() {
        let (router, mut store, mut exec) = setup();
        store.replace_index(vec![
            agent_console_core::ConversationSummary::new("b", "second"),
            agent_console_core::ConversationSummary::new("a", "first"),
        ]);
        store.select_conversation("b");

        let frames = [
            json!({"type": "meta", "action": "conversation_info", "data": {"id": "a", "summary": "first"}}),
            json!({"type": "chat_message", "message": {"role": "human", "content": "plot it"}}),
            json!({"type": "chat_message", "message": {"role": "assistant", "content": "done"}}),
            json!({"type": "meta", "action": "conversation_loaded"}),
        ];
        let applied: Vec<bool> = frames
            .iter()
            .map(|f| route(&router, &mut store, &mut exec, f).unwrap().applied)
            .collect();

        assert_eq!(applied, [true, true, true, true]);
        assert_eq!(store.active_id(), Some("a"));
        let roles: Vec<Role> = store.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::Human, Role::Assistant]);
    }

    #[test]
    fn test_result_while_idle_is_discarded() {
        let (router, mut store, mut exec) = setup();
        store.create_conversation("A", "s");

        let routed = route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "result", "output": "42", "generated_code": "print(42)"}),
        )
        .unwrap();

        assert!(!routed.applied);
        assert!(store.history().is_empty());
        assert_eq!(exec.output(), "");
        assert_eq!(exec.generated_code(), None);
    }

    #[test]
    fn test_switch_mid_turn_keeps_histories_apart() {
        let (router, mut store, mut exec) = setup();
        store.replace_index(vec![
            agent_console_core::ConversationSummary::new("B", "second"),
            agent_console_core::ConversationSummary::new("A", "first"),
        ]);
        store.select_conversation("A");
        store.activate("A", None, "New conversation");
        store.finish_load();
        exec.start_in(Some("A".into())).unwrap();
        store.append_message(Message::human("A question"));

        // User switches while A's turn is still running.
        assert!(store.select_conversation("B"));

        let frames = [
            json!({"type": "chat_message", "message": {"role": "assistant", "content": "A: generated code"}}),
            json!({"type": "result", "output": "A result"}),
            json!({"type": "meta", "action": "conversation_info", "data": {"id": "B", "summary": "second"}}),
            json!({"type": "chat_message", "message": {"role": "human", "content": "B question"}}),
            json!({"type": "meta", "action": "conversation_loaded"}),
        ];
        for frame in &frames {
            route(&router, &mut store, &mut exec, frame).unwrap();
        }

        assert_eq!(store.active_id(), Some("B"));
        assert_eq!(store.history(), [Message::human("B question")].as_slice());
        assert_eq!(exec.phase(), ExecutionPhase::Idle);
        assert_eq!(exec.output(), "A result");
    }

    #[test]
    fn test_chat_for_running_turn_elsewhere_is_discarded() {
        let (router, mut store, mut exec) = setup();
        store.create_conversation("A", "s");
        exec.start_in(Some("A".into())).unwrap();
        store.create_conversation("B", "s");

        let routed = route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "chat_message", "message": {"role": "system", "content": "A output"}}),
        )
        .unwrap();

        assert!(!routed.applied);
        assert!(store.history().is_empty());
        assert!(exec.is_executing());
    }

    #[test]
    fn test_new_conversation_uses_placeholder() {
        let router = MessageRouter::new("Untitled");
        let mut store = ConversationStore::default();
        let mut exec = ExecutionSession::new();

        route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "meta", "action": "new_conversation", "data": {"conversation_id": "n1"}}),
        )
        .unwrap();

        assert_eq!(store.active_id(), Some("n1"));
        assert_eq!(store.index()[0].summary, "Untitled");
    }

    #[test]
    fn test_stale_history_is_not_applied() {
        let (router, mut store, mut exec) = setup();
        store.create_conversation("a", "s");
        store.create_conversation("b", "s");

        let routed = route(
            &router,
            &mut store,
            &mut exec,
            &json!({
                "type": "meta",
                "action": "loaded_conversation",
                "conversation_id": "a",
                "history": [{"role": "human", "content": "old"}]
            }),
        )
        .unwrap();

        assert!(!routed.applied);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_summary_for_unknown_id_is_ignored() {
        let (router, mut store, mut exec) = setup();
        let routed = route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "conversation_summary", "id": "ghost", "summary": "s"}),
        )
        .unwrap();
        assert!(!routed.applied);
        assert!(store.index().is_empty());
    }

    #[test]
    fn test_plot_payload_is_kept_raw() {
        let (router, mut store, mut exec) = setup();
        let raw = r#"{"data":[],"layout":{}}"#;
        route(
            &router,
            &mut store,
            &mut exec,
            &json!({"type": "plotly", "execution_id": "e1", "plot_data": raw}),
        )
        .unwrap();
        assert_eq!(exec.plot().map(|p| p.raw()), Some(raw));
    }
}
