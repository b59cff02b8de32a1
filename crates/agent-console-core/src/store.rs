//! Conversation index and active history.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationId, ConversationSummary, Message};

/// Order in which the backend lists conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrder {
    /// Backend lists in insertion order; reversed before commit.
    #[default]
    OldestFirst,
    /// Backend already lists newest first.
    NewestFirst,
}

/// Progress of a history load for the active conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum HistoryLoad {
    #[default]
    Idle,
    /// Requested; the backend has not announced the conversation yet.
    Requested,
    /// Announced; history messages are streaming in.
    Streaming,
}

/// Authoritative in-memory model of the conversation list and the active
/// conversation's history.
///
/// The index is newest-first with exactly one entry per id. The active id is
/// either `None` or present in the index. Switching conversations is a hard
/// cut: the history is emptied and refilled by later events.
#[derive(Debug, Default)]
pub struct ConversationStore {
    index: Vec<ConversationSummary>,
    active_id: Option<ConversationId>,
    history: Vec<Message>,
    order: IndexOrder,
    load: HistoryLoad,
}

impl ConversationStore {
    /// Create an empty store that expects the given backend ordering.
    #[must_use]
    pub fn new(order: IndexOrder) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn index(&self) -> &[ConversationSummary] {
        &self.index
    }

    #[must_use]
    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Whether a requested history has not been announced yet. Chat
    /// messages arriving meanwhile belong to the previous conversation.
    #[must_use]
    pub fn history_pending(&self) -> bool {
        self.load == HistoryLoad::Requested
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.index.iter().position(|c| c.id == id)
    }

    /// Atomically replace the index.
    ///
    /// Duplicate ids keep their first occurrence after ordering is applied.
    /// If the active conversation disappeared, the active id and history are
    /// cleared.
    pub fn replace_index(&mut self, conversations: Vec<ConversationSummary>) {
        let mut incoming = conversations;
        if self.order == IndexOrder::OldestFirst {
            incoming.reverse();
        }

        let mut seen = HashSet::new();
        incoming.retain(|c| seen.insert(c.id.clone()));
        self.index = incoming;

        if let Some(active) = self.active_id.as_deref() {
            if !self.contains(active) {
                tracing::debug!(conversation_id = active, "Active conversation left the index");
                self.active_id = None;
                self.history.clear();
                self.load = HistoryLoad::Idle;
            }
        }
    }

    /// Update the summary of a known conversation.
    ///
    /// Returns `false` (and changes nothing) for unknown ids.
    pub fn upsert_summary(&mut self, id: &str, summary: impl Into<String>) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.index[pos].summary = summary.into();
                true
            }
            None => {
                tracing::debug!(conversation_id = id, "Summary for unknown conversation ignored");
                false
            }
        }
    }

    /// Insert a conversation at the front of the index and make it active.
    pub fn create_conversation(&mut self, id: impl Into<ConversationId>, summary: impl Into<String>) {
        let id = id.into();
        if let Some(pos) = self.position(&id) {
            self.index.remove(pos);
        }
        self.index
            .insert(0, ConversationSummary::new(id.clone(), summary));
        self.active_id = Some(id);
        self.history.clear();
        self.load = HistoryLoad::Idle;
    }

    /// Make a listed conversation active and clear the in-memory history.
    ///
    /// The history arrives later through [`Self::loaded_history`] or through
    /// [`Self::activate`] followed by appended chat messages. Returns `false`
    /// for ids that are not in the index.
    pub fn select_conversation(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            tracing::debug!(conversation_id = id, "Cannot select unknown conversation");
            return false;
        }
        self.active_id = Some(id.to_string());
        self.history.clear();
        self.load = HistoryLoad::Requested;
        true
    }

    /// Make `id` active as announced by the backend.
    ///
    /// Unknown ids are inserted at the front with `summary` (or the
    /// placeholder). The history is cleared when the active id changes or
    /// when this answers a pending request, so anything appended since the
    /// switch is dropped.
    pub fn activate(&mut self, id: &str, summary: Option<String>, placeholder: &str) {
        match self.position(id) {
            Some(pos) => {
                if let Some(summary) = summary {
                    self.index[pos].summary = summary;
                }
            }
            None => self.index.insert(
                0,
                ConversationSummary::new(id, summary.unwrap_or_else(|| placeholder.to_string())),
            ),
        }

        if self.active_id.as_deref() != Some(id) {
            self.active_id = Some(id.to_string());
            self.history.clear();
            self.load = HistoryLoad::Streaming;
        } else if self.load == HistoryLoad::Requested {
            self.history.clear();
            self.load = HistoryLoad::Streaming;
        }
    }

    /// The backend finished streaming a history.
    ///
    /// Returns `false` if no load was in progress.
    pub fn finish_load(&mut self) -> bool {
        let loading = self.load != HistoryLoad::Idle;
        self.load = HistoryLoad::Idle;
        loading
    }

    /// Replace the active history wholesale.
    ///
    /// A history for any conversation other than the active one is a stale
    /// reply to an earlier selection and is discarded. `None` means the
    /// backend did not say which conversation the history belongs to; it is
    /// applied to the active conversation if there is one.
    pub fn loaded_history(&mut self, id: Option<&str>, messages: Vec<Message>) -> bool {
        let Some(active) = self.active_id.as_deref() else {
            tracing::debug!("History received with no active conversation");
            return false;
        };
        if id.is_some_and(|id| id != active) {
            tracing::debug!(
                conversation_id = id,
                active = active,
                "Stale history discarded"
            );
            return false;
        }
        self.history = messages;
        self.load = HistoryLoad::Idle;
        true
    }

    /// Append to the active history.
    ///
    /// Returns `false` (and drops the message) when no conversation is
    /// active.
    pub fn append_message(&mut self, message: Message) -> bool {
        if self.active_id.is_none() {
            tracing::debug!("Message with no active conversation discarded");
            return false;
        }
        self.history.push(message);
        true
    }

    /// Remove a conversation; clears the active state if it was active.
    pub fn delete_conversation(&mut self, id: &str) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        self.index.remove(pos);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
            self.history.clear();
            self.load = HistoryLoad::Idle;
        }
        true
    }

    /// Empty the history if `id` is the active conversation.
    pub fn clear_conversation(&mut self, id: &str) -> bool {
        if self.active_id.as_deref() == Some(id) {
            self.history.clear();
            true
        } else {
            false
        }
    }
}
