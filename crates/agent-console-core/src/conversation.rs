//! Conversation domain types.

use serde::{Deserialize, Deserializer, Serialize};

/// Conversation identifier.
///
/// Server-assigned ids are opaque strings; client-assigned ids are UUID v4.
pub type ConversationId = String;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person driving the console.
    #[serde(alias = "user")]
    Human,
    /// The agent backend.
    Assistant,
    /// Backend bookkeeping such as execution results and summaries.
    System,
}

/// One chat message. Never mutated once appended to a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub collapsible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            collapsible: false,
            details: None,
        }
    }

    #[must_use]
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Mark the message as collapsible in presentation.
    #[must_use]
    pub const fn collapsible(mut self) -> Self {
        self.collapsible = true;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Entry of the conversation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "conversation_id")]
    pub id: ConversationId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub summary: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ConversationSummary {
    #[must_use]
    pub fn new(id: impl Into<ConversationId>, summary: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
        }
    }
}
