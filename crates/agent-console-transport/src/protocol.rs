//! Wire protocol for client-backend communication.
//!
//! Outbound frames are a tagged enum. Inbound frames come in several legacy
//! shapes (payload at the top level or nested under `data`, two spellings of
//! most discriminators); [`InboundFrame::decode`] normalizes all of them onto
//! one canonical enum.

use agent_console_core::{ConversationId, ConversationSummary, Message, PlotPayload};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Frame is not a JSON object")]
    NotAnObject,
    #[error("Unknown frame type: {0}")]
    UnknownType(String),
    #[error("Unknown meta action: {0}")]
    UnknownAction(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ProtocolError {
    /// Unknown discriminators are expected from newer backends.
    #[must_use]
    pub const fn is_unknown_discriminator(&self) -> bool {
        matches!(self, Self::UnknownType(_) | Self::UnknownAction(_))
    }
}

/// Meta actions the client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaAction {
    NewConversation,
    GetConversations,
    LoadConversation,
}

/// Frame from client to backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Run instructions or code.
    Execute {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },
    /// Send a chat turn.
    Message {
        message: String,
        conversation_id: ConversationId,
    },
    /// Conversation bookkeeping.
    Meta {
        action: MetaAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },
}

impl ClientFrame {
    #[must_use]
    pub fn execute_instructions(
        instructions: impl Into<String>,
        conversation_id: Option<ConversationId>,
    ) -> Self {
        Self::Execute {
            instructions: Some(instructions.into()),
            code: None,
            conversation_id,
        }
    }

    #[must_use]
    pub fn execute_code(code: impl Into<String>, conversation_id: Option<ConversationId>) -> Self {
        Self::Execute {
            instructions: None,
            code: Some(code.into()),
            conversation_id,
        }
    }

    #[must_use]
    pub fn chat(message: impl Into<String>, conversation_id: impl Into<ConversationId>) -> Self {
        Self::Message {
            message: message.into(),
            conversation_id: conversation_id.into(),
        }
    }

    #[must_use]
    pub const fn new_conversation() -> Self {
        Self::Meta {
            action: MetaAction::NewConversation,
            conversation_id: None,
        }
    }

    #[must_use]
    pub const fn get_conversations() -> Self {
        Self::Meta {
            action: MetaAction::GetConversations,
            conversation_id: None,
        }
    }

    #[must_use]
    pub fn load_conversation(conversation_id: impl Into<ConversationId>) -> Self {
        Self::Meta {
            action: MetaAction::LoadConversation,
            conversation_id: Some(conversation_id.into()),
        }
    }

    /// Serialize to the JSON text sent on the wire.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Canonical frame from backend to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Streamed output chunk; may be the completion sentinel.
    Chunk(String),
    /// Terminal execution result.
    Result {
        output: String,
        generated_code: Option<String>,
    },
    /// Error-shaped result.
    ExecutionFailed(String),
    /// Plot payload, untouched.
    Plot(PlotPayload),
    /// Chat message for the active conversation.
    ChatMessage(Message),
    /// Full conversation index, in backend order.
    Conversations(Vec<ConversationSummary>),
    /// Backend names the active conversation.
    ConversationInfo {
        id: ConversationId,
        summary: Option<String>,
    },
    /// Backend created a conversation.
    NewConversation {
        id: ConversationId,
        summary: Option<String>,
    },
    /// Full history of a conversation.
    LoadedHistory {
        id: Option<ConversationId>,
        messages: Vec<Message>,
    },
    /// End of a streamed history load.
    HistoryComplete,
    /// Summary update.
    Summary {
        id: ConversationId,
        summary: String,
    },
    /// Conversation removed.
    DeleteConversation { id: ConversationId },
    /// Conversation history cleared.
    ClearConversation { id: ConversationId },
}

impl InboundFrame {
    /// Short name for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chunk(_) => "chunk",
            Self::Result { .. } => "result",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::Plot(_) => "plotly",
            Self::ChatMessage(_) => "chat_message",
            Self::Conversations(_) => "conversations",
            Self::ConversationInfo { .. } => "conversation_info",
            Self::NewConversation { .. } => "new_conversation",
            Self::LoadedHistory { .. } => "loaded_conversation",
            Self::HistoryComplete => "conversation_loaded",
            Self::Summary { .. } => "conversation_summary",
            Self::DeleteConversation { .. } => "delete_conversation",
            Self::ClearConversation { .. } => "clear_conversation",
        }
    }

    /// Decode a raw text frame.
    ///
    /// # Errors
    /// Returns error for malformed JSON, unknown discriminators, and frames
    /// missing required fields.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(obj) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let fields = Fields::new(&obj);

        let frame_type = match obj.get("type") {
            None => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                return Err(ProtocolError::InvalidField {
                    field: "type",
                    reason: "expected a string".into(),
                });
            }
        };

        match frame_type {
            None | Some("output" | "stream") => Ok(Self::Chunk(fields.string("output")?)),
            Some("result") => {
                if let Some(error) = fields.opt_string("error")? {
                    return Ok(Self::ExecutionFailed(error));
                }
                Ok(Self::Result {
                    output: fields.string("output")?,
                    generated_code: fields.opt_string("generated_code")?,
                })
            }
            Some("error") => Ok(Self::ExecutionFailed(
                fields.first_string(&["message", "error"])?,
            )),
            Some("plotly") => Ok(Self::Plot(fields.plot_data()?)),
            Some("chat_message" | "message") => Ok(Self::ChatMessage(fields.parse("message")?)),
            Some("conversation_id") => Ok(Self::ConversationInfo {
                id: fields.first_string(&["conversation_id", "id"])?,
                summary: fields.opt_string("summary")?,
            }),
            Some("loaded_conversation") => fields.loaded_history(),
            Some("conversation_summary") => fields.summary(),
            Some("meta") => Self::decode_meta(&fields),
            Some(other) => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    fn decode_meta(fields: &Fields<'_>) -> Result<Self, ProtocolError> {
        let action = fields
            .top
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingField("action"))?;

        match action {
            "conversations" => {
                let data = fields
                    .top
                    .get("data")
                    .cloned()
                    .ok_or(ProtocolError::MissingField("data"))?;
                let list = serde_json::from_value(data).map_err(|e| ProtocolError::InvalidField {
                    field: "data",
                    reason: e.to_string(),
                })?;
                Ok(Self::Conversations(list))
            }
            "conversation_info" => Ok(Self::ConversationInfo {
                id: fields.first_string(&["id", "conversation_id"])?,
                summary: fields.opt_string("summary")?,
            }),
            "new_conversation" => Ok(Self::NewConversation {
                id: fields.first_string(&["conversation_id", "id"])?,
                summary: fields.opt_string("summary")?,
            }),
            "loaded_conversation" => fields.loaded_history(),
            "conversation_loaded" => Ok(Self::HistoryComplete),
            "conversation_summary" => fields.summary(),
            "delete_conversation" => Ok(Self::DeleteConversation {
                id: fields.first_string(&["id", "conversation_id"])?,
            }),
            "clear_conversation" => Ok(Self::ClearConversation {
                id: fields.first_string(&["id", "conversation_id"])?,
            }),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// Stored history entries are either bare messages or the chat frame that
/// carried them.
#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryEntry {
    Wrapped { message: Message },
    Bare(Message),
}

impl From<HistoryEntry> for Message {
    fn from(entry: HistoryEntry) -> Self {
        match entry {
            HistoryEntry::Wrapped { message } | HistoryEntry::Bare(message) => message,
        }
    }
}

/// Field lookup over the top-level object, falling back to a nested `data`
/// object.
struct Fields<'a> {
    top: &'a Map<String, Value>,
    nested: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn new(top: &'a Map<String, Value>) -> Self {
        Self {
            top,
            nested: top.get("data").and_then(Value::as_object),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.top
            .get(name)
            .or_else(|| self.nested.and_then(|data| data.get(name)))
            .filter(|v| !v.is_null())
    }

    fn opt_string(&self, name: &'static str) -> Result<Option<String>, ProtocolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ProtocolError::InvalidField {
                field: name,
                reason: "expected a string".into(),
            }),
        }
    }

    fn string(&self, name: &'static str) -> Result<String, ProtocolError> {
        self.opt_string(name)?
            .ok_or(ProtocolError::MissingField(name))
    }

    fn first_string(&self, names: &[&'static str]) -> Result<String, ProtocolError> {
        for name in names {
            if let Some(value) = self.opt_string(name)? {
                return Ok(value);
            }
        }
        Err(ProtocolError::MissingField(names[0]))
    }

    fn parse<T: DeserializeOwned>(&self, name: &'static str) -> Result<T, ProtocolError> {
        let value = self.get(name).ok_or(ProtocolError::MissingField(name))?;
        T::deserialize(value).map_err(|e| ProtocolError::InvalidField {
            field: name,
            reason: e.to_string(),
        })
    }

    fn plot_data(&self) -> Result<PlotPayload, ProtocolError> {
        match self.get("plot_data") {
            Some(Value::String(raw)) => Ok(PlotPayload::new(raw.clone())),
            Some(obj @ Value::Object(_)) => Ok(PlotPayload::new(obj.to_string())),
            Some(_) => Err(ProtocolError::InvalidField {
                field: "plot_data",
                reason: "expected a JSON string or object".into(),
            }),
            None => Err(ProtocolError::MissingField("plot_data")),
        }
    }

    fn loaded_history(&self) -> Result<InboundFrame, ProtocolError> {
        let entries: Vec<HistoryEntry> = if self.get("history").is_some() {
            self.parse("history")?
        } else {
            self.parse("messages")?
        };
        Ok(InboundFrame::LoadedHistory {
            id: self.opt_string("conversation_id")?.or(self.opt_string("id")?),
            messages: entries.into_iter().map(Message::from).collect(),
        })
    }

    fn summary(&self) -> Result<InboundFrame, ProtocolError> {
        Ok(InboundFrame::Summary {
            id: self.first_string(&["id", "conversation_id"])?,
            summary: self.string("summary")?,
        })
    }
}
