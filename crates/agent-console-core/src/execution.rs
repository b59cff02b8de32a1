//! Lifecycle of one outstanding execute/generate request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::conversation::{ConversationId, Message};

/// Reserved chunk value that ends a streamed execution.
pub const COMPLETION_SENTINEL: &str = "EXECUTION_COMPLETE";

/// Execution phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    #[default]
    Idle,
    Executing,
}

/// Execution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("an execution is already running")]
    Busy,
    #[error("not connected to the backend")]
    NotConnected,
    #[error("{0}")]
    Backend(String),
    #[error("connection lost during execution")]
    ConnectionLost,
    #[error("{0}")]
    Http(String),
}

impl ExecutionError {
    /// Rejections leave the running execution untouched.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Busy | Self::NotConnected)
    }

    /// Text shown inline in place of execution output.
    #[must_use]
    pub fn as_output(&self) -> String {
        format!("Error: {self}")
    }
}

/// Plot payload forwarded untouched to presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotPayload {
    raw: String,
}

/// Decoded plot figure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlotFigure {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub layout: Value,
    #[serde(default)]
    pub config: Value,
}

impl PlotPayload {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The payload exactly as the backend sent it.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decode the `data`/`layout`/`config` figure.
    ///
    /// # Errors
    /// Returns error if the payload is not a JSON object.
    pub fn figure(&self) -> Result<PlotFigure, serde_json::Error> {
        serde_json::from_str(&self.raw)
    }
}

/// Tracks one outstanding execution, including streamed output.
///
/// At most one execution runs at a time. The buffer only grows while
/// executing and is cleared when the next execution starts.
#[derive(Debug, Default)]
pub struct ExecutionSession {
    phase: ExecutionPhase,
    buffer: String,
    output: Option<String>,
    generated_code: Option<String>,
    plot: Option<PlotPayload>,
    error: Option<ExecutionError>,
    rejected: bool,
    /// Conversation the last execution was submitted in.
    target: Option<ConversationId>,
}

impl ExecutionSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_executing(&self) -> bool {
        matches!(self.phase, ExecutionPhase::Executing)
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub fn generated_code(&self) -> Option<&str> {
        self.generated_code.as_deref()
    }

    #[must_use]
    pub const fn plot(&self) -> Option<&PlotPayload> {
        self.plot.as_ref()
    }

    #[must_use]
    pub const fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    /// Conversation the current (or last) execution was submitted in.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Whether the last submission was refused.
    #[must_use]
    pub const fn rejected(&self) -> bool {
        self.rejected
    }

    /// Output to display: the error if the execution failed, the final
    /// output if one arrived, otherwise the streamed buffer.
    #[must_use]
    pub fn output(&self) -> String {
        if let Some(err) = &self.error {
            return err.as_output();
        }
        self.output.clone().unwrap_or_else(|| self.buffer.clone())
    }

    /// Begin a new execution outside any conversation.
    ///
    /// # Errors
    /// Returns [`ExecutionError::Busy`] while another execution is running.
    pub fn start(&mut self) -> Result<(), ExecutionError> {
        self.start_in(None)
    }

    /// Begin a new execution submitted in `target`.
    ///
    /// # Errors
    /// Returns [`ExecutionError::Busy`] while another execution is running;
    /// the running execution is left untouched.
    pub fn start_in(&mut self, target: Option<ConversationId>) -> Result<(), ExecutionError> {
        if self.is_executing() {
            self.rejected = true;
            return Err(ExecutionError::Busy);
        }
        self.buffer.clear();
        self.output = None;
        self.generated_code = None;
        self.plot = None;
        self.error = None;
        self.rejected = false;
        self.target = target;
        self.phase = ExecutionPhase::Executing;
        Ok(())
    }

    /// Record a submission refused before it reached the backend.
    pub fn reject(&mut self, err: &ExecutionError) {
        tracing::debug!("Submission rejected: {err}");
        self.rejected = true;
    }

    /// Append a streamed chunk, or complete on the sentinel.
    ///
    /// Returns `true` if the chunk completed the execution.
    pub fn on_chunk(&mut self, text: &str) -> bool {
        if !self.is_executing() {
            tracing::debug!("Chunk received while idle; discarded");
            return false;
        }
        if text == COMPLETION_SENTINEL {
            self.phase = ExecutionPhase::Idle;
            return true;
        }
        self.buffer.push_str(text);
        false
    }

    /// Apply a terminal result frame.
    ///
    /// Returns the assistant message for the target conversation, or `None`
    /// if no execution was running (the result is discarded).
    pub fn on_result(&mut self, output: String, generated_code: Option<String>) -> Option<Message> {
        if !self.is_executing() {
            tracing::debug!("Result received while idle; discarded");
            return None;
        }
        self.phase = ExecutionPhase::Idle;
        self.rejected = false;
        self.generated_code = generated_code;
        let message = Message::assistant(output.clone()).collapsible();
        self.output = Some(output);
        Some(message)
    }

    /// Store a plot payload for presentation.
    pub fn on_plot(&mut self, plot: PlotPayload) {
        self.plot = Some(plot);
    }

    /// End the execution without a result frame.
    pub fn finish(&mut self) {
        self.phase = ExecutionPhase::Idle;
    }

    /// End the execution with an error.
    pub fn fail(&mut self, err: ExecutionError) {
        tracing::warn!("Execution failed: {err}");
        self.phase = ExecutionPhase::Idle;
        self.error = Some(err);
    }

    /// The transport closed. A running execution can no longer complete.
    ///
    /// Returns `true` if an execution was aborted.
    pub fn on_disconnect(&mut self) -> bool {
        if self.is_executing() {
            self.fail(ExecutionError::ConnectionLost);
            true
        } else {
            false
        }
    }
}
