//! Core state model for the agent console session engine.
//!
//! This crate provides the transport-free building blocks:
//! - `Message`, `Role`, `ConversationSummary` - conversation domain types
//! - `ConversationStore` - conversation index and active history
//! - `ExecutionSession` - one outstanding execution and its streamed output
//! - `Projection` / `ProjectionPublisher` - immutable snapshots for presentation

pub mod conversation;
pub mod execution;
pub mod projection;
pub mod store;

pub use conversation::{ConversationId, ConversationSummary, Message, Role};
pub use execution::{
    COMPLETION_SENTINEL, ExecutionError, ExecutionPhase, ExecutionSession, PlotFigure, PlotPayload,
};
pub use projection::{ConnectionSnapshot, ConnectionState, Projection, ProjectionPublisher};
pub use store::{ConversationStore, IndexOrder};
