//! Session engine for the agent console.
//!
//! Provides:
//! - `ConnectionManager` - single owned transport with a reconnect state machine
//! - `MessageRouter` - decodes inbound frames and dispatches them to state
//! - `SessionFacade` - composes both into one projection and intent API
//! - `SessionConfig` - runtime configuration

pub mod config;
pub mod facade;
pub mod manager;
pub mod router;

pub use config::SessionConfig;
pub use facade::{SessionClosed, SessionFacade, SessionHandle, Submission};
pub use manager::{ConnectionEvent, ConnectionManager};
pub use router::{MessageRouter, Routed};
