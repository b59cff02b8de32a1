//! Transport layer for the agent console session engine.
//!
//! Provides:
//! - Wire protocol (canonical frames + legacy shape normalization)
//! - `Connector` / `Link` transport seam
//! - WebSocket client transport (feature: websocket)
//! - HTTP execute fallback (feature: http)

pub mod link;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "http")]
pub mod http;

pub use link::{ChannelConnector, Connector, Link, LinkPeer, TransportError};
pub use protocol::{ClientFrame, InboundFrame, MetaAction, ProtocolError};
