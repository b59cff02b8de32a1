//! Connection manager: one owned transport handle and its reconnect policy.

use std::{sync::Arc, time::Duration};

use agent_console_core::{ConnectionSnapshot, ConnectionState};
use agent_console_transport::{ClientFrame, Connector, Link, TransportError};
use futures::future::BoxFuture;
use tokio::time::Instant;

/// Observable connection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed.
    Open,
    /// One inbound text frame.
    Message(String),
    /// The connection failed or the remote side closed it.
    Close,
    /// A reconnect attempt is scheduled.
    Reconnecting { retry_count: u32 },
    /// A reconnect attempt started.
    Connecting { retry_count: u32 },
}

/// Owns the single transport link and drives the connection state machine:
///
/// `Connecting -> Open -> Closed -> Reconnecting -> Connecting`
///
/// A failed connect goes straight from `Connecting` to `Closed`. Retries run
/// at a flat interval for as long as the manager is connected to a URL.
pub struct ConnectionManager<C: Connector> {
    connector: Arc<C>,
    reconnect_delay: Duration,
    url: Option<String>,
    state: ConnectionState,
    retry_count: u32,
    link: Option<Link>,
    pending: Option<BoxFuture<'static, Result<Link, TransportError>>>,
    retry_at: Option<Instant>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager. Nothing happens until [`Self::connect`].
    #[must_use]
    pub fn new(connector: impl Into<Arc<C>>, reconnect_delay: Duration) -> Self {
        Self {
            connector: connector.into(),
            reconnect_delay,
            url: None,
            state: ConnectionState::Closed,
            retry_count: 0,
            link: None,
            pending: None,
            retry_at: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Open)
    }

    #[must_use]
    pub const fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            retry_count: self.retry_count,
        }
    }

    /// Start connecting to `url`, closing any previous link first.
    ///
    /// Failures never surface here; they show up as [`ConnectionEvent::Close`]
    /// followed by automatic retries.
    pub fn connect(&mut self, url: impl Into<String>) {
        self.teardown();
        self.url = Some(url.into());
        self.retry_count = 0;
        self.begin_connect();
    }

    /// Send a frame. Only valid while open; otherwise a no-op.
    ///
    /// Returns `true` if the frame was handed to the transport.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        let Some(link) = self.link.as_ref().filter(|_| self.is_open()) else {
            tracing::debug!(state = ?self.state, "Dropping frame sent while not open");
            return false;
        };
        let json = match frame.to_json() {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize frame: {e}");
                return false;
            }
        };
        if let Err(e) = link.send(json) {
            // The close is reported by the next event.
            tracing::warn!("Send failed: {e}");
            return false;
        }
        true
    }

    /// Tear the connection down. No events are delivered until the next
    /// [`Self::connect`].
    pub fn close(&mut self) {
        self.teardown();
        self.url = None;
        self.retry_count = 0;
        self.state = ConnectionState::Closed;
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            tracing::info!("Closing connection");
            link.close();
        }
        self.pending = None;
        self.retry_at = None;
    }

    fn begin_connect(&mut self) {
        let Some(url) = self.url.clone() else {
            return;
        };
        tracing::info!(retry_count = self.retry_count, "Connecting to {url}");
        let connector = Arc::clone(&self.connector);
        self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
        self.state = ConnectionState::Connecting;
    }

    /// Advance the state machine and return the next event.
    ///
    /// Cancel-safe: dropping the future before it completes loses no
    /// progress, so it can sit in a `select!` next to other work.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        match self.state {
            ConnectionState::Connecting => {
                let result = match self.pending.as_mut() {
                    Some(pending) => pending.await,
                    None => Err(TransportError::Closed),
                };
                self.pending = None;
                match result {
                    Ok(link) => {
                        tracing::info!("Connection open");
                        self.link = Some(link);
                        self.state = ConnectionState::Open;
                        self.retry_count = 0;
                        ConnectionEvent::Open
                    }
                    Err(e) => {
                        tracing::warn!("Connection attempt failed: {e}");
                        self.state = ConnectionState::Closed;
                        ConnectionEvent::Close
                    }
                }
            }
            ConnectionState::Open => {
                let received = match self.link.as_mut() {
                    Some(link) => link.recv().await,
                    None => None,
                };
                if let Some(text) = received {
                    return ConnectionEvent::Message(text);
                }
                tracing::warn!("Connection closed by remote");
                self.teardown();
                self.state = ConnectionState::Closed;
                ConnectionEvent::Close
            }
            ConnectionState::Closed => {
                if self.url.is_none() {
                    return std::future::pending().await;
                }
                self.retry_count = self.retry_count.saturating_add(1);
                self.retry_at = Some(Instant::now() + self.reconnect_delay);
                self.state = ConnectionState::Reconnecting;
                tracing::info!(
                    "Reconnecting in {}ms (attempt {})",
                    self.reconnect_delay.as_millis(),
                    self.retry_count
                );
                ConnectionEvent::Reconnecting {
                    retry_count: self.retry_count,
                }
            }
            ConnectionState::Reconnecting => {
                let deadline = self.retry_at.unwrap_or_else(Instant::now);
                tokio::time::sleep_until(deadline).await;
                self.retry_at = None;
                self.begin_connect();
                ConnectionEvent::Connecting {
                    retry_count: self.retry_count,
                }
            }
        }
    }
}
