//! Transport seam between the connection manager and concrete transports.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Link closed")]
    Closed,
}

/// One open duplex connection carrying text frames.
///
/// Dropping the link (or calling [`Link::close`]) closes the outbound side;
/// the transport task then shuts the underlying connection down. Nothing is
/// received after that.
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl Link {
    /// Build a link from a transport task's channel ends.
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// In-memory link and the peer end that plays the backend.
    #[must_use]
    pub fn pair() -> (Self, LinkPeer) {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let link = Self::new(client_tx, server_rx);
        let peer = LinkPeer {
            to_client: server_tx,
            from_client: client_rx,
        };
        (link, peer)
    }

    /// Queue a text frame.
    ///
    /// # Errors
    /// Returns error if the transport task has gone away.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Receive the next text frame. `None` once the remote side closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Close the link.
    pub fn close(self) {
        drop(self);
    }
}

/// Backend side of an in-memory [`Link`].
pub struct LinkPeer {
    /// Sender for frames delivered to the client.
    pub to_client: mpsc::UnboundedSender<String>,
    /// Receiver for frames the client sent.
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl LinkPeer {
    /// Deliver a JSON frame to the client.
    ///
    /// # Errors
    /// Returns error if the client side was dropped.
    pub fn send_json(&self, frame: &serde_json::Value) -> Result<(), TransportError> {
        self.to_client
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    /// Deliver a raw text frame to the client.
    ///
    /// # Errors
    /// Returns error if the client side was dropped.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(text.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Next frame the client sent, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }
}

/// Opens links to a backend URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new link.
    async fn connect(&self, url: &str) -> Result<Link, TransportError>;
}

/// Connector that opens in-memory links.
///
/// The backend end of every accepted link is handed to the receiver returned
/// by [`ChannelConnector::new`].
pub struct ChannelConnector {
    peers: mpsc::UnboundedSender<LinkPeer>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
}

impl ChannelConnector {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        };
        (connector, peer_rx)
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, url: &str) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect(format!("{url}: connection refused")));
        }

        let (link, peer) = Link::pair();
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect(format!("{url}: no backend listening")))?;
        Ok(link)
    }
}
