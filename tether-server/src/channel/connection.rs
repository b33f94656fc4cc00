//! Physical peer connections as seen by the command channel
//!
//! A [`PeerConnection`] is a pair of frame queues. The WebSocket acceptor
//! adapts a socket into one (see `crate::peer`), and in-process peers use
//! [`PeerConnection::pair`].

use tether_protocol::PeerCommand;
use tokio::sync::mpsc;

/// Frames buffered per direction before senders wait
pub const FRAME_QUEUE_DEPTH: usize = 32;

/// A frame received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// One downstream connection, ready to be attached to a channel
#[derive(Debug)]
pub struct PeerConnection {
    pub(super) label: String,
    pub(super) outbound: mpsc::Sender<String>,
    pub(super) inbound: mpsc::Receiver<PeerFrame>,
}

impl PeerConnection {
    pub fn new(
        label: impl Into<String>,
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<PeerFrame>,
    ) -> Self {
        Self {
            label: label.into(),
            outbound,
            inbound,
        }
    }

    /// Create a connected in-memory pair: the bridge side and the peer side
    pub fn pair(label: impl Into<String>) -> (Self, PeerEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);

        let connection = Self::new(label, outbound_tx, inbound_rx);
        let end = PeerEnd {
            commands: outbound_rx,
            replies: inbound_tx,
        };
        (connection, end)
    }

    /// Human-readable origin of the connection (e.g. the remote address)
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Peer side of an in-memory connection
#[derive(Debug)]
pub struct PeerEnd {
    commands: mpsc::Receiver<String>,
    replies: mpsc::Sender<PeerFrame>,
}

impl PeerEnd {
    /// Next raw command frame, or `None` once the bridge closed the connection
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.commands.recv().await
    }

    /// Next decoded command; undecodable frames are skipped
    pub async fn recv_command(&mut self) -> Option<PeerCommand> {
        loop {
            let frame = self.commands.recv().await?;
            if let Ok(cmd) = serde_json::from_str(&frame) {
                return Some(cmd);
            }
        }
    }

    /// Send a text reply; false if the bridge side is gone
    pub async fn reply(&self, text: impl Into<String>) -> bool {
        self.replies.send(PeerFrame::Text(text.into())).await.is_ok()
    }

    /// Send a binary reply; false if the bridge side is gone
    pub async fn reply_binary(&self, bytes: Vec<u8>) -> bool {
        self.replies.send(PeerFrame::Binary(bytes)).await.is_ok()
    }

    /// Resolves once the bridge has closed its end
    pub async fn closed(&mut self) {
        while self.commands.recv().await.is_some() {}
    }
}
