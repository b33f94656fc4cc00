//! WebSocket acceptor for the browser peer
//!
//! Every accepted socket is upgraded, wrapped into a [`PeerConnection`] and
//! attached to the context, which makes it the current peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_utils::{Result, TetherError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::channel::{PeerConnection, PeerFrame, FRAME_QUEUE_DEPTH};
use crate::context::Context;
use crate::shutdown::wait_for_shutdown;

/// Time allowed for the WebSocket upgrade
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct PeerListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PeerListener {
    /// Bind the listening socket
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| TetherError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Peer listener bound");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept peers until `shutdown_rx` turns true
    ///
    /// Handshake failures are logged and never stop the loop.
    pub async fn run(self, context: Arc<Context>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut handshakes = JoinSet::new();

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping peer listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(peer = %peer_addr, "New TCP connection");
                        let ctx = Arc::clone(&context);
                        handshakes.spawn(async move {
                            upgrade(stream, peer_addr, ctx).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Peer accept error");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = handshakes.join_next(), if !handshakes.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Handshake task failed");
                    }
                }
            }
        }

        handshakes.abort_all();
        info!(addr = %self.local_addr, "Peer listener stopped");
    }
}

async fn upgrade(stream: tokio::net::TcpStream, peer_addr: SocketAddr, context: Arc<Context>) {
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream)).await {
        Ok(Ok(ws)) => {
            info!(peer = %peer_addr, "Browser peer connected");
            context.attach(websocket_connection(ws, peer_addr.to_string()));
        }
        Ok(Err(e)) => {
            warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
        }
        Err(_) => {
            warn!(peer = %peer_addr, timeout = ?HANDSHAKE_TIMEOUT, "WebSocket handshake timed out");
        }
    }
}

/// Adapt a WebSocket into a [`PeerConnection`]
///
/// A pump task moves frames between the socket and the connection queues.
/// It ends when either side closes, and the socket is closed with it.
pub fn websocket_connection<S>(ws: WebSocketStream<S>, label: impl Into<String>) -> PeerConnection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let label = label.into();
    let (outbound_tx, outbound_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);

    tokio::spawn(pump(ws, label.clone(), outbound_rx, inbound_tx));
    PeerConnection::new(label, outbound_tx, inbound_rx)
}

async fn pump<S>(
    ws: WebSocketStream<S>,
    label: String,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<PeerFrame>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(peer = %label, error = %e, "Failed to write to peer");
                        break;
                    }
                }
                None => {
                    debug!(peer = %label, "Connection released, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(PeerFrame::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if inbound_tx.send(PeerFrame::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(peer = %label, "Peer closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(peer = %label, error = %e, "Peer socket error");
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
}
