//! Orderly shutdown
//!
//! Components stop in a fixed order: first the MCP server stops taking
//! requests, then the peer acceptor stops taking connections, and finally
//! the command channel drops the peer. Calls still in flight at that point
//! fail with `ChannelClosed` and are answered as tool errors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::context::Context;
use crate::mcp::McpServer;

/// Resolve once `rx` reads `true` or its sender is gone
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Steps of the shutdown sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStage {
    ProtocolServer,
    PeerAcceptor,
    CommandChannel,
}

struct Acceptor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs the shutdown sequence once
pub struct ShutdownCoordinator {
    server: Arc<McpServer>,
    context: Arc<Context>,
    acceptor: Mutex<Option<Acceptor>>,
    done: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(server: Arc<McpServer>, context: Arc<Context>) -> Self {
        Self {
            server,
            context,
            acceptor: Mutex::new(None),
            done: AtomicBool::new(false),
        }
    }

    /// Register the acceptor task and the signal that stops it
    pub fn with_acceptor(self, stop_tx: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        *self.acceptor.lock() = Some(Acceptor { stop_tx, handle });
        self
    }

    /// Run the sequence; later calls are no-ops and return no stages
    pub async fn shutdown(&self) -> Vec<ShutdownStage> {
        if self.done.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed");
            return Vec::new();
        }

        let mut stages = Vec::with_capacity(3);

        info!(stage = ?ShutdownStage::ProtocolServer, "Shutdown: closing MCP server");
        self.server.close();
        stages.push(ShutdownStage::ProtocolServer);

        let acceptor = self.acceptor.lock().take();
        match acceptor {
            Some(Acceptor { stop_tx, handle }) => {
                info!(stage = ?ShutdownStage::PeerAcceptor, "Shutdown: stopping peer acceptor");
                let _ = stop_tx.send(true);
                if let Err(e) = handle.await {
                    error!(error = %e, "Peer acceptor task failed");
                }
            }
            None => debug!("No peer acceptor registered"),
        }
        stages.push(ShutdownStage::PeerAcceptor);

        info!(stage = ?ShutdownStage::CommandChannel, "Shutdown: closing command channel");
        self.context.close();
        stages.push(ShutdownStage::CommandChannel);

        info!("Shutdown complete");
        stages
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, PeerConnection};
    use crate::registry::ToolRegistry;
    use serde_json::json;
    use tether_protocol::ServerInfo;
    use tokio::sync::oneshot;

    fn server_and_context() -> (Arc<McpServer>, Arc<Context>) {
        let context = Arc::new(Context::default());
        let server = Arc::new(McpServer::new(
            Arc::clone(&context),
            Arc::new(ToolRegistry::default()),
            ServerInfo::new("tether-test", "0.0.0"),
        ));
        (server, context)
    }

    #[tokio::test]
    async fn test_wait_for_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_for_shutdown(&mut rx).await;
        });
        tx.send(true).unwrap();
        waiter.await.unwrap();

        // Already set: returns immediately
        let (_tx, mut rx) = watch::channel(true);
        wait_for_shutdown(&mut rx).await;

        // Sender dropped: returns too
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        wait_for_shutdown(&mut rx).await;
    }

    #[tokio::test]
    async fn test_shutdown_order() {
        let (server, context) = server_and_context();

        // The acceptor reports what it saw when told to stop
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (seen_tx, seen_rx) = oneshot::channel();
        let observed_server = Arc::clone(&server);
        let observed_context = Arc::clone(&context);
        let acceptor = tokio::spawn(async move {
            wait_for_shutdown(&mut stop_rx).await;
            let _ = seen_tx.send((observed_server.is_closed(), observed_context.is_closed()));
        });

        let coordinator = ShutdownCoordinator::new(Arc::clone(&server), Arc::clone(&context))
            .with_acceptor(stop_tx, acceptor);

        let stages = coordinator.shutdown().await;
        assert_eq!(
            stages,
            vec![
                ShutdownStage::ProtocolServer,
                ShutdownStage::PeerAcceptor,
                ShutdownStage::CommandChannel,
            ]
        );

        let (server_closed, context_closed) = seen_rx.await.unwrap();
        assert!(server_closed, "server closes before the acceptor stops");
        assert!(!context_closed, "channel closes after the acceptor stops");

        assert!(server.is_closed());
        assert!(context.is_closed());
        assert!(coordinator.is_done());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (server, context) = server_and_context();
        let coordinator = ShutdownCoordinator::new(server, context);

        assert_eq!(coordinator.shutdown().await.len(), 3);
        assert!(coordinator.shutdown().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_fails_in_flight_call() {
        let (server, context) = server_and_context();
        let (conn, mut end) = PeerConnection::pair("peer");
        context.attach(conn);

        let sender = Arc::clone(&context);
        let call = tokio::spawn(async move { sender.send("slow", json!({})).await });
        end.recv_command().await.unwrap();

        ShutdownCoordinator::new(server, Arc::clone(&context))
            .shutdown()
            .await;

        assert!(matches!(call.await.unwrap(), Err(ChannelError::ChannelClosed)));
        assert!(!context.is_attached());
        end.closed().await;
    }
}
