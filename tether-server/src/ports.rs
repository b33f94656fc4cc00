//! Port availability probe

use tether_utils::{Result, TetherError};
use tokio::net::TcpListener;
use tracing::debug;

/// Whether `host:port` cannot be bound right now
///
/// Binds a listener and releases it immediately. Any bind failure counts
/// as "in use".
pub async fn is_port_in_use(host: &str, port: u16) -> bool {
    match TcpListener::bind((host, port)).await {
        Ok(listener) => {
            drop(listener);
            false
        }
        Err(e) => {
            debug!(host = %host, port, error = %e, "Port probe failed to bind");
            true
        }
    }
}

/// Fail with `PortInUse` if `host:port` is taken
pub async fn ensure_port_free(host: &str, port: u16) -> Result<()> {
    if is_port_in_use(host, port).await {
        return Err(TetherError::PortInUse { port });
    }
    Ok(())
}
