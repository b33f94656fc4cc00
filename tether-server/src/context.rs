//! Shared handler context
//!
//! One [`Context`] exists per server instance and is handed to every tool
//! and resource handler. It owns the command channel, so handlers reach the
//! peer only through [`Context::send`] and never hold a connection themselves.

use std::time::Duration;

use crate::channel::{ChannelError, CommandChannel, PeerConnection};

pub struct Context {
    channel: CommandChannel,
}

impl Context {
    pub fn new(response_timeout: Option<Duration>) -> Self {
        Self {
            channel: CommandChannel::new(response_timeout),
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Make `connection` the current peer, closing any previous one
    pub fn attach(&self, connection: PeerConnection) {
        self.channel.attach(connection);
    }

    pub fn is_attached(&self) -> bool {
        self.channel.is_attached()
    }

    /// Send a command to the peer and wait for its reply
    pub async fn send(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ChannelError> {
        self.channel.send(command, args).await
    }

    /// Close the peer connection for good
    pub fn close(&self) {
        self.channel.close();
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_context_delegates_to_channel() {
        let ctx = Context::new(Some(Duration::from_secs(5)));
        assert!(!ctx.is_attached());
        assert_eq!(ctx.channel().response_timeout(), Some(Duration::from_secs(5)));

        let (conn, mut end) = PeerConnection::pair("peer");
        ctx.attach(conn);
        assert!(ctx.is_attached());

        tokio::spawn(async move {
            let cmd = end.recv_command().await.unwrap();
            end.reply(cmd.payload.to_string()).await;
            end.closed().await;
        });

        let reply = ctx.send("echo", json!({"text": "hi"})).await.unwrap();
        assert_eq!(reply, json!({"text": "hi"}));

        ctx.close();
        assert!(!ctx.is_attached());
        assert!(ctx.is_closed());
    }

    #[tokio::test]
    async fn test_default_context_has_no_timeout() {
        let ctx = Context::default();
        assert_eq!(ctx.channel().response_timeout(), None);
        assert!(matches!(
            ctx.send("x", json!({})).await,
            Err(ChannelError::NoConnection)
        ));
    }
}
