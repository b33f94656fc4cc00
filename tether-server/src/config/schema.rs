//! Configuration schema structs

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub peer: PeerConfig,
    pub channel: ChannelConfig,
    pub shutdown: ShutdownConfig,
}

/// Identity reported to the MCP client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tether".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Where the browser peer connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
}

impl PeerConfig {
    /// `host:port` for binding; IPv6 literals are bracketed
    pub fn addr(&self) -> String {
        match self.host.parse::<Ipv6Addr>() {
            Ok(ip) => SocketAddr::from((ip, self.port)).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9009,
        }
    }
}

/// Command channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Seconds to wait for a peer reply (0 = no timeout)
    pub response_timeout_secs: u64,
}

impl ChannelConfig {
    pub fn response_timeout(&self) -> Option<Duration> {
        match self.response_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: 30,
        }
    }
}

/// Shutdown settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub drain_timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.name, "tether");
        assert_eq!(config.server.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.peer.addr(), "127.0.0.1:9009");
        assert_eq!(config.channel.response_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.shutdown.drain_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_peer_addr() {
        assert_eq!(PeerConfig::default().addr(), "127.0.0.1:9009");

        let v6 = PeerConfig {
            host: "::1".into(),
            port: 9009,
        };
        assert_eq!(v6.addr(), "[::1]:9009");
        assert!(v6.addr().parse::<SocketAddr>().is_ok());

        let named = PeerConfig {
            host: "localhost".into(),
            port: 80,
        };
        assert_eq!(named.addr(), "localhost:80");
    }

    #[test]
    fn test_zero_timeout_disables() {
        let channel = ChannelConfig {
            response_timeout_secs: 0,
        };
        assert_eq!(channel.response_timeout(), None);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: AppConfig = toml::from_str("[peer]\nport = 9100\n").unwrap();
        assert_eq!(config.peer.port, 9100);
        assert_eq!(config.peer.host, "127.0.0.1");
        assert_eq!(config.channel, ChannelConfig::default());
    }
}
