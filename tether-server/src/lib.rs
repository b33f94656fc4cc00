//! tether-server: MCP bridge to a browser peer
//!
//! Serves MCP over stdio and fulfils each tool call by sending a command to
//! the single connected browser peer and waiting for its reply.
//!
//! - [`channel`]: the single-slot command channel and its peer connections
//! - [`context`]: per-server state shared with every handler
//! - [`registry`]: tool and resource descriptors
//! - [`mcp`]: JSON-RPC dispatch and the stdio transport
//! - [`peer`]: WebSocket acceptor
//! - [`shutdown`]: ordered teardown

pub mod channel;
pub mod config;
pub mod context;
pub mod mcp;
pub mod peer;
pub mod ports;
pub mod registry;
pub mod shutdown;
pub mod tools;

pub use channel::{ChannelError, CommandChannel, PeerConnection};
pub use context::Context;
pub use mcp::{McpError, McpServer, ToolError};
pub use registry::{ResourceDescriptor, ToolDescriptor, ToolRegistry};
pub use shutdown::{ShutdownCoordinator, ShutdownStage};
