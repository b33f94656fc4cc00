//! tether-protocol: Wire definitions for the tether bridge
//!
//! Two protocols meet in the bridge:
//! - [`mcp`]: JSON-RPC 2.0 / MCP types spoken to the control-plane client
//! - [`peer`]: the command/reply envelopes exchanged with the downstream peer

pub mod mcp;
pub mod peer;

// Re-export main types at crate root
pub use mcp::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ReadResourceResult,
    Resource, ResourceContents, ResourcesListResult, ServerInfo, Tool, ToolContent, ToolResult,
    ToolsListResult,
};
pub use peer::{PeerCommand, PeerReply};

/// MCP protocol revision announced during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";
