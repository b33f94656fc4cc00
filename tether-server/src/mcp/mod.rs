//! MCP protocol surface
//!
//! The dispatch server answering JSON-RPC requests from the control-plane
//! client, and the errors it reports.

mod codec;
mod error;
pub mod server;

pub use error::{McpError, ToolError};
pub use server::McpServer;
