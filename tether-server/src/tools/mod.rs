//! Built-in tools and resources

pub mod browser;

use crate::mcp::McpError;
use crate::registry::{ResourceDescriptor, ToolDescriptor, ToolRegistry};

pub fn browser_tools() -> Vec<ToolDescriptor> {
    vec![browser::get_console_logs(), browser::screenshot()]
}

pub fn browser_resources() -> Vec<ResourceDescriptor> {
    vec![browser::console_logs_resource()]
}

/// Registry with every built-in tool and resource
pub fn default_registry() -> Result<ToolRegistry, McpError> {
    ToolRegistry::new(browser_tools(), browser_resources())
}
