//! Tool and resource dispatch table
//!
//! Descriptors pair the schema advertised to the client with the handler
//! that serves it. A tool descriptor validates raw JSON arguments into the
//! handler's typed argument struct before anything touches the peer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use tether_protocol::{Resource, ResourceContents, Tool, ToolResult};

use crate::context::Context;
use crate::mcp::{McpError, ToolError};

pub type ToolFuture = BoxFuture<'static, Result<ToolResult, ToolError>>;

/// A tool call whose arguments have already been validated
pub type BoundCall = Box<dyn FnOnce(Arc<Context>) -> ToolFuture + Send>;

pub type ResourceFuture = BoxFuture<'static, Result<Vec<ResourceContents>, ToolError>>;

type Binder = Arc<dyn Fn(serde_json::Value) -> Result<BoundCall, ToolError> + Send + Sync>;
type Reader = Arc<dyn Fn(Arc<Context>, String) -> ResourceFuture + Send + Sync>;

/// A registered tool
pub struct ToolDescriptor {
    schema: Tool,
    binder: Binder,
}

impl ToolDescriptor {
    /// Create a descriptor whose handler takes arguments of type `A`
    ///
    /// Missing or `null` arguments are treated as an empty object.
    pub fn new<A, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(Arc<Context>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder = Arc::new(move |raw: serde_json::Value| -> Result<BoundCall, ToolError> {
            let raw = if raw.is_null() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                raw
            };
            let args: A =
                serde_json::from_value(raw).map_err(|e| ToolError::Validation(e.to_string()))?;

            let handler = Arc::clone(&handler);
            let call: BoundCall = Box::new(move |ctx: Arc<Context>| (*handler)(ctx, args).boxed());
            Ok(call)
        });

        Self {
            schema: Tool {
                name: name.into(),
                description: description.into(),
                input_schema,
            },
            binder,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Tool {
        &self.schema
    }

    /// Validate `args` and produce a call ready to run
    pub fn bind(&self, args: serde_json::Value) -> Result<BoundCall, ToolError> {
        (self.binder)(args)
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.schema.name)
            .finish_non_exhaustive()
    }
}

/// A registered resource
pub struct ResourceDescriptor {
    schema: Resource,
    reader: Reader,
}

impl ResourceDescriptor {
    pub fn new<F, Fut>(uri: impl Into<String>, name: impl Into<String>, reader: F) -> Self
    where
        F: Fn(Arc<Context>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceContents>, ToolError>> + Send + 'static,
    {
        Self {
            schema: Resource {
                uri: uri.into(),
                name: name.into(),
                description: None,
                mime_type: None,
            },
            reader: Arc::new(move |ctx: Arc<Context>, uri: String| reader(ctx, uri).boxed()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.schema.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.schema.mime_type = Some(mime_type.into());
        self
    }

    pub fn uri(&self) -> &str {
        &self.schema.uri
    }

    pub fn schema(&self) -> &Resource {
        &self.schema
    }

    pub fn read(&self, ctx: Arc<Context>) -> ResourceFuture {
        (self.reader)(ctx, self.schema.uri.clone())
    }
}

impl std::fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("uri", &self.schema.uri)
            .finish_non_exhaustive()
    }
}

/// Immutable registry of tools and resources
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    tool_index: HashMap<String, usize>,
    resources: Vec<ResourceDescriptor>,
    resource_index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build a registry; names and uris must be unique
    pub fn new(
        tools: Vec<ToolDescriptor>,
        resources: Vec<ResourceDescriptor>,
    ) -> Result<Self, McpError> {
        let mut tool_index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if tool_index.insert(tool.name().to_string(), i).is_some() {
                return Err(McpError::DuplicateTool(tool.name().to_string()));
            }
        }

        let mut resource_index = HashMap::with_capacity(resources.len());
        for (i, resource) in resources.iter().enumerate() {
            if resource_index.insert(resource.uri().to_string(), i).is_some() {
                return Err(McpError::DuplicateResource(resource.uri().to_string()));
            }
        }

        Ok(Self {
            tools,
            tool_index,
            resources,
            resource_index,
        })
    }

    /// Tool schemas in registration order
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.schema().clone()).collect()
    }

    /// Resource schemas in registration order
    pub fn list_resources(&self) -> Vec<Resource> {
        self.resources.iter().map(|r| r.schema().clone()).collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tool_index.get(name).map(|&i| &self.tools[i])
    }

    pub fn find_resource(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.resource_index.get(uri).map(|&i| &self.resources[i])
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
