//! Browser tools served over the peer channel

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tether_protocol::{ResourceContents, ToolResult};

use crate::context::Context;
use crate::mcp::ToolError;
use crate::registry::{ResourceDescriptor, ToolDescriptor};

pub const CONSOLE_LOGS_TOOL: &str = "browser_get_console_logs";
pub const SCREENSHOT_TOOL: &str = "screenshot";
pub const CONSOLE_LOGS_URI: &str = "console://logs";

const CONSOLE_LOGS_COMMAND: &str = "browser_get_console_logs";
const SCREENSHOT_COMMAND: &str = "browser_screenshot";
const SCREENSHOT_MIME: &str = "image/png";

#[derive(Debug, Default, Deserialize)]
pub struct NoArgs {}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
}

pub fn get_console_logs() -> ToolDescriptor {
    ToolDescriptor::new(
        CONSOLE_LOGS_TOOL,
        "Get the console logs from the browser",
        serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
        handle_get_console_logs,
    )
}

pub fn screenshot() -> ToolDescriptor {
    ToolDescriptor::new(
        SCREENSHOT_TOOL,
        "Take a screenshot of the current page. Supports both viewport and full page capture.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "fullPage": {
                    "type": "boolean",
                    "description": "Whether to capture the full page or just the viewport"
                }
            },
            "additionalProperties": false
        }),
        handle_screenshot,
    )
}

pub fn console_logs_resource() -> ResourceDescriptor {
    ResourceDescriptor::new(CONSOLE_LOGS_URI, "Browser console logs", read_console_logs)
        .with_description("Console output captured by the connected browser")
        .with_mime_type("text/plain")
}

async fn handle_get_console_logs(ctx: Arc<Context>, _args: NoArgs) -> Result<ToolResult, ToolError> {
    let text = fetch_console_logs(&ctx).await?;
    Ok(ToolResult::text(text))
}

async fn handle_screenshot(ctx: Arc<Context>, args: ScreenshotArgs) -> Result<ToolResult, ToolError> {
    let payload =
        serde_json::to_value(&args).map_err(|e| ToolError::handler(e.to_string()))?;
    let reply = ctx.send(SCREENSHOT_COMMAND, payload).await?;

    let serde_json::Value::String(data) = reply else {
        return Err(ToolError::unexpected("a base64 string", &reply));
    };

    let (data, mime_type) = split_data_url(&data);
    Ok(ToolResult::image(data, mime_type))
}

async fn read_console_logs(ctx: Arc<Context>, uri: String) -> Result<Vec<ResourceContents>, ToolError> {
    let text = fetch_console_logs(&ctx).await?;
    Ok(vec![ResourceContents::text(uri, "text/plain", text)])
}

async fn fetch_console_logs(ctx: &Context) -> Result<String, ToolError> {
    let reply = ctx
        .send(CONSOLE_LOGS_COMMAND, serde_json::json!({}))
        .await?;

    match reply {
        serde_json::Value::Array(entries) => Ok(format_console_logs(&entries)),
        other => Err(ToolError::unexpected("an array", &other)),
    }
}

/// One JSON-encoded entry per line
pub fn format_console_logs(entries: &[serde_json::Value]) -> String {
    entries
        .iter()
        .map(|entry| entry.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accept `data:image/...;base64,` URLs as well as raw base64
fn split_data_url(data: &str) -> (String, String) {
    if let Some(rest) = data.strip_prefix("data:") {
        if let Some((header, body)) = rest.split_once(',') {
            if let Some(mime) = header.strip_suffix(";base64") {
                let mime = if mime.is_empty() { SCREENSHOT_MIME } else { mime };
                return (body.to_string(), mime.to_string());
            }
        }
    }
    (data.to_string(), SCREENSHOT_MIME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PeerConnection;
    use serde_json::json;
    use tether_protocol::ToolContent;

    fn attached_context() -> (Arc<Context>, crate::channel::PeerEnd) {
        let ctx = Arc::new(Context::default());
        let (conn, end) = PeerConnection::pair("browser");
        ctx.attach(conn);
        (ctx, end)
    }

    #[test]
    fn test_format_console_logs() {
        let entries = vec![
            json!({"level": "log", "message": "hello"}),
            json!("plain"),
        ];
        assert_eq!(
            format_console_logs(&entries),
            "{\"level\":\"log\",\"message\":\"hello\"}\n\"plain\""
        );
        assert_eq!(format_console_logs(&[]), "");
    }

    #[test]
    fn test_screenshot_args() {
        let args: ScreenshotArgs = serde_json::from_value(json!({"fullPage": true})).unwrap();
        assert_eq!(args.full_page, Some(true));
        assert_eq!(serde_json::to_value(&args).unwrap(), json!({"fullPage": true}));

        let args: ScreenshotArgs = serde_json::from_value(json!({})).unwrap();
        assert_eq!(serde_json::to_value(&args).unwrap(), json!({}));

        assert!(serde_json::from_value::<ScreenshotArgs>(json!({"fullPage": "yes"})).is_err());
    }

    #[test]
    fn test_split_data_url() {
        assert_eq!(
            split_data_url("data:image/jpeg;base64,AAAA"),
            ("AAAA".to_string(), "image/jpeg".to_string())
        );
        assert_eq!(
            split_data_url("iVBORw0KGgo="),
            ("iVBORw0KGgo=".to_string(), "image/png".to_string())
        );
    }

    #[tokio::test]
    async fn test_console_logs_tool() {
        let (ctx, mut end) = attached_context();
        tokio::spawn(async move {
            let cmd = end.recv_command().await.unwrap();
            assert_eq!(cmd.command, "browser_get_console_logs");
            assert_eq!(cmd.payload, json!({}));
            end.reply(json!([{"type": "log", "args": ["a"]}, {"type": "error", "args": ["b"]}]).to_string())
                .await;
            end.closed().await;
        });

        let result = handle_get_console_logs(ctx, NoArgs {}).await.unwrap();
        assert_eq!(
            result.text_content(),
            "{\"args\":[\"a\"],\"type\":\"log\"}\n{\"args\":[\"b\"],\"type\":\"error\"}"
        );
    }

    #[tokio::test]
    async fn test_console_logs_rejects_non_array() {
        let (ctx, mut end) = attached_context();
        tokio::spawn(async move {
            end.recv_command().await.unwrap();
            end.reply(json!({"logs": []}).to_string()).await;
            end.closed().await;
        });

        let err = handle_get_console_logs(ctx, NoArgs {}).await.unwrap_err();
        assert!(matches!(err, ToolError::UnexpectedPayload { expected: "an array", .. }));
    }

    #[tokio::test]
    async fn test_screenshot_tool_forwards_full_page() {
        let (ctx, mut end) = attached_context();
        tokio::spawn(async move {
            let cmd = end.recv_command().await.unwrap();
            assert_eq!(cmd.command, "browser_screenshot");
            assert_eq!(cmd.payload, json!({"fullPage": true}));
            end.reply("iVBORw0KGgo=").await;
            end.closed().await;
        });

        let args = ScreenshotArgs { full_page: Some(true) };
        let result = handle_screenshot(ctx, args).await.unwrap();
        assert_eq!(
            result.content,
            vec![ToolContent::Image {
                data: "iVBORw0KGgo=".into(),
                mime_type: "image/png".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_screenshot_rejects_non_string() {
        let (ctx, mut end) = attached_context();
        tokio::spawn(async move {
            end.recv_command().await.unwrap();
            end.reply("[1, 2, 3]").await;
            end.closed().await;
        });

        let err = handle_screenshot(ctx, ScreenshotArgs::default()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected reply from peer: expected a base64 string, got an array"
        );
    }

    #[tokio::test]
    async fn test_console_logs_resource() {
        let (ctx, mut end) = attached_context();
        tokio::spawn(async move {
            end.recv_command().await.unwrap();
            end.reply(json!(["x"]).to_string()).await;
            end.closed().await;
        });

        let resource = console_logs_resource();
        assert_eq!(resource.schema().mime_type.as_deref(), Some("text/plain"));

        let contents = resource.read(ctx).await.unwrap();
        assert_eq!(contents, vec![ResourceContents::text(CONSOLE_LOGS_URI, "text/plain", "\"x\"")]);
    }

    #[tokio::test]
    async fn test_tools_without_peer() {
        let ctx = Arc::new(Context::default());
        let err = handle_screenshot(ctx, ScreenshotArgs::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::Channel(crate::channel::ChannelError::NoConnection)));
    }
}
