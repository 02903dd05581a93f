//! Model Context Protocol server exposing `get_page`.
//!
//! Newline-delimited JSON-RPC 2.0 on stdin/stdout, one message per line. Requests are
//! answered in arrival order; notifications get no reply.

use pagescout_browser::{BrowserService, GetPage};
use pagescout_conversion::ConversionRegistry;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct GetPageArgs {
    url: String,
    wait_time: Option<u64>,
    format: Option<String>,
}

type RpcError = (i64, String);

fn response(id: Value, result: std::result::Result<Value, RpcError>) -> Value {
    match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }),
    }
}

/// A tool result the client shows to the model; failures are reported in-band.
fn tool_text(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

#[derive(Clone)]
pub struct McpServer {
    browser: Arc<dyn BrowserService>,
    conversions: ConversionRegistry,
    default_wait_time_ms: u64,
    page_timeout: Duration,
}

impl McpServer {
    pub fn new(
        browser: Arc<dyn BrowserService>,
        conversions: ConversionRegistry,
        default_wait_time_ms: u64,
        page_timeout: Duration,
    ) -> Self {
        Self {
            browser,
            conversions,
            default_wait_time_ms,
            page_timeout,
        }
    }

    fn tools(&self) -> Value {
        json!({ "tools": [{
            "name": "get_page",
            "description": "Fetch a web page",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Page to retrieve" },
                    "wait_time": {
                        "type": "integer",
                        "minimum": 0,
                        "description": format!("Settle time after load in milliseconds (default {})", self.default_wait_time_ms),
                    },
                    "format": {
                        "type": "string",
                        "enum": self.conversions.names(),
                        "description": "Conversion applied to the page content",
                    },
                },
                "required": ["url"],
            },
        }]})
    }

    async fn get_page(&self, args: GetPageArgs) -> Value {
        let conversion = match args.format.as_deref() {
            None | Some("") => None,
            Some(name) => match self.conversions.get(name) {
                Some(service) => Some(service),
                None => return tool_text(format!("unknown format: {}", name), true),
            },
        };
        let wait_time = args.wait_time.unwrap_or(self.default_wait_time_ms);

        info!(url = %args.url, wait_time, format = ?args.format, "MCP get_page");
        let request = GetPage { url: args.url.clone(), wait_time };
        let page = match tokio::time::timeout(self.page_timeout, self.browser.get_page(request)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                error!(url = %args.url, error = %e, "Page retrieval failed");
                return tool_text(e.to_string(), true);
            }
            Err(_) => {
                return tool_text(
                    format!("page retrieval timed out after {}s", self.page_timeout.as_secs()),
                    true,
                )
            }
        };
        let page = match conversion {
            Some(service) => match service.convert(page) {
                Ok(page) => page,
                Err(e) => return tool_text(e.to_string(), true),
            },
            None => page,
        };

        match serde_json::to_string(&page) {
            Ok(text) => tool_text(text, false),
            Err(e) => tool_text(e.to_string(), true),
        }
    }

    async fn call_tool(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        if name != "get_page" {
            return Err((INVALID_PARAMS, format!("unknown tool: {}", name)));
        }
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let args: GetPageArgs = serde_json::from_value(arguments)
            .map_err(|e| (INVALID_PARAMS, format!("invalid get_page arguments: {}", e)))?;
        if args.url.trim().is_empty() {
            return Err((INVALID_PARAMS, "missing 'url' argument".to_string()));
        }
        Ok(self.get_page(args).await)
    }

    /// Answer one inbound line. `None` for notifications.
    pub async fn handle(&self, line: &str) -> Option<Value> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => return Some(response(Value::Null, Err((PARSE_ERROR, e.to_string())))),
        };
        let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = raw.get("id").cloned().unwrap_or(Value::Null);
                return Some(response(id, Err((INVALID_REQUEST, e.to_string()))));
            }
        };
        let Some(id) = request.id else {
            debug!(method = %request.method, "MCP notification");
            return None;
        };

        debug!(method = %request.method, "MCP request");
        let result = match request.method.as_str() {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "pagescout", "version": env!("CARGO_PKG_VERSION") },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools()),
            "tools/call" => self.call_tool(&request.params).await,
            other => Err((METHOD_NOT_FOUND, format!("method not found: {}", other))),
        };
        Some(response(id, result))
    }

    /// Serve until `reader` reaches end of input.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = self.handle(&line).await {
                let mut out = serde_json::to_string(&reply)?;
                out.push('\n');
                writer.write_all(out.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let rules = super::load_rules(&config)?;
    let rule_count = rules.len();
    let browser = super::connect_browser(&config, rules).await?;

    let server = McpServer::new(
        Arc::new(browser),
        ConversionRegistry::with_defaults()?,
        config.server.default_wait_time_ms,
        Duration::from_secs(config.server.page_timeout_secs),
    );

    info!(rules = rule_count, "MCP server ready on stdio");
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    warn!("MCP client closed stdin, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::stub::StubBrowser;

    fn server(browser: Arc<StubBrowser>) -> McpServer {
        McpServer::new(
            browser,
            ConversionRegistry::with_defaults().unwrap(),
            1000,
            Duration::from_secs(5),
        )
    }

    async fn call(server: &McpServer, arguments: Value) -> Value {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": { "name": "get_page", "arguments": arguments },
        });
        server.handle(&request.to_string()).await.unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list_tools() {
        let server = server(Arc::new(StubBrowser::default()));

        let init = server
            .handle(r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#)
            .await
            .unwrap();
        assert_eq!(init["id"], 1);
        assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(init["result"]["capabilities"]["tools"].is_object());

        assert!(server
            .handle(r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#)
            .await
            .is_none());

        let list = server
            .handle(r#"{"jsonrpc": "2.0", "id": "two", "method": "tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(list["id"], "two");
        let tool = &list["result"]["tools"][0];
        assert_eq!(tool["name"], "get_page");
        assert_eq!(tool["inputSchema"]["required"], json!(["url"]));
        assert!(tool["inputSchema"]["properties"]["format"]["enum"]
            .as_array()
            .unwrap()
            .contains(&json!("markdown")));
    }

    #[tokio::test]
    async fn test_get_page_defaults_wait_time() {
        let browser = Arc::new(StubBrowser::default());
        let reply = call(&server(browser.clone()), json!({"url": "https://example.com/"})).await;

        assert_eq!(reply["result"]["isError"], false);
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let page: Value = serde_json::from_str(text).unwrap();
        assert_eq!(page["title"], "Example");
        assert_eq!(page["url"], "https://example.com/");
        assert_eq!(browser.requests.lock().unwrap()[0], ("https://example.com/".to_string(), 1000));
    }

    #[tokio::test]
    async fn test_get_page_with_markdown_format() {
        let browser = Arc::new(StubBrowser::default());
        let reply = call(
            &server(browser.clone()),
            json!({"url": "https://example.com/", "wait_time": 250, "format": "markdown"}),
        )
        .await;

        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let page: Value = serde_json::from_str(text).unwrap();
        assert!(page["content"].as_str().unwrap().contains("[A](https://example.com/a)"));
        assert_eq!(browser.requests.lock().unwrap()[0].1, 250);
    }

    #[tokio::test]
    async fn test_tool_failures_are_in_band() {
        let browser = Arc::new(StubBrowser { fail: true, ..Default::default() });
        let reply = call(&server(browser), json!({"url": "https://example.com/"})).await;
        assert_eq!(reply["result"]["isError"], true);
        assert!(reply["result"]["content"][0]["text"].as_str().unwrap().contains("navigation failed"));

        let browser = Arc::new(StubBrowser::default());
        let reply = call(&server(browser.clone()), json!({"url": "https://example.com/", "format": "pdf"})).await;
        assert_eq!(reply["result"]["isError"], true);
        assert_eq!(reply["result"]["content"][0]["text"], "unknown format: pdf");
        assert!(browser.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let browser = Arc::new(StubBrowser::default());
        let server = server(browser.clone());

        let reply = call(&server, json!({"wait_time": 10})).await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = call(&server, json!({"url": "  "})).await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = server
            .handle(r#"{"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "screenshot"}}"#)
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = server
            .handle(r#"{"jsonrpc": "2.0", "id": 4, "method": "resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        let reply = server.handle("{not json").await.unwrap();
        assert_eq!(reply["error"]["code"], PARSE_ERROR);
        assert_eq!(reply["id"], Value::Null);

        assert!(browser.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_serve_answers_line_by_line() {
        let server = server(Arc::new(StubBrowser::default()));
        let input = concat!(
            r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#,
            "\n",
            r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "get_page", "arguments": {"url": "https://example.com/"}}}"#,
            "\n",
        );
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["result"]["isError"], false);
    }
}
