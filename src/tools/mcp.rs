//! MCP Tool Provider 客户端（streamable HTTP 传输）
//!
//! JSON-RPC over HTTP POST：`initialize` 取得 `Mcp-Session-Id`，随后 `notifications/initialized`，
//! 之后 `tools/list` / `tools/call` 都带上会话头。回复可能是 `application/json`，也可能是只含一个
//! 事件的 `text/event-stream`，两种都解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};

use super::{ToolDescriptor, ToolError, ToolInvocationResult, ToolProvider};
use crate::config::McpSection;

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION: &str = "2025-03-26";

/// 一次 JSON-RPC 往返的结果：成功 result、JSON-RPC error，或非 2xx 的 HTTP 状态
#[derive(Debug)]
enum RpcReply {
    Result(Value),
    Error { code: i64, message: String },
    Status { status: StatusCode, body: String },
}

/// MCP 客户端：共享 reqwest Client、端点与会话 id
pub struct McpClient {
    client: Client,
    url: String,
    session_id: Option<String>,
    next_id: AtomicU64,
}

impl McpClient {
    /// 建立会话；失败时按 connect_retries / retry_interval_secs 重试，耗尽后返回最后一次错误
    pub async fn connect(cfg: &McpSection) -> Result<Self, ToolError> {
        let attempts = cfg.connect_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::try_connect(&cfg.url, cfg.timeout_secs).await {
                Ok(client) => {
                    tracing::info!(url = %cfg.url, session = ?client.session_id, "connected to MCP server");
                    return Ok(client);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        url = %cfg.url,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "failed to connect to MCP server, retrying in {}s",
                        cfg.retry_interval_secs
                    );
                    tokio::time::sleep(Duration::from_secs(cfg.retry_interval_secs)).await;
                }
                Err(e) => {
                    tracing::error!(url = %cfg.url, attempts, error = %e, "giving up connecting to MCP server");
                    return Err(e);
                }
            }
        }
    }

    async fn try_connect(url: &str, timeout_secs: u64) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let mut this = Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            session_id: None,
            next_id: AtomicU64::new(1),
        };

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "concierge", "version": env!("CARGO_PKG_VERSION") }
        });
        let (reply, headers) = this.post_rpc("initialize", params, None).await?;
        match reply {
            RpcReply::Result(_) => {}
            RpcReply::Error { code, message } => {
                return Err(ToolError::Protocol(format!("initialize failed ({code}): {message}")))
            }
            RpcReply::Status { status, .. } => {
                return Err(ToolError::Protocol(format!("initialize returned HTTP {status}")))
            }
        }
        this.session_id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        this.notify("notifications/initialized").await?;
        Ok(this)
    }

    fn request(&self, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream");
        if let Some(id) = &self.session_id {
            req = req.header(SESSION_HEADER, id);
        }
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn notify(&self, method: &str) -> Result<(), ToolError> {
        let resp = self
            .request(None)
            .json(&json!({ "jsonrpc": "2.0", "method": method }))
            .send()
            .await?;
        if !resp.status().is_success() {
            tracing::warn!(method, status = %resp.status(), "MCP notification not accepted");
        }
        Ok(())
    }

    async fn post_rpc(
        &self,
        method: &str,
        params: Value,
        bearer: Option<&str>,
    ) -> Result<(RpcReply, HeaderMap), ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp = self.request(bearer).json(&body).send().await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let is_sse = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let text = resp.text().await?;

        if !status.is_success() {
            return Ok((RpcReply::Status { status, body: text }, headers));
        }

        let message = if is_sse {
            sse_message(&text, id)
        } else {
            serde_json::from_str::<Value>(&text).ok()
        }
        .ok_or_else(|| {
            ToolError::Protocol(format!(
                "unparsable {method} response: {}",
                crate::observability::preview(&text, 200)
            ))
        })?;

        if let Some(err) = message.get("error") {
            let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Ok((RpcReply::Error { code, message }, headers));
        }
        let result = message.get("result").cloned().unwrap_or(Value::Null);
        Ok((RpcReply::Result(result), headers))
    }
}

/// 从 SSE 正文中取出与请求 id 对应的 JSON-RPC 消息（没有 id 匹配时取最后一个可解析的）
fn sse_message(body: &str, id: u64) -> Option<Value> {
    let mut last = None;
    for event in body.split("\n\n") {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        if data.is_empty() {
            continue;
        }
        if let Ok(v) = serde_json::from_str::<Value>(&data.join("\n")) {
            if v.get("id").and_then(Value::as_u64) == Some(id) {
                return Some(v);
            }
            last = Some(v);
        }
    }
    last
}

#[async_trait]
impl ToolProvider for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        let (reply, _) = self.post_rpc("tools/list", json!({}), None).await?;
        let result = match reply {
            RpcReply::Result(v) => v,
            RpcReply::Error { code, message } => {
                return Err(ToolError::Protocol(format!("tools/list failed ({code}): {message}")))
            }
            RpcReply::Status { status, .. } => {
                return Err(ToolError::Protocol(format!("tools/list returned HTTP {status}")))
            }
        };
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
        let tools: Vec<ToolDescriptor> = serde_json::from_value(tools)
            .map_err(|e| ToolError::Protocol(format!("invalid tools/list result: {e}")))?;
        tracing::debug!(count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        bearer: Option<&str>,
    ) -> Result<ToolInvocationResult, ToolError> {
        let params = json!({ "name": name, "arguments": arguments });
        let (reply, headers) = self.post_rpc("tools/call", params, bearer).await?;
        if let Some(req_id) = headers.get("x-gravitee-request-id").and_then(|v| v.to_str().ok()) {
            tracing::debug!(tool = %name, gateway_request_id = %req_id, "tool call routed through gateway");
        }
        let result = match reply {
            RpcReply::Result(v) => ToolInvocationResult::from_payload(v),
            RpcReply::Error { code, message } => {
                tracing::warn!(tool = %name, code, "MCP tool call returned JSON-RPC error");
                ToolInvocationResult::error(format!("MCP error {code}: {message}"))
            }
            RpcReply::Status { status, body } => {
                tracing::warn!(tool = %name, status = %status, "MCP tool call returned HTTP error");
                let detail = crate::observability::preview(body.trim(), 300);
                ToolInvocationResult::error(format!("HTTP {}: {}", status.as_u16(), detail))
            }
        };
        Ok(result)
    }

    async fn cleanup(&self) {
        let Some(id) = &self.session_id else {
            return;
        };
        match self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, id)
            .send()
            .await
        {
            Ok(resp) => tracing::info!(status = %resp.status(), "MCP session closed"),
            Err(e) => tracing::warn!(error = %e, "failed to close MCP session"),
        }
    }
}
