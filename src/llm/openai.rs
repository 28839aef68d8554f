//! OpenAI 兼容 Completion Service 客户端
//!
//! 直接用 reqwest 调用 `{base_url}/chat/completions`（可指向 Ollama、网关代理或 OpenAI），
//! 附带 function tools；429 时解析限流响应头并返回 `LlmError::RateLimited`，不自动重试。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::config::LlmSection;
use crate::conversation::{Message, Role};
use crate::llm::{Completion, LlmClient, LlmError, RateLimitInfo};
use crate::tools::{ToolDescriptor, ToolInvocationRequest};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

const RESET_HEADERS: &[&str] = &[
    "x-rate-limit-reset",
    "x-token-rate-limit-reset",
    "x-ratelimit-reset",
    "x-ratelimit-reset-requests",
    "retry-after",
];
const LIMIT_HEADERS: &[&str] = &[
    "x-rate-limit-limit",
    "x-token-rate-limit-limit",
    "x-ratelimit-limit",
    "x-ratelimit-limit-requests",
];
const REMAINING_HEADERS: &[&str] = &[
    "x-rate-limit-remaining",
    "x-token-rate-limit-remaining",
    "x-ratelimit-remaining",
    "x-ratelimit-remaining-requests",
];

/// OpenAI 兼容客户端：持有共享 reqwest Client、端点、模型名与采样温度
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<&str>,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(format!("failed to build HTTP client: {e}")))?;
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("LLM_API_KEY").ok())
            .filter(|k| !k.is_empty());
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature,
            usage: TokenUsage::new(),
        })
    }

    pub fn from_config(cfg: &LlmSection) -> Result<Self, LlmError> {
        Self::new(
            &cfg.base_url,
            &cfg.model,
            cfg.api_key.as_deref(),
            cfg.temperature,
            cfg.timeout_secs,
        )
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_api_message).collect::<Vec<_>>(),
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolDescriptor::to_function_schema).collect());
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// 对话轮转为 Chat Completions 消息；工具调用参数以 JSON 字符串发送
fn to_api_message(msg: &Message) -> Value {
    let mut out = json!({ "role": msg.role.as_str() });
    match (&msg.role, &msg.tool_call) {
        (Role::Assistant, Some(call)) => {
            out["content"] = Value::Null;
            out["tool_calls"] = json!([{
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": Value::Object(call.arguments.clone()).to_string(),
                }
            }]);
        }
        _ => {
            out["content"] = json!(msg.content.clone().unwrap_or_default());
        }
    }
    if let Some(id) = &msg.tool_call_id {
        out["tool_call_id"] = json!(id);
    }
    out
}

/// 参数可能是 JSON 字符串（OpenAI）或对象（部分 Ollama 版本）；无法解析时视为空参数
fn parse_arguments(raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                tracing::warn!(raw = %s, "tool call arguments are not a JSON object, using empty arguments");
                Map::new()
            }
        },
        _ => Map::new(),
    }
}

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// 从限流响应头提取 reset / quota / remaining；头缺失时尝试 body 中的 retry_after
pub fn rate_limit_info(headers: &HeaderMap, body: &str) -> RateLimitInfo {
    let reset = first_header(headers, RESET_HEADERS).or_else(|| {
        serde_json::from_str::<Value>(body).ok().and_then(|v| {
            let ra = v.get("error").and_then(|e| e.get("retry_after")).or_else(|| v.get("retry_after"))?;
            match ra {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            }
        })
    });
    RateLimitInfo {
        reset,
        quota: first_header(headers, LIMIT_HEADERS).and_then(|s| s.parse().ok()),
        remaining: first_header(headers, REMAINING_HEADERS).and_then(|s| s.parse().ok()),
    }
}

fn parse_completion(data: &Value) -> Result<Completion, LlmError> {
    let message = data
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    let function = tc.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let id = tc
                        .get("id")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{i}"));
                    let arguments = function
                        .get("arguments")
                        .map(parse_arguments)
                        .unwrap_or_default();
                    Some(ToolInvocationRequest::new(id, name, arguments))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion { content, tool_calls })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages, tools);
        tracing::debug!(model = %self.model, url = %url, tools = tools.len(), messages = messages.len(), "calling completion service");

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if status.as_u16() == 429 {
            let info = rate_limit_info(&headers, &text);
            tracing::warn!(reset = ?info.reset, quota = ?info.quota, remaining = ?info.remaining, "completion service rate limited");
            return Err(LlmError::RateLimited(info));
        }
        if !status.is_success() {
            tracing::error!(status = %status, body = %crate::observability::preview(&text, 500), "completion service error");
            return Err(LlmError::Http {
                status: status.as_u16(),
                message: crate::observability::preview(&text, 200),
            });
        }

        let data: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        if let Some(u) = data.get("usage") {
            let prompt = u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
            let completion = u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
            self.usage.add(prompt, completion);
        }
        parse_completion(&data)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
