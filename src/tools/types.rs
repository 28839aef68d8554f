//! 工具描述、调用请求与调用结果
//!
//! 与 Tool Provider 的 MCP 数据形状对齐：描述里的参数 schema 可能以 `inputSchema` 或 `parameters` 出现，
//! 结果 payload 通常为 `{"content": [{"type": "text", "text": ...}], "isError": bool}`。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工具描述（名称在单次请求的工具列表内唯一）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema", alias = "inputSchema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Chat Completions 的 function tool 形状
    pub fn to_function_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Completion Service 决定发起的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRequest {
    /// 关联 id，用于把结果轮与调用轮配对
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolInvocationRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 工具调用结果：结构化 payload + 错误标志
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub payload: Value,
    pub is_error: bool,
}

impl ToolInvocationResult {
    fn with_text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            payload: serde_json::json!({
                "content": [{ "type": "text", "text": text.into() }],
                "isError": is_error,
            }),
            is_error,
        }
    }

    /// 成功结果（单个文本块）
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_text(text, false)
    }

    /// 错误结果（单个文本块），会原样回送给 Completion Service
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_text(message, true)
    }

    /// 从 MCP `tools/call` 的 result 构造，错误标志取 `isError`
    pub fn from_payload(payload: Value) -> Self {
        let is_error = payload
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self { payload, is_error }
    }

    /// 拼接所有文本块；没有文本块时返回空串
    pub fn text_content(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            Value::Object(obj) => obj
                .get("content")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// 回送给模型的内容：优先文本，否则整个 payload 的 JSON
    pub fn to_model_content(&self) -> String {
        let text = self.text_content();
        if text.is_empty() {
            self.payload.to_string()
        } else {
            text
        }
    }
}
