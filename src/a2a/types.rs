//! A2A 协议数据类型（Agent Card、消息、JSON-RPC 信封）
//!
//! 只覆盖本系统用到的字段；未知字段一律忽略，缺失字段取默认值，以兼容不同版本的 peer。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const AGENT_CARD_PATH: &str = "/.well-known/agent-card.json";
pub const PROTOCOL_VERSION: &str = "0.3.0";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
    #[serde(default)]
    pub state_transition_history: bool,
}

/// Agent Card：名称、描述、版本、公布地址与技能列表
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub preferred_transport: String,
}

/// 消息片段；只关心文本，兼容 `kind` 与旧版 `type` 字段
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default = "message_kind")]
    pub kind: String,
}

fn message_kind() -> String {
    "message".to_string()
}

impl A2aMessage {
    fn new(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part::text(text)],
            message_id: Uuid::new_v4().to_string(),
            kind: message_kind(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new("agent", text)
    }

    /// 第一个非空文本片段
    pub fn first_text(&self) -> Option<&str> {
        first_text(&self.parts)
    }
}

pub fn first_text(parts: &[Part]) -> Option<&str> {
    parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .find(|t| !t.trim().is_empty())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: A2aMessage,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Value::String(Uuid::new_v4().to_string()),
            method: method.to_string(),
            params,
        }
    }

    /// 只含一条用户文本的 `message/send` 请求
    pub fn message_send(text: &str) -> Result<Self, serde_json::Error> {
        let params = serde_json::to_value(MessageSendParams {
            message: A2aMessage::user(text),
        })?;
        Ok(Self::new("message/send", params))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

pub const INVALID_PARAMS: i64 = -32602;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const PARSE_ERROR: i64 = -32700;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// 从 `message/send` 的 result 中取回复文本：Message 的片段，或 Task 的状态消息 / artifacts
pub fn result_text(result: &Value) -> Option<String> {
    let from_parts = |v: &Value| -> Option<String> {
        let parts: Vec<Part> = serde_json::from_value(v.get("parts")?.clone()).ok()?;
        first_text(&parts).map(String::from)
    };

    if let Some(text) = from_parts(result) {
        return Some(text);
    }
    if let Some(text) = result
        .get("status")
        .and_then(|s| s.get("message"))
        .and_then(from_parts)
    {
        return Some(text);
    }
    result
        .get("artifacts")
        .and_then(Value::as_array)
        .and_then(|arts| arts.iter().find_map(from_parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_send_request_shape() {
        let req = serde_json::to_value(JsonRpcRequest::message_send("hi").unwrap()).unwrap();
        assert_eq!(req["jsonrpc"], "2.0");
        assert_eq!(req["method"], "message/send");
        assert_eq!(req["params"]["message"]["role"], "user");
        assert_eq!(req["params"]["message"]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_card_tolerates_missing_fields() {
        let card: AgentCard = serde_json::from_value(json!({
            "name": "Currency Agent",
            "skills": [{"name": "convert_currency", "tags": ["currency"]}],
            "somethingNew": 1
        }))
        .unwrap();
        assert_eq!(card.name, "Currency Agent");
        assert_eq!(card.skills[0].tags, vec!["currency"]);
        assert!(card.version.is_empty());
    }

    #[test]
    fn test_result_text_from_message_and_task() {
        let message = json!({"kind": "message", "role": "agent", "parts": [{"kind": "text", "text": "100 EUR = 108 USD"}]});
        assert_eq!(result_text(&message).as_deref(), Some("100 EUR = 108 USD"));

        let task = json!({"kind": "task", "status": {"state": "completed", "message": {"role": "agent", "parts": [{"kind": "text", "text": "done"}]}}});
        assert_eq!(result_text(&task).as_deref(), Some("done"));

        let artifacts = json!({"kind": "task", "status": {"state": "completed"}, "artifacts": [{"parts": [{"kind": "text", "text": "from artifact"}]}]});
        assert_eq!(result_text(&artifacts).as_deref(), Some("from artifact"));

        assert_eq!(result_text(&json!({"kind": "task"})), None);
    }

    #[test]
    fn test_user_message_shape() {
        let v = serde_json::to_value(A2aMessage::user("hi")).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["kind"], "message");
        assert_eq!(v["parts"][0]["kind"], "text");
        assert!(!v["messageId"].as_str().unwrap().is_empty());
    }
}
