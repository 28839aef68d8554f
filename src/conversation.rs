//! 单次请求的对话记录
//!
//! 由编排器在请求开始时以「系统指令 + 用户消息」播种，请求结束即丢弃，不跨请求保留。
//! 助手的工具调用轮与随后的工具结果轮总是成对追加，保证每个结果都能对应到一次调用。

use serde::{Deserialize, Serialize};

use crate::tools::{ToolInvocationRequest, ToolInvocationResult};

/// 消息角色（与 Chat Completions API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 单条对话轮
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    /// 助手轮上记录的工具调用
    pub tool_call: Option<ToolInvocationRequest>,
    /// 工具轮对应的调用 id
    pub tool_call_id: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// 助手发起工具调用的一轮（无文本内容）
    pub fn assistant_tool_call(call: ToolInvocationRequest) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_call: Some(call),
            tool_call_id: None,
        }
    }

    /// 工具结果轮，content 为结果的文本形式
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_call: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// 一次请求的有序对话
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// 以系统指令与用户消息播种
    pub fn seeded(system_instruction: &str, user_message: &str) -> Self {
        Self {
            messages: vec![Message::system(system_instruction), Message::user(user_message)],
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// 追加一次已执行的工具调用及其结果（成对追加）
    pub fn push_tool_exchange(&mut self, call: ToolInvocationRequest, result: &ToolInvocationResult) {
        let call_id = call.id.clone();
        self.messages.push(Message::assistant_tool_call(call));
        self.messages
            .push(Message::tool_result(call_id, result.to_model_content()));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
