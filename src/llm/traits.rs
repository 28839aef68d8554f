//! Completion Service 客户端抽象
//!
//! 所有后端（OpenAI 兼容 HTTP / 脚本化 Mock）实现 LlmClient：给定对话与可用工具，返回文本和工具调用请求。

use async_trait::async_trait;
use thiserror::Error;

use crate::conversation::Message;
use crate::tools::{ToolDescriptor, ToolInvocationRequest};

/// 一次补全的结果：文本内容 + 按模型给出顺序排列的工具调用请求
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolInvocationRequest>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_call(call: ToolInvocationRequest) -> Self {
        Self {
            content: String::new(),
            tool_calls: vec![call],
        }
    }

    /// 拆出首个工具调用（first listed wins），其余丢弃
    pub fn into_first_call(self) -> (String, Option<ToolInvocationRequest>) {
        let dropped = self.tool_calls.len().saturating_sub(1);
        if dropped > 0 {
            tracing::debug!(dropped, "completion requested several tools, only the first is executed");
        }
        (self.content, self.tool_calls.into_iter().next())
    }
}

/// 限流响应携带的信息（均来自响应头，可能缺失）
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// 重置时间：相对秒数、epoch 秒/毫秒或 HTTP 日期
    pub reset: Option<String>,
    pub quota: Option<u64>,
    pub remaining: Option<u64>,
}

/// Completion Service 调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("rate limited by completion service")]
    RateLimited(RateLimitInfo),

    #[error("completion service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("completion service unreachable: {0}")]
    Network(String),

    #[error("completion service timeout")]
    Timeout,

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

/// LLM 客户端 trait：tools 为空时表示本次不允许调用工具
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Completion, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
