//! Tool Provider 抽象
//!
//! 编排器只依赖这个 trait：远端 MCP 服务（McpClient）与进程内工具（LocalToolProvider）都实现它。

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{ToolDescriptor, ToolInvocationResult};

/// Tool Provider 传输层错误（HTTP 状态错误与 JSON-RPC 错误不在此列，它们被折叠进错误结果）
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool provider unreachable: {0}")]
    Transport(String),

    #[error("tool provider timeout: {0}")]
    Timeout(String),

    #[error("tool provider protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ToolError::Timeout(e.to_string())
        } else {
            ToolError::Transport(e.to_string())
        }
    }
}

/// 工具提供方：列出工具、按名调用（可附带 Bearer 凭证）、释放会话
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// bearer 为已升级的凭证原文（不含 `Bearer ` 前缀）；None 表示不带凭证调用
    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        bearer: Option<&str>,
    ) -> Result<ToolInvocationResult, ToolError>;

    /// 关闭时释放远端会话，默认无操作
    async fn cleanup(&self) {}
}
