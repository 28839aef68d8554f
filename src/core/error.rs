//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：在请求边界把 AgentError 翻译成对用户可读的回复，内部细节不外泄。

use thiserror::Error;

use crate::auth::AuthError;
use crate::llm::{LlmError, RateLimitInfo};
use crate::tools::ToolError;

/// 编排过程中会传播到请求边界的错误（预期内的工具失败以错误结果的形式留在循环里，不走这里）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool provider error: {0}")]
    Tool(#[from] ToolError),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    /// 缺少必需配置等开发期错误，启动时即失败
    #[error("Config error: {0}")]
    Config(String),

    /// 启动期连接失败（重试耗尽）
    #[error("Startup failed: {0}")]
    Startup(String),
}

/// 恢复引擎根据错误类型给出的回复方式
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 直接返回的固定回复
    Reply(String),
    /// 限流：按 reset 信息生成等待提示
    WaitForRateLimit(RateLimitInfo),
    /// 通用致歉；附带脱敏后的情况描述，可交给 LLM 润色
    Apologize(String),
}
