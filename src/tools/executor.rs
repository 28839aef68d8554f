//! 工具执行器与审计日志
//!
//! 持有 ToolRegistry 与全局超时；超时或失败都折叠为错误结果（不抛出），
//! 每次调用输出结构化审计日志（JSON）。编排器调用远端工具与 peer 时复用同一审计格式。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use super::{ToolInvocationResult, ToolRegistry};

/// 输出一条工具审计记录（参数只保留预览，不含凭证）
pub fn audit(tool: &str, outcome: &str, ok: bool, started: Instant, args: &Value) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "outcome": outcome,
        "duration_ms": started.elapsed().as_millis() as u64,
        "args_preview": crate::observability::preview(&args.to_string(), 200),
    });
    tracing::info!(audit = %audit, "tool");
}

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；工具返回 Err 或超时都变成错误结果
    pub async fn execute(&self, tool_name: &str, args: Value) -> ToolInvocationResult {
        let start = Instant::now();
        let result = timeout(self.timeout, self.registry.execute(tool_name, args.clone())).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        audit(tool_name, outcome, ok, start, &args);

        match result {
            Ok(Ok(content)) => ToolInvocationResult::text(content),
            Ok(Err(e)) => ToolInvocationResult::error(e),
            Err(_) => ToolInvocationResult::error(format!(
                "Tool {tool_name} timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}
