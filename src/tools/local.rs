//! 进程内 Tool Provider：把 ToolExecutor 暴露为 ToolProvider
//!
//! 本地工具不需要凭证，bearer 参数被忽略。

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ToolDescriptor, ToolError, ToolExecutor, ToolInvocationResult, ToolProvider};

pub struct LocalToolProvider {
    executor: ToolExecutor,
}

impl LocalToolProvider {
    pub fn new(executor: ToolExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.executor.registry().descriptors())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        _bearer: Option<&str>,
    ) -> Result<ToolInvocationResult, ToolError> {
        Ok(self
            .executor
            .execute(name, Value::Object(arguments.clone()))
            .await)
    }
}
