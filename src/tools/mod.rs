//! 工具层：工具数据类型、Tool Provider 抽象、MCP 客户端与进程内工具

pub mod exchange_rate;
pub mod executor;
pub mod local;
pub mod mcp;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod types;

pub use exchange_rate::ExchangeRateTool;
pub use executor::ToolExecutor;
pub use local::LocalToolProvider;
pub use mcp::McpClient;
pub use provider::{ToolError, ToolProvider};
pub use registry::{Tool, ToolRegistry};
pub use types::{ToolDescriptor, ToolInvocationRequest, ToolInvocationResult};
