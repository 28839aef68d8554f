//! 核心编排层：错误与恢复、分派表、主控循环、优雅关闭

pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;

pub use dispatch::{Dispatch, DispatchTable, DELEGATE_TOOL_NAME};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
