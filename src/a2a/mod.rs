//! A2A（agent-to-agent）协议：数据类型、peer 注册表与服务端路由

pub mod registry;
pub mod server;
pub mod types;

pub use registry::{DelegationError, PeerRegistry, RemoteAgent};
pub use server::{create_router, A2aState};
pub use types::{AgentCapabilities, AgentCard, AgentSkill, A2aMessage, Part};
