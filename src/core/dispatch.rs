//! 单次请求的封闭分派表
//!
//! 请求开始时由 Tool Provider 的工具列表与（可选的）委托工具一次性构建；
//! 模型返回的工具名只会被解析成三种情况之一，不做任何反射式查找。

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::a2a::PeerRegistry;
use crate::tools::schema::{parameters_schema, restrict_to_enum};
use crate::tools::ToolDescriptor;

pub const DELEGATE_TOOL_NAME: &str = "delegate_to_agent";

/// 委托工具参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// Name of the agent to delegate to.
    pub agent_name: String,
    /// The message to send to the agent, with all details it needs.
    pub message: String,
}

/// 工具名解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Provider,
    Delegate,
    Unknown,
}

pub struct DispatchTable {
    descriptors: Vec<ToolDescriptor>,
    provider_names: HashSet<String>,
    delegate: bool,
}

impl DispatchTable {
    /// provider 工具按名去重（先到先得）；有 peer 时追加委托工具
    pub fn build(provider_tools: Vec<ToolDescriptor>, peers: Option<&PeerRegistry>) -> Self {
        let mut provider_names = HashSet::new();
        let mut descriptors = Vec::with_capacity(provider_tools.len() + 1);
        for tool in provider_tools {
            if provider_names.insert(tool.name.clone()) {
                descriptors.push(tool);
            } else {
                tracing::warn!(tool = %tool.name, "duplicate tool name from provider, ignoring");
            }
        }

        let mut delegate = false;
        if let Some(peers) = peers.filter(|p| !p.is_empty()) {
            if provider_names.contains(DELEGATE_TOOL_NAME) {
                tracing::warn!("provider already exposes {DELEGATE_TOOL_NAME}, peer delegation disabled");
            } else {
                descriptors.push(delegate_descriptor(peers));
                delegate = true;
            }
        }

        Self {
            descriptors,
            provider_names,
            delegate,
        }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn resolve(&self, name: &str) -> Dispatch {
        if self.delegate && name == DELEGATE_TOOL_NAME {
            Dispatch::Delegate
        } else if self.provider_names.contains(name) {
            Dispatch::Provider
        } else {
            Dispatch::Unknown
        }
    }
}

/// 委托工具描述：列出每个 peer 及其技能，agent_name 限定为已发现的名称
fn delegate_descriptor(peers: &PeerRegistry) -> ToolDescriptor {
    let mut schema = parameters_schema::<DelegateArgs>();
    restrict_to_enum(&mut schema, "agent_name", &peers.names());
    let description = format!(
        "Delegate a request to an external agent discovered via the A2A protocol. \
         Use this when the user asks for something outside hotel bookings that one of these agents can handle.\n\n\
         Available agents:\n{}",
        peers.skills_description()
    );
    ToolDescriptor::new(DELEGATE_TOOL_NAME, description, schema)
}
