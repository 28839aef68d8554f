//! Peer-Agent 注册表
//!
//! 启动时按配置顺序发现 peer（拉取 Agent Card），之后只读共享：按名查找、按技能关键词查找、
//! 发送单条文本消息。发现失败只记日志，不影响其它 peer。

use std::time::Duration;

use futures_util::future::join_all;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use super::types::{
    result_text, AgentCard, AgentSkill, JsonRpcRequest, JsonRpcResponse, AGENT_CARD_PATH,
};

/// 委托给 peer 时的错误；编排器会把它折叠成错误结果回送模型
#[derive(Error, Debug)]
pub enum DelegationError {
    #[error("peer agent unreachable: {0}")]
    Transport(String),

    #[error("peer agent returned HTTP {0}")]
    Http(u16),

    #[error("peer agent error: {0}")]
    Remote(String),

    #[error("malformed peer response: {0}")]
    Malformed(String),

    #[error("peer registry has been shut down")]
    Closed,
}

/// 已发现的 peer agent
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteAgent {
    pub name: String,
    pub description: String,
    pub version: String,
    /// Agent Card 中公布的地址（仅记录）
    pub url: String,
    /// 发现时使用的基地址，消息发往这里
    pub endpoint: String,
    pub skills: Vec<AgentSkill>,
}

impl RemoteAgent {
    fn from_card(card: AgentCard, endpoint: &str) -> Self {
        Self {
            name: card.name,
            description: card.description,
            version: card.version,
            url: card.url,
            endpoint: endpoint.to_string(),
            skills: card.skills,
        }
    }

    /// 任一关键词（大小写不敏感）出现在某个技能的名称、描述或标签里
    pub fn has_skill_matching(&self, keywords: &[&str]) -> bool {
        self.skills.iter().any(|skill| {
            let searchable = format!(
                "{} {} {}",
                skill.name,
                skill.description,
                skill.tags.join(" ")
            )
            .to_lowercase();
            keywords
                .iter()
                .any(|k| !k.is_empty() && searchable.contains(&k.to_lowercase()))
        })
    }

    pub fn skill_descriptions(&self) -> String {
        if self.skills.is_empty() {
            return "  - No skills available".to_string();
        }
        self.skills
            .iter()
            .map(|s| {
                let tags = if s.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", s.tags.join(", "))
                };
                format!("  - {}: {}{}", s.name, s.description, tags)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 注册表：按注册顺序保存 peer，名称冲突时后发现者原位替换
pub struct PeerRegistry {
    client: Option<Client>,
    agents: Vec<RemoteAgent>,
}

impl PeerRegistry {
    pub fn new(timeout_secs: u64) -> Result<Self, DelegationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DelegationError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client: Some(client),
            agents: Vec::new(),
        })
    }

    async fn fetch_card(client: &Client, base: &str) -> Result<AgentCard, DelegationError> {
        let url = format!("{}{}", base.trim_end_matches('/'), AGENT_CARD_PATH);
        let resp = client
            .get(&url)
            .send()
            .await
            .map_err(|e| DelegationError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DelegationError::Http(resp.status().as_u16()));
        }
        let card: AgentCard = resp
            .json()
            .await
            .map_err(|e| DelegationError::Malformed(e.to_string()))?;
        if card.name.trim().is_empty() {
            return Err(DelegationError::Malformed("agent card has no name".to_string()));
        }
        Ok(card)
    }

    /// 注册（或按名替换）一个 peer
    pub fn register(&mut self, agent: RemoteAgent) -> &RemoteAgent {
        tracing::info!(
            agent = %agent.name,
            version = %agent.version,
            url = %agent.url,
            skills = agent.skills.len(),
            "peer agent registered"
        );
        let idx = match self.agents.iter().position(|a| a.name == agent.name) {
            Some(i) => {
                tracing::warn!(agent = %agent.name, "duplicate peer name, replacing earlier registration");
                self.agents[i] = agent;
                i
            }
            None => {
                self.agents.push(agent);
                self.agents.len() - 1
            }
        };
        &self.agents[idx]
    }

    /// 发现单个 peer；任何网络或解析失败记日志并返回 None
    pub async fn discover(&mut self, base: &str) -> Option<&RemoteAgent> {
        let client = self.client.clone()?;
        match Self::fetch_card(&client, base).await {
            Ok(card) => Some(self.register(RemoteAgent::from_card(card, base))),
            Err(e) => {
                tracing::warn!(base = %base, error = %e, "peer discovery failed");
                None
            }
        }
    }

    /// 并发拉取所有 Agent Card，按配置顺序注册；返回成功数
    pub async fn discover_all(&mut self, bases: &[String]) -> usize {
        let Some(client) = self.client.clone() else {
            return 0;
        };
        let cards = join_all(bases.iter().map(|b| {
            let client = client.clone();
            async move { Self::fetch_card(&client, b).await }
        }))
        .await;

        let mut registered = 0;
        for (base, card) in bases.iter().zip(cards) {
            match card {
                Ok(card) => {
                    self.register(RemoteAgent::from_card(card, base));
                    registered += 1;
                }
                Err(e) => tracing::warn!(base = %base, error = %e, "peer discovery failed"),
            }
        }
        tracing::info!(registered, configured = bases.len(), "peer discovery finished");
        registered
    }

    pub fn find_by_name(&self, name: &str) -> Option<&RemoteAgent> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// 注册顺序中第一个技能匹配任一关键词的 peer
    pub fn find_by_skill(&self, keywords: &[&str]) -> Option<&RemoteAgent> {
        self.agents.iter().find(|a| a.has_skill_matching(keywords))
    }

    pub fn agents(&self) -> &[RemoteAgent] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// 所有 peer 及其技能的文字列表（用于委托工具描述）
    pub fn skills_description(&self) -> String {
        self.agents
            .iter()
            .map(|a| {
                format!(
                    "• Agent: {}\n  Description: {}\n  Skills:\n{}",
                    a.name,
                    a.description,
                    a.skill_descriptions()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 发送一条文本消息（JSON-RPC `message/send`），返回回复中的第一段文本
    pub async fn send(&self, agent: &RemoteAgent, text: &str) -> Result<String, DelegationError> {
        let client = self.client.as_ref().ok_or(DelegationError::Closed)?;
        let request = JsonRpcRequest::message_send(text)
            .map_err(|e| DelegationError::Malformed(e.to_string()))?;
        tracing::info!(
            agent = %agent.name,
            message = %crate::observability::preview(text, 100),
            "delegating to peer agent"
        );

        let resp = client
            .post(&agent.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| DelegationError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(DelegationError::Http(resp.status().as_u16()));
        }
        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| DelegationError::Malformed(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(DelegationError::Remote(err.message));
        }
        let result = body.result.unwrap_or(Value::Null);
        result_text(&result)
            .ok_or_else(|| DelegationError::Malformed("no text in peer response".to_string()))
    }

    /// 清空 peer 并释放共享 HTTP 客户端
    pub fn cleanup(&mut self) {
        self.agents.clear();
        self.client = None;
    }
}
