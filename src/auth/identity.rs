//! Identity Provider 客户端
//!
//! OIDC 发现、userinfo、token introspection、client_credentials 换 token，以及策略决策调用。

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AuthError;
use crate::config::{AuthSection, IdentitySource};

/// 从发现文档得到的端点
#[derive(Clone, Debug, Default, Deserialize)]
pub struct OidcEndpoints {
    pub userinfo_endpoint: Option<String>,
    pub introspection_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
}

/// introspection 响应（RFC 7662），未知字段忽略
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Introspection {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub scope: Option<String>,
    pub sub: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub client_id: Option<String>,
    pub exp: Option<i64>,
}

impl Introspection {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().any(|granted| granted == scope))
            .unwrap_or(false)
    }

    /// email > username > sub
    pub fn subject(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or(self.username.as_deref())
            .or(self.sub.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicyEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PolicyAction {
    pub name: String,
}

/// AuthZen 风格的策略决策请求
#[derive(Clone, Debug, Serialize)]
pub struct PolicyRequest {
    pub subject: PolicyEntity,
    pub resource: PolicyEntity,
    pub action: PolicyAction,
}

impl PolicyRequest {
    pub fn new(subject: &str, resource_type: &str, resource_id: &str, action: &str) -> Self {
        Self {
            subject: PolicyEntity {
                kind: "user".to_string(),
                id: subject.to_string(),
            },
            resource: PolicyEntity {
                kind: resource_type.to_string(),
                id: resource_id.to_string(),
            },
            action: PolicyAction {
                name: action.to_string(),
            },
        }
    }
}

/// Identity Provider 客户端：持有共享 reqwest Client 与已发现的端点
pub struct IdentityClient {
    client: Client,
    endpoints: OidcEndpoints,
    client_id: String,
    client_secret: String,
    source: IdentitySource,
}

impl IdentityClient {
    pub fn new(
        endpoints: OidcEndpoints,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        source: IdentitySource,
        timeout_secs: u64,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AuthError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoints,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            source,
        })
    }

    /// 拉取 OIDC 发现文档；显式配置的 token_url 优先于发现结果
    pub async fn discover(
        cfg: &AuthSection,
        client_id: String,
        client_secret: String,
    ) -> Result<Self, AuthError> {
        let mut this = Self::new(
            OidcEndpoints::default(),
            client_id,
            client_secret,
            cfg.identity_source,
            cfg.timeout_secs,
        )?;
        tracing::debug!(url = %cfg.oidc_discovery_url, "discovering OIDC configuration");
        let resp = this.client.get(&cfg.oidc_discovery_url).send().await?;
        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!(
                "discovery returned HTTP {}",
                resp.status()
            )));
        }
        let mut endpoints: OidcEndpoints = resp
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid discovery document: {e}")))?;
        if let Some(token_url) = &cfg.token_url {
            endpoints.token_endpoint = Some(token_url.clone());
        }
        match this.source {
            IdentitySource::Userinfo if endpoints.userinfo_endpoint.is_none() => {
                return Err(AuthError::Provider(
                    "userinfo_endpoint not found in discovery document".to_string(),
                ));
            }
            IdentitySource::Introspection if endpoints.introspection_endpoint.is_none() => {
                return Err(AuthError::Provider(
                    "introspection_endpoint not found in discovery document".to_string(),
                ));
            }
            _ => {}
        }
        this.endpoints = endpoints;
        Ok(this)
    }

    fn endpoint<'a>(&self, value: &'a Option<String>, name: &str) -> Result<&'a str, AuthError> {
        value
            .as_deref()
            .ok_or_else(|| AuthError::Provider(format!("{name} endpoint not configured")))
    }

    /// userinfo 声明集合；401 视为 token 无效
    pub async fn userinfo(&self, token: &str) -> Result<Value, AuthError> {
        let url = self.endpoint(&self.endpoints.userinfo_endpoint, "userinfo")?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        match resp.status().as_u16() {
            200..=299 => resp
                .json()
                .await
                .map_err(|e| AuthError::Provider(format!("invalid userinfo response: {e}"))),
            401 => Err(AuthError::InvalidToken),
            status => Err(AuthError::Provider(format!("userinfo returned HTTP {status}"))),
        }
    }

    /// RFC 7662 introspection，客户端以 Basic 认证
    pub async fn introspect(&self, token: &str) -> Result<Introspection, AuthError> {
        let url = self.endpoint(&self.endpoints.introspection_endpoint, "introspection")?;
        let resp = self
            .client
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!(
                "introspection returned HTTP {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid introspection response: {e}")))
    }

    /// 用一次身份调用解析 subject（userinfo 或 introspection，取决于配置）
    pub async fn resolve_subject(&self, token: &str) -> Result<String, AuthError> {
        match self.source {
            IdentitySource::Userinfo => {
                let claims = self.userinfo(token).await?;
                ["email", "preferred_username", "sub"]
                    .iter()
                    .find_map(|k| claims.get(*k).and_then(Value::as_str))
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .ok_or(AuthError::MissingSubject)
            }
            IdentitySource::Introspection => {
                let info = self.introspect(token).await?;
                if !info.active {
                    return Err(AuthError::Inactive);
                }
                info.subject().map(String::from).ok_or(AuthError::MissingSubject)
            }
        }
    }

    /// client_credentials 换 token；subject 通过旁路请求头传给 IdP
    pub async fn client_credentials_token(
        &self,
        subject: &str,
        subject_header: &str,
    ) -> Result<String, AuthError> {
        let url = self.endpoint(&self.endpoints.token_endpoint, "token")?;
        let resp = self
            .client
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(subject_header, subject)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %crate::observability::preview(&body, 300), "token endpoint rejected client credentials");
            return Err(AuthError::Provider(format!("token endpoint returned HTTP {status}")));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid token response: {e}")))?;
        body.get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .ok_or_else(|| AuthError::Provider("no access_token in token response".to_string()))
    }

    /// 策略决策：返回 decision 字段，缺失视为拒绝
    pub async fn policy_decision(
        &self,
        policy_url: &str,
        request: &PolicyRequest,
    ) -> Result<bool, AuthError> {
        let resp = self.client.post(policy_url).json(request).send().await?;
        if !resp.status().is_success() {
            return Err(AuthError::Provider(format!(
                "policy endpoint returned HTTP {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("invalid policy response: {e}")))?;
        Ok(body.get("decision").and_then(Value::as_bool).unwrap_or(false))
    }
}
