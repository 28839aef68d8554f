//! 凭证升级（Authorization Escalation）
//!
//! 工具以未授权结果拒绝匿名调用时，编排器用入站 Bearer 换取一个面向工具的凭证：
//! - **token_exchange**：IdP client_credentials + 旁路 subject 头
//! - **resign**：本地签发短时 HS256 JWT
//!
//! 同一部署只启用一种；每个请求最多换取一次，结果不跨请求缓存。

pub mod exchange;
pub mod identity;
pub mod jwt;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{AuthMode, AuthSection};
use crate::core::AgentError;

pub use exchange::{LocalResigner, TokenExchange};
pub use identity::{IdentityClient, Introspection, OidcEndpoints, PolicyRequest};
pub use jwt::ResignedClaims;

/// 凭证升级与身份服务错误
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no inbound credential")]
    MissingCredential,

    #[error("malformed bearer credential")]
    MalformedCredential,

    #[error("invalid or expired access token")]
    InvalidToken,

    #[error("token is not active")]
    Inactive,

    #[error("no subject claim in identity response")]
    MissingSubject,

    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Provider(e.to_string())
    }
}

/// 升级后的凭证及其所属 subject
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangedCredential {
    pub token: String,
    pub subject: String,
}

/// 凭证升级：入站 Bearer -> 面向工具的凭证
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, inbound: &str) -> Result<ExchangedCredential, AuthError>;
}

/// 校验并剥离 Bearer 前缀；接受 `Bearer <t>` 或裸 token
pub fn parse_bearer(inbound: &str) -> Result<&str, AuthError> {
    let trimmed = inbound.trim();
    if trimmed.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedCredential);
    }
    let token = match trimmed.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return Err(AuthError::MalformedCredential),
        None => trimmed,
    };
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedCredential);
    }
    Ok(token)
}

fn required(value: &Option<String>, key: &str) -> Result<String, AgentError> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AgentError::Config(format!("auth.{key} is required for the configured auth mode")))
}

/// 按 auth.mode 构造升级实现；Disabled 时返回 None（工具错误直接回送模型）
pub async fn build_exchanger(
    cfg: &AuthSection,
) -> Result<Option<Arc<dyn CredentialExchange>>, AgentError> {
    match cfg.mode {
        AuthMode::Disabled => Ok(None),
        AuthMode::TokenExchange => {
            let client_id = required(&cfg.client_id, "client_id")?;
            let client_secret = required(&cfg.client_secret, "client_secret")?;
            let identity = IdentityClient::discover(cfg, client_id, client_secret)
                .await
                .map_err(|e| AgentError::Startup(format!("OIDC discovery failed: {e}")))?;
            tracing::info!(subject_header = %cfg.subject_header, "credential escalation: token exchange");
            Ok(Some(Arc::new(TokenExchange::new(
                Arc::new(identity),
                cfg.subject_header.clone(),
            ))))
        }
        AuthMode::Resign => {
            let secret = required(&cfg.jwt_secret, "jwt_secret")?;
            let identity = IdentityClient::discover(
                cfg,
                cfg.client_id.clone().unwrap_or_default(),
                cfg.client_secret.clone().unwrap_or_default(),
            )
            .await
            .map_err(|e| AgentError::Startup(format!("OIDC discovery failed: {e}")))?;
            tracing::info!(ttl_secs = cfg.token_ttl_secs, "credential escalation: local re-sign");
            Ok(Some(Arc::new(LocalResigner::new(
                Arc::new(identity),
                secret.as_bytes(),
                cfg.token_ttl_secs,
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc.def").unwrap(), "abc.def");
        assert_eq!(parse_bearer("bearer   abc").unwrap(), "abc");
        assert_eq!(parse_bearer("abc").unwrap(), "abc");
        assert!(matches!(parse_bearer(""), Err(AuthError::MalformedCredential)));
        assert!(matches!(parse_bearer("Bearer "), Err(AuthError::MalformedCredential)));
        assert!(matches!(parse_bearer("Basic dXNlcg=="), Err(AuthError::MalformedCredential)));
    }

    #[tokio::test]
    async fn test_missing_secret_is_config_error() {
        let cfg = AuthSection {
            mode: AuthMode::TokenExchange,
            client_id: Some("agent".to_string()),
            ..Default::default()
        };
        let err = build_exchanger(&cfg).await.err();
        assert!(matches!(err, Some(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_disabled_mode_has_no_exchanger() {
        let cfg = AuthSection {
            mode: AuthMode::Disabled,
            ..Default::default()
        };
        assert!(build_exchanger(&cfg).await.unwrap().is_none());
    }
}
