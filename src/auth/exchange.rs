//! 两种凭证升级实现

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::EncodingKey;

use super::{jwt, parse_bearer, AuthError, CredentialExchange, ExchangedCredential, IdentityClient};

/// IdP 换 token：解析 subject 后以 client_credentials 换取，subject 放在旁路头里
pub struct TokenExchange {
    identity: Arc<IdentityClient>,
    subject_header: String,
}

impl TokenExchange {
    pub fn new(identity: Arc<IdentityClient>, subject_header: String) -> Self {
        Self {
            identity,
            subject_header,
        }
    }
}

#[async_trait]
impl CredentialExchange for TokenExchange {
    async fn exchange(&self, inbound: &str) -> Result<ExchangedCredential, AuthError> {
        let token = parse_bearer(inbound)?;
        let subject = self.identity.resolve_subject(token).await?;
        let exchanged = self
            .identity
            .client_credentials_token(&subject, &self.subject_header)
            .await?;
        tracing::info!(subject = %subject, "exchanged credential at identity provider");
        Ok(ExchangedCredential {
            token: exchanged,
            subject,
        })
    }
}

/// 本地重签名：解析 subject 后签发短时 HS256 JWT
pub struct LocalResigner {
    identity: Arc<IdentityClient>,
    key: EncodingKey,
    ttl_secs: i64,
}

impl LocalResigner {
    pub fn new(identity: Arc<IdentityClient>, secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            identity,
            key: EncodingKey::from_secret(secret),
            ttl_secs,
        }
    }
}

#[async_trait]
impl CredentialExchange for LocalResigner {
    async fn exchange(&self, inbound: &str) -> Result<ExchangedCredential, AuthError> {
        let token = parse_bearer(inbound)?;
        let subject = self.identity.resolve_subject(token).await?;
        let signed = jwt::sign(&subject, &self.key, self.ttl_secs)?;
        tracing::info!(subject = %subject, ttl_secs = self.ttl_secs, "re-signed credential");
        Ok(ExchangedCredential {
            token: signed,
            subject,
        })
    }
}
