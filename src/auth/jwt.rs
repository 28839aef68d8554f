//! 本地重签名凭证（HS256）

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AuthError;

pub const ISSUER: &str = "concierge";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResignedClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// 为 subject 签发有效期 ttl_secs 的短时凭证
pub fn sign(subject: &str, key: &EncodingKey, ttl_secs: i64) -> Result<String, AuthError> {
    let iat = Utc::now().timestamp();
    let claims = ResignedClaims {
        sub: subject.to_string(),
        iat,
        exp: iat + ttl_secs,
        iss: ISSUER.to_string(),
    };
    encode(&Header::new(Algorithm::HS256), &claims, key).map_err(|e| AuthError::Signing(e.to_string()))
}

/// 校验签名、过期时间与签发方
pub fn verify(token: &str, secret: &[u8]) -> Result<ResignedClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.leeway = 0;
    decode::<ResignedClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}
