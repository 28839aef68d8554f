//! 预订 REST API（Tool Provider 背后的业务后端）
//!
//! - `GET /accommodations?location=` 公开
//! - `GET|POST /bookings`、`GET|PUT|DELETE /bookings/:id` 需要 bearer 凭证
//!
//! 凭证两种来源：本地重签名的 HS256 短时 token，或经 introspection 校验（active + scope）的 IdP token。
//! 开启策略时，每个操作先问一次策略决策端点，拒绝即 403。

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use thiserror::Error;

use super::model::{AccommodationQuery, BookingRequest};
use super::store::{BookingStore, StoreError};
use crate::auth::{jwt, parse_bearer, AuthError, IdentityClient, OidcEndpoints, PolicyRequest};
use crate::config::{AppConfig, AuthMode, IdentitySource};

#[derive(Error, Debug)]
pub enum BookingApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Booking not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Authorization service unavailable: {0}")]
    Upstream(String),
}

impl BookingApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for BookingApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "detail": self.to_string() }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<StoreError> for BookingApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::NotFound,
            StoreError::UnknownAccommodation(_) | StoreError::Invalid(_) => Self::BadRequest(e.to_string()),
            StoreError::SoldOut(_) => Self::Conflict(e.to_string()),
        }
    }
}

impl From<AuthError> for BookingApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Provider(msg) => Self::Upstream(msg),
            AuthError::Signing(msg) => Self::Upstream(msg),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

/// 入站 bearer 的校验方式
pub enum TokenVerifier {
    /// 本地重签名 token（与 agent 共享密钥）
    Resigned { secret: Vec<u8> },
    /// IdP token，经 introspection 校验 active 与 scope
    Introspected {
        identity: Arc<IdentityClient>,
        required_scope: String,
    },
}

impl TokenVerifier {
    /// 返回调用者 subject
    async fn verify(&self, token: &str) -> Result<String, BookingApiError> {
        match self {
            Self::Resigned { secret } => Ok(jwt::verify(token, secret)?.sub),
            Self::Introspected {
                identity,
                required_scope,
            } => {
                let info = identity.introspect(token).await?;
                if !info.active {
                    return Err(AuthError::Inactive.into());
                }
                if !info.has_scope(required_scope) {
                    return Err(BookingApiError::Forbidden(format!(
                        "Missing required scope: {required_scope}"
                    )));
                }
                info.subject()
                    .map(String::from)
                    .ok_or_else(|| AuthError::MissingSubject.into())
            }
        }
    }
}

/// 策略决策端点
pub struct PolicyCheck {
    pub identity: Arc<IdentityClient>,
    pub url: String,
}

pub struct BookingState {
    pub store: BookingStore,
    pub verifier: TokenVerifier,
    pub policy: Option<PolicyCheck>,
}

impl BookingState {
    /// 按 auth.mode 选择校验方式：resign → 共享密钥；token_exchange → introspection
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AuthError> {
        let auth = &cfg.auth;
        let verifier = match auth.mode {
            AuthMode::Resign => {
                let secret = auth
                    .jwt_secret
                    .clone()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| AuthError::Provider("auth.jwt_secret is required in resign mode".to_string()))?;
                TokenVerifier::Resigned {
                    secret: secret.into_bytes(),
                }
            }
            AuthMode::TokenExchange => {
                let mut introspection = auth.clone();
                introspection.identity_source = IdentitySource::Introspection;
                let identity = IdentityClient::discover(
                    &introspection,
                    auth.client_id.clone().unwrap_or_default(),
                    auth.client_secret.clone().unwrap_or_default(),
                )
                .await?;
                TokenVerifier::Introspected {
                    identity: Arc::new(identity),
                    required_scope: cfg.booking.required_scope.clone(),
                }
            }
            AuthMode::Disabled => {
                return Err(AuthError::Provider(
                    "the booking API needs auth.mode = resign or token_exchange".to_string(),
                ))
            }
        };

        let policy = match (&cfg.booking.policy_url, cfg.booking.policy_enabled) {
            (Some(url), true) => Some(PolicyCheck {
                identity: Arc::new(IdentityClient::new(
                    OidcEndpoints::default(),
                    auth.client_id.clone().unwrap_or_default(),
                    auth.client_secret.clone().unwrap_or_default(),
                    auth.identity_source,
                    auth.timeout_secs,
                )?),
                url: url.clone(),
            }),
            (None, true) => {
                tracing::warn!("booking.policy_enabled is set but booking.policy_url is missing; policy checks disabled");
                None
            }
            _ => None,
        };

        Ok(Self {
            store: BookingStore::seeded(),
            verifier,
            policy,
        })
    }

    async fn authenticate(&self, headers: &HeaderMap) -> Result<String, BookingApiError> {
        let raw = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BookingApiError::Unauthorized("Missing bearer token".to_string()))?;
        let token = parse_bearer(raw)?;
        self.verifier.verify(token).await
    }

    /// 鉴权 + 策略：返回调用者 subject
    async fn authorize(
        &self,
        headers: &HeaderMap,
        action: &str,
        resource_id: &str,
    ) -> Result<String, BookingApiError> {
        let subject = self.authenticate(headers).await?;
        if let Some(policy) = &self.policy {
            let request = PolicyRequest::new(&subject, "booking", resource_id, action);
            let allowed = policy.identity.policy_decision(&policy.url, &request).await?;
            if !allowed {
                tracing::warn!(subject = %subject, action, resource_id, "policy denied booking operation");
                return Err(BookingApiError::Forbidden(format!(
                    "Forbidden: policy denies {action} on booking {resource_id}"
                )));
            }
        }
        Ok(subject)
    }
}

pub fn create_router(state: Arc<BookingState>) -> Router {
    Router::new()
        .route("/accommodations", get(search_accommodations))
        .route("/bookings", get(list_bookings).post(create_booking))
        .route(
            "/bookings/:id",
            get(get_booking).put(update_booking).delete(delete_booking),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn search_accommodations(
    State(state): State<Arc<BookingState>>,
    Query(query): Query<AccommodationQuery>,
) -> impl IntoResponse {
    Json(state.store.search(query.location.as_deref()).await)
}

async fn list_bookings(
    State(state): State<Arc<BookingState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, BookingApiError> {
    let subject = state.authorize(&headers, "can_read", "*").await?;
    Ok(Json(state.store.list_for(&subject).await))
}

async fn get_booking(
    State(state): State<Arc<BookingState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, BookingApiError> {
    let subject = state.authorize(&headers, "can_read", &id.to_string()).await?;
    Ok(Json(state.store.get(id, &subject).await?))
}

async fn create_booking(
    State(state): State<Arc<BookingState>>,
    headers: HeaderMap,
    Json(req): Json<BookingRequest>,
) -> Result<impl IntoResponse, BookingApiError> {
    let subject = state.authorize(&headers, "can_create", "*").await?;
    let booking = state.store.create(&subject, &req).await?;
    tracing::info!(id = booking.id, subject = %subject, hotel = %booking.hotel_name, "booking created");
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn update_booking(
    State(state): State<Arc<BookingState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    Json(req): Json<BookingRequest>,
) -> Result<impl IntoResponse, BookingApiError> {
    let subject = state.authorize(&headers, "can_update", &id.to_string()).await?;
    Ok(Json(state.store.update(id, &subject, &req).await?))
}

async fn delete_booking(
    State(state): State<Arc<BookingState>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Result<StatusCode, BookingApiError> {
    let subject = state.authorize(&headers, "can_delete", &id.to_string()).await?;
    state.store.delete(id, &subject).await?;
    tracing::info!(id, subject = %subject, "booking deleted");
    Ok(StatusCode::NO_CONTENT)
}
