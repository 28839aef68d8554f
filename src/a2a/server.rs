//! A2A 服务端：Agent Card + JSON-RPC `message/send`
//!
//! 路由：
//! - `GET /.well-known/agent-card.json` → 本 agent 的 Card
//! - `POST /` → JSON-RPC（`message/send`，`message/stream` 以单条消息作答）
//! - `GET /health` → `OK`
//!
//! 入站 `Authorization` 头原样交给编排器，用于凭证升级。

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use super::types::{
    first_text, A2aMessage, AgentCard, JsonRpcRequest, JsonRpcResponse, Part, AGENT_CARD_PATH,
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::core::Orchestrator;
use crate::observability::mask_bearer;

pub struct A2aState {
    pub orchestrator: Arc<Orchestrator>,
    pub card: AgentCard,
}

pub fn create_router(state: Arc<A2aState>) -> Router {
    Router::new()
        .route(AGENT_CARD_PATH, get(agent_card))
        .route("/", post(json_rpc))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn agent_card(State(state): State<Arc<A2aState>>) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn json_rpc(
    State(state): State<Arc<A2aState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "unparsable JSON-RPC request");
            return Json(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "Parse error"));
        }
    };
    let id = request.id.clone();

    match request.method.as_str() {
        "message/send" | "message/stream" => {
            let Some(text) = request_text(&request.params) else {
                return Json(JsonRpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    "Invalid params: message must contain a text part",
                ));
            };
            let authorization = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            tracing::info!(
                method = %request.method,
                authorization = %authorization.map(mask_bearer).unwrap_or_else(|| "none".to_string()),
                "A2A request"
            );
            let reply = state.orchestrator.handle_request(&text, authorization).await;
            let message = A2aMessage::agent(reply);
            match serde_json::to_value(&message) {
                Ok(result) => Json(JsonRpcResponse::success(id, result)),
                Err(e) => Json(JsonRpcResponse::failure(id, INTERNAL_ERROR, format!("Internal error: {e}"))),
            }
        }
        other => {
            tracing::warn!(method = %other, "unsupported JSON-RPC method");
            Json(JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ))
        }
    }
}

/// `params.message.parts` 中第一段非空文本
fn request_text(params: &Value) -> Option<String> {
    let parts = params.get("message")?.get("parts")?.clone();
    let parts: Vec<Part> = serde_json::from_value(parts).ok()?;
    first_text(&parts).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_text_reads_first_non_empty_part() {
        let params = json!({"message": {"role": "user", "parts": [
            {"kind": "text", "text": "  "},
            {"kind": "text", "text": "Find hotels in Paris"}
        ]}});
        assert_eq!(request_text(&params).as_deref(), Some("Find hotels in Paris"));
    }

    #[test]
    fn test_request_text_missing() {
        assert!(request_text(&json!({})).is_none());
        assert!(request_text(&json!({"message": {"parts": [{"kind": "file"}]}})).is_none());
    }
}
