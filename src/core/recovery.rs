//! 错误恢复引擎
//!
//! 把请求边界捕获的 AgentError 映射为 RecoveryAction，并提供限流等待提示与固定用户回复。

use chrono::{DateTime, Utc};

use crate::core::{AgentError, RecoveryAction};
use crate::llm::{LlmError, RateLimitInfo};

pub const SIGN_IN_MESSAGE: &str =
    "You need to be signed in to complete this action. Please sign in and try again.";

pub const NO_PERMISSION_MESSAGE: &str = "You don't have permissions to do this.";

pub const GENERIC_APOLOGY: &str =
    "I'm sorry, something went wrong while processing your request. Please try again in a moment.";

pub const CAPABILITY_FALLBACK: &str = "I'm here to help you with hotel bookings! I can:\n\
• Search for hotels in any city\n\
• Show your existing bookings\n\
• Make new reservations\n\
• Cancel bookings\n\n\
What would you like to do?";

const RATE_LIMIT_PREFIX: &str = "The assistant is receiving too many requests right now.";

/// 工具失败文本中出现即视为「无权限」的标记（大小写不敏感）
const DENIAL_INDICATORS: &[&str] = &[
    "forbidden",
    "unauthorized",
    "permission denied",
    "access denied",
    "not authorized",
    "insufficient permissions",
    "authzen",
    "invalid_scope",
    "403",
    "401",
];

/// 工具结果文本是否携带拒绝访问的标记
pub fn is_permission_denied(text: &str) -> bool {
    let lower = text.to_lowercase();
    DENIAL_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// 工具失败文本中表示「凭证缺失或无效」的标记；只有这类失败才触发凭证升级
const AUTH_FAILURE_INDICATORS: &[&str] = &[
    "401",
    "unauthorized",
    "unauthenticated",
    "not authenticated",
    "authentication required",
    "missing bearer",
    "invalid_token",
    "invalid token",
    "token expired",
    "expired token",
    "session expired",
    "login required",
];

/// 工具结果文本是否表示认证失败（与拒绝访问不同：后者带着有效凭证也不会成功）
pub fn is_auth_failure(text: &str) -> bool {
    let lower = text.to_lowercase();
    AUTH_FAILURE_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// 语义化错误恢复：将错误映射为用户回复方式
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Llm(LlmError::RateLimited(info)) => {
                RecoveryAction::WaitForRateLimit(info.clone())
            }
            AgentError::Llm(LlmError::Timeout) => {
                RecoveryAction::Apologize("The language service took too long to respond.".to_string())
            }
            AgentError::Llm(_) => {
                RecoveryAction::Apologize("The language service is temporarily unavailable.".to_string())
            }
            AgentError::Tool(_) => {
                RecoveryAction::Apologize("The booking service could not be reached.".to_string())
            }
            AgentError::Auth(_) => RecoveryAction::Reply(SIGN_IN_MESSAGE.to_string()),
            AgentError::Config(_) | AgentError::Startup(_) => {
                RecoveryAction::Apologize("The assistant is not fully available right now.".to_string())
            }
        }
    }
}

/// 根据限流信息生成等待提示；reset 无法解析时退化为「稍等片刻」
pub fn rate_limit_message(info: &RateLimitInfo, now: DateTime<Utc>) -> String {
    let wait = info.reset.as_deref().and_then(|r| seconds_until_reset(r, now));
    let mut msg = match wait {
        Some(secs) => format!("{RATE_LIMIT_PREFIX} Please try again in {}.", humanize_wait(secs)),
        None => format!("{RATE_LIMIT_PREFIX} Please wait a moment and try again."),
    };
    if let Some(quota) = info.quota {
        let remaining = info.remaining.unwrap_or(0);
        msg.push_str(&format!(
            " (limit: {quota} requests, {remaining} remaining)"
        ));
    }
    msg
}

/// 解析 reset 值为距离现在的秒数（至少 1 秒）
///
/// 支持：相对秒数（含小数）、epoch 秒、epoch 毫秒、`1m30s`/`250ms` 形式的时长、RFC 3339 与 HTTP 日期。
pub fn seconds_until_reset(raw: &str, now: DateTime<Utc>) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let now_ms = now.timestamp_millis();
    let secs = if let Ok(n) = raw.parse::<i64>() {
        if n >= 1_000_000_000_000 {
            (n - now_ms) as f64 / 1000.0
        } else if n >= 1_000_000_000 {
            (n - now.timestamp()) as f64
        } else {
            n as f64
        }
    } else if let Ok(f) = raw.parse::<f64>() {
        f
    } else if let Some(d) = parse_compact_duration(raw) {
        d
    } else if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        (t.timestamp_millis() - now_ms) as f64 / 1000.0
    } else if let Ok(t) = DateTime::parse_from_rfc2822(raw) {
        (t.timestamp_millis() - now_ms) as f64 / 1000.0
    } else {
        return None;
    };
    if !secs.is_finite() {
        return None;
    }
    Some(secs.ceil().max(1.0) as u64)
}

/// `6m0s`、`1h2m`、`20ms`、`1.5s` 这类紧凑时长
fn parse_compact_duration(raw: &str) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    let mut chars = raw.chars().peekable();
    let mut matched = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let factor = match c {
            'h' => 3600.0,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            'm' => 60.0,
            's' => 1.0,
            _ => return None,
        };
        total += value * factor;
        matched = true;
    }
    if !number.is_empty() || !matched {
        return None;
    }
    Some(total)
}

fn humanize_wait(secs: u64) -> String {
    fn plural(n: u64, unit: &str) -> String {
        if n == 1 {
            format!("about 1 {unit}")
        } else {
            format!("about {n} {unit}s")
        }
    }
    if secs < 60 {
        plural(secs, "second")
    } else if secs < 3600 {
        plural(secs.div_ceil(60), "minute")
    } else {
        plural(secs.div_ceil(3600), "hour")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::tools::ToolError;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_recovery_rate_limit() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Llm(LlmError::RateLimited(RateLimitInfo::default()));
        assert!(matches!(engine.handle(&err), RecoveryAction::WaitForRateLimit(_)));
    }

    #[test]
    fn test_recovery_auth_is_sign_in() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Auth(AuthError::MissingCredential);
        assert_eq!(
            engine.handle(&err),
            RecoveryAction::Reply(SIGN_IN_MESSAGE.to_string())
        );
    }

    #[test]
    fn test_recovery_hides_internal_detail() {
        let engine = RecoveryEngine::new();
        let err = AgentError::Tool(ToolError::Transport("connection refused 10.0.0.3:8082".into()));
        match engine.handle(&err) {
            RecoveryAction::Apologize(situation) => assert!(!situation.contains("10.0.0.3")),
            other => panic!("expected Apologize, got {other:?}"),
        }
        let err = AgentError::Llm(LlmError::Http { status: 500, message: "stack".into() });
        match engine.handle(&err) {
            RecoveryAction::Apologize(situation) => assert!(!situation.contains("500")),
            other => panic!("expected Apologize, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_formats() {
        let n = now();
        assert_eq!(seconds_until_reset("30", n), Some(30));
        assert_eq!(seconds_until_reset("1.2", n), Some(2));
        assert_eq!(seconds_until_reset(&(n.timestamp() + 90).to_string(), n), Some(90));
        assert_eq!(
            seconds_until_reset(&(n.timestamp_millis() + 120_000).to_string(), n),
            Some(120)
        );
        assert_eq!(seconds_until_reset("2024-01-01T12:05:00Z", n), Some(300));
        assert_eq!(seconds_until_reset("Mon, 01 Jan 2024 12:00:45 GMT", n), Some(45));
        assert_eq!(seconds_until_reset("6m0s", n), Some(360));
        assert_eq!(seconds_until_reset("250ms", n), Some(1));
        assert_eq!(seconds_until_reset("soon", n), None);
        assert_eq!(seconds_until_reset("", n), None);
    }

    #[test]
    fn test_reset_in_the_past_clamps_to_one_second() {
        let n = now();
        assert_eq!(seconds_until_reset(&(n.timestamp() - 10).to_string(), n), Some(1));
    }

    #[test]
    fn test_rate_limit_message() {
        let info = RateLimitInfo {
            reset: Some("120".to_string()),
            quota: Some(10),
            remaining: Some(0),
        };
        let msg = rate_limit_message(&info, now());
        assert!(msg.contains("about 2 minutes"));
        assert!(msg.contains("limit: 10 requests, 0 remaining"));

        let unparsable = RateLimitInfo {
            reset: Some("whenever".to_string()),
            ..Default::default()
        };
        assert!(rate_limit_message(&unparsable, now()).contains("wait a moment"));
    }

    #[test]
    fn test_denial_indicators() {
        assert!(is_permission_denied("HTTP 403: Forbidden"));
        assert!(is_permission_denied("AuthZen decision: deny"));
        assert!(is_permission_denied("error=invalid_scope"));
        assert!(!is_permission_denied("No hotels found in Paris"));
    }

    #[test]
    fn test_auth_failure_indicators() {
        assert!(is_auth_failure("HTTP 401: Unauthorized"));
        assert!(is_auth_failure("MCP error -32001: invalid_token"));
        assert!(is_auth_failure("Session expired, please log in"));
        assert!(!is_auth_failure("HTTP 422: location must not be empty"));
        assert!(!is_auth_failure("HTTP 403: Forbidden by AuthZen policy"));
    }
}
