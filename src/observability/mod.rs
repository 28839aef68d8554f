//! 可观测性：统一的 tracing 订阅器初始化
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖；重复初始化（如测试中）静默忽略。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志（各二进制入口调用一次）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// 日志中遮蔽 Bearer 凭证，只保留前缀
pub fn mask_bearer(value: &str) -> String {
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        "Bearer ***".to_string()
    } else {
        "***".to_string()
    }
}

/// 截断长文本用于日志预览（按字符，避免切断 UTF-8）
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
