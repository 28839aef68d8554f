//! Concierge - Rust 酒店预订智能体平台
//!
//! 模块划分：
//! - **a2a**: A2A 协议类型、peer 注册表与服务端路由
//! - **agent**: 启动期装配（LLM、MCP 会话、凭证升级、peer 发现）与 Agent Card
//! - **auth**: 凭证升级（token exchange / 本地重签名）与 Identity Provider 客户端
//! - **booking**: 预订 REST 后端（酒店搜索、预订 CRUD）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 单次请求内的对话轮次
//! - **core**: 编排主循环、分派表、错误与恢复、优雅关闭
//! - **llm**: Completion Service 客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **observability**: 日志初始化与脱敏
//! - **tools**: Tool Provider 抽象、MCP 客户端、本地工具与执行器

pub mod a2a;
pub mod agent;
pub mod auth;
pub mod booking;
pub mod config;
pub mod conversation;
pub mod core;
pub mod llm;
pub mod observability;
pub mod tools;
