//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONCIERGE__*` 覆盖（双下划线表示嵌套，如 `CONCIERGE__LLM__MODEL=qwen3:0.6b`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub mcp: McpSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub peers: PeersSection,
    #[serde(default)]
    pub currency: CurrencySection,
    #[serde(default)]
    pub booking: BookingSection,
}

/// [agent] 段：Agent 名称、监听端口、系统提示词、编排轮数上限
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    /// 对外公布的 Agent Card url；未设置时用 http://localhost:{port}
    pub public_url: Option<String>,
    /// 系统提示词文件；读取失败时回退到内置提示词
    pub system_prompt_path: Option<PathBuf>,
    /// 单次请求内最多执行的工具轮数
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Completion Service 失败时是否让 LLM 自己润色致歉语
    #[serde(default = "default_true")]
    pub friendly_errors: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            port: default_agent_port(),
            public_url: None,
            system_prompt_path: None,
            max_rounds: default_max_rounds(),
            friendly_errors: true,
        }
    }
}

fn default_agent_name() -> String {
    "Hotel Booking Manager".to_string()
}

fn default_agent_port() -> u16 {
    8080
}

fn default_max_rounds() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// [llm] 段：OpenAI 兼容端点、模型、温度与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// 为空时读取环境变量 LLM_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_llm_base_url() -> String {
    "http://gio-apim-gateway:8082/llm/v1".to_string()
}

fn default_model() -> String {
    "qwen3:0.6b".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_request_timeout() -> u64 {
    60
}

/// [mcp] 段：Tool Provider 地址与启动连接重试
#[derive(Debug, Clone, Deserialize)]
pub struct McpSection {
    #[serde(default = "default_mcp_url")]
    pub url: String,
    /// 启动时最多尝试连接次数，超过即启动失败
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            connect_retries: default_connect_retries(),
            retry_interval_secs: default_retry_interval_secs(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_mcp_url() -> String {
    "http://gio-apim-gateway:8082/hotels/mcp".to_string()
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_interval_secs() -> u64 {
    5
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// 凭证升级方式：同一部署只启用一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// 向 IdP token 端点换取第二个凭证（client_credentials + 旁路 subject 头）
    #[default]
    TokenExchange,
    /// 本地签发短时 JWT，嵌入解析出的 subject
    Resign,
    /// 不做凭证升级（如 currency peer agent）
    Disabled,
}

/// subject 解析走 userinfo 还是 introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    #[default]
    Userinfo,
    Introspection,
}

/// [auth] 段：OIDC 发现地址、客户端凭证、凭证升级方式
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub identity_source: IdentitySource,
    #[serde(default = "default_oidc_discovery_url")]
    pub oidc_discovery_url: String,
    /// 显式 token 端点；未设置时使用 OIDC 发现结果
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// token_exchange 模式下携带 subject 的旁路请求头
    #[serde(default = "default_subject_header")]
    pub subject_header: String,
    /// resign 模式的 HMAC 密钥
    pub jwt_secret: Option<String>,
    /// resign 模式签发凭证的有效期（秒）
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,
    #[serde(default = "default_auth_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            identity_source: IdentitySource::default(),
            oidc_discovery_url: default_oidc_discovery_url(),
            token_url: None,
            client_id: None,
            client_secret: None,
            subject_header: default_subject_header(),
            jwt_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
            timeout_secs: default_auth_timeout_secs(),
        }
    }
}

fn default_oidc_discovery_url() -> String {
    "http://am-gateway:8092/gravitee/oidc/.well-known/openid-configuration".to_string()
}

fn default_subject_header() -> String {
    "sub-email".to_string()
}

fn default_token_ttl_secs() -> i64 {
    30
}

fn default_auth_timeout_secs() -> u64 {
    30
}

/// [peers] 段：需要发现的 A2A peer agent 基地址（按配置顺序注册）
#[derive(Debug, Clone, Deserialize)]
pub struct PeersSection {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_peer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PeersSection {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            timeout_secs: default_peer_timeout_secs(),
        }
    }
}

fn default_peer_timeout_secs() -> u64 {
    60
}

/// [currency] 段：汇率 peer agent 的端口与汇率服务地址
#[derive(Debug, Clone, Deserialize)]
pub struct CurrencySection {
    #[serde(default = "default_currency_port")]
    pub port: u16,
    pub public_url: Option<String>,
    #[serde(default = "default_rates_url")]
    pub rates_url: String,
}

impl Default for CurrencySection {
    fn default() -> Self {
        Self {
            port: default_currency_port(),
            public_url: None,
            rates_url: default_rates_url(),
        }
    }
}

fn default_currency_port() -> u16 {
    8081
}

fn default_rates_url() -> String {
    "https://api.frankfurter.app".to_string()
}

/// [booking] 段：预订 REST API 端口、所需 scope 与策略决策
#[derive(Debug, Clone, Deserialize)]
pub struct BookingSection {
    #[serde(default = "default_booking_port")]
    pub port: u16,
    #[serde(default = "default_required_scope")]
    pub required_scope: String,
    /// 是否在每次操作前调用策略决策端点
    #[serde(default)]
    pub policy_enabled: bool,
    /// 策略决策端点（AuthZen 风格）
    pub policy_url: Option<String>,
}

impl Default for BookingSection {
    fn default() -> Self {
        Self {
            port: default_booking_port(),
            required_scope: default_required_scope(),
            policy_enabled: false,
            policy_url: None,
        }
    }
}

fn default_booking_port() -> u16 {
    8000
}

fn default_required_scope() -> String {
    "bookings".to_string()
}

/// 从 config 目录加载配置，环境变量 CONCIERGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONCIERGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONCIERGE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("peers.urls")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 读取系统提示词：配置路径 > config/prompts/system.txt > 内置默认
pub fn load_system_prompt(cfg: &AppConfig, fallback: &str) -> String {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(p) = &cfg.agent.system_prompt_path {
        candidates.push(p.clone());
    }
    candidates.push(PathBuf::from("config/prompts/system.txt"));
    candidates.push(PathBuf::from("../config/prompts/system.txt"));
    candidates
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
