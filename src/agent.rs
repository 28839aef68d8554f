//! Agent 装配
//!
//! 启动时构造一次进程级句柄（LLM 客户端、MCP 会话、凭证升级、peer 注册表），
//! 注入 Orchestrator；另提供两个 agent 的 Card。

use std::sync::Arc;

use crate::a2a::{AgentCapabilities, AgentCard, AgentSkill, PeerRegistry};
use crate::a2a::types::PROTOCOL_VERSION;
use crate::auth::build_exchanger;
use crate::config::{load_system_prompt, AppConfig};
use crate::core::{AgentError, Orchestrator};
use crate::llm::OpenAiClient;
use crate::tools::{ExchangeRateTool, LocalToolProvider, McpClient, ToolExecutor, ToolRegistry};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an Hotel Booking AI Agent whose only role is to use the tools provided.\n\
Always strictly follow this rule.\n\
Whenever possible, personalize your responses using the guest's first name to create a friendly experience.";

pub const CURRENCY_SYSTEM_PROMPT: &str = "You are a specialized assistant for currency conversions. \
Your sole purpose is to use the 'get_exchange_rate' tool to answer questions about currency exchange rates. \
You can handle queries like \"how much is 200 euros in dollars\" or \"convert 500 USD to GBP\". \
When the user specifies an amount, pass it as the \"amount\" parameter to the tool. \
When the user does not specify an amount, default to 1.0 to show the exchange rate. \
Always present the result clearly, e.g. \"200 EUR = 215.40 USD (rate: 1.077)\". \
If the user asks about anything other than currency conversion or exchange rates, \
politely state that you cannot help with that topic and can only assist with currency-related queries. \
Do not attempt to answer unrelated questions or use tools for other purposes.";

const CURRENCY_FALLBACK: &str =
    "I can help with currency conversions and exchange rates, e.g. \"convert 100 EUR to USD\".";

/// 酒店预订 agent：MCP 工具 + 凭证升级 + peer 委托
pub async fn build_orchestrator(cfg: &AppConfig) -> Result<Orchestrator, AgentError> {
    let llm = OpenAiClient::from_config(&cfg.llm)?;
    tracing::info!(model = %cfg.llm.model, base_url = %cfg.llm.base_url, "completion service configured");

    let mcp = McpClient::connect(&cfg.mcp)
        .await
        .map_err(|e| AgentError::Startup(format!("MCP server {} unreachable: {e}", cfg.mcp.url)))?;

    let exchanger = build_exchanger(&cfg.auth).await?;

    let mut peers = PeerRegistry::new(cfg.peers.timeout_secs)
        .map_err(|e| AgentError::Startup(format!("peer client: {e}")))?;
    if peers.discover_all(&cfg.peers.urls).await == 0 && !cfg.peers.urls.is_empty() {
        tracing::warn!("no peer agent reachable, delegation disabled");
    }

    let system_prompt = load_system_prompt(cfg, DEFAULT_SYSTEM_PROMPT);
    Ok(Orchestrator::new(Arc::new(llm), Arc::new(mcp), system_prompt)
        .with_exchanger(exchanger)
        .with_peers(peers)
        .with_max_rounds(cfg.agent.max_rounds)
        .with_friendly_errors(cfg.agent.friendly_errors))
}

/// 汇率 peer agent：只有本地 get_exchange_rate 工具，不做凭证升级
pub fn build_currency_orchestrator(cfg: &AppConfig) -> Result<Orchestrator, AgentError> {
    let llm = OpenAiClient::from_config(&cfg.llm)?;
    let tool = ExchangeRateTool::new(&cfg.currency.rates_url, cfg.mcp.timeout_secs)
        .map_err(AgentError::Config)?;
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    let provider = LocalToolProvider::new(ToolExecutor::new(registry, cfg.mcp.timeout_secs));

    Ok(Orchestrator::new(Arc::new(llm), Arc::new(provider), CURRENCY_SYSTEM_PROMPT)
        .with_fallback_reply(CURRENCY_FALLBACK)
        .with_max_rounds(cfg.agent.max_rounds)
        .with_friendly_errors(cfg.agent.friendly_errors))
}

fn public_url(configured: &Option<String>, port: u16) -> String {
    configured
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{port}/"))
}

fn card(name: &str, description: &str, url: String, streaming: bool, skill: AgentSkill) -> AgentCard {
    AgentCard {
        name: name.to_string(),
        description: description.to_string(),
        version: "1.0.0".to_string(),
        url,
        capabilities: AgentCapabilities {
            streaming,
            push_notifications: false,
            state_transition_history: streaming,
        },
        skills: vec![skill],
        default_input_modes: vec!["text/plain".to_string()],
        default_output_modes: vec!["text/plain".to_string()],
        protocol_version: PROTOCOL_VERSION.to_string(),
        preferred_transport: "JSONRPC".to_string(),
    }
}

pub fn hotel_agent_card(cfg: &AppConfig) -> AgentCard {
    card(
        &cfg.agent.name,
        "Expert hotel booking management agent for comprehensive reservation handling",
        public_url(&cfg.agent.public_url, cfg.agent.port),
        true,
        AgentSkill {
            id: "skill_1_hotel_booking_management".to_string(),
            name: "hotel-booking-management".to_string(),
            description: "Comprehensive hotel booking management including searching, creating, updating, and canceling reservations".to_string(),
            tags: ["hotel", "booking", "management", "reservations"]
                .into_iter()
                .map(String::from)
                .collect(),
        },
    )
}

pub fn currency_agent_card(cfg: &AppConfig) -> AgentCard {
    card(
        "Currency Agent",
        "Helps with exchange rates for currencies",
        public_url(&cfg.currency.public_url, cfg.currency.port),
        false,
        AgentSkill {
            id: "convert_currency".to_string(),
            name: "Currency Exchange Rates Tool".to_string(),
            description: "Helps with exchange values between various currencies".to_string(),
            tags: vec!["currency conversion".to_string(), "currency exchange".to_string()],
        },
    )
}
