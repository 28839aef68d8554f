//! Agent 编排器：单次请求的工具调用主循环
//!
//! 流程：播种对话 → 构建分派表 → 补全 → 最多 max_rounds 轮「执行首个工具调用 → 回送结果 → 再补全」
//! → 轮数耗尽时做一次不带工具的收尾补全。
//!
//! 预期内的失败（工具报错、peer 出错、未知工具名）留在循环里作为错误结果交给模型；
//! 需要终止的授权结论（请登录 / 无权限）以 `Step::Terminal` 返回；
//! 其余失败以 AgentError 传播，只在 `handle_request` 边界翻译一次。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::a2a::PeerRegistry;
use crate::auth::{CredentialExchange, ExchangedCredential};
use crate::conversation::{Conversation, Message};
use crate::core::dispatch::{DelegateArgs, Dispatch, DispatchTable};
use crate::core::recovery::{
    is_auth_failure, is_permission_denied, rate_limit_message, CAPABILITY_FALLBACK, GENERIC_APOLOGY,
    NO_PERMISSION_MESSAGE, SIGN_IN_MESSAGE,
};
use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::llm::LlmClient;
use crate::tools::executor::audit;
use crate::tools::{ToolInvocationRequest, ToolInvocationResult, ToolProvider};

const APOLOGY_INSTRUCTION: &str = "You are a helpful hotel booking assistant. \
Convert technical problems into short, friendly, actionable messages for users. \
Never mention internal details such as status codes, hosts or stack traces.";

/// 请求内的授权上下文：入站凭证 + 至多换取一次的升级凭证
pub struct AuthorizationContext {
    inbound: Option<String>,
    exchange: ExchangeState,
}

enum ExchangeState {
    NotAttempted,
    Exchanged(ExchangedCredential),
    Failed,
}

impl AuthorizationContext {
    pub fn new(inbound: Option<&str>) -> Self {
        Self {
            inbound: inbound
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            exchange: ExchangeState::NotAttempted,
        }
    }

    fn exchanged_token(&self) -> Option<&str> {
        match &self.exchange {
            ExchangeState::Exchanged(c) => Some(c.token.as_str()),
            _ => None,
        }
    }
}

/// 执行一次工具调用后的走向
enum Step {
    /// 结果进入对话，继续下一次补全
    Observed(ToolInvocationResult),
    /// 直接把固定回复返回给用户
    Terminal(String),
}

/// 循环状态
enum LoopState {
    AwaitingDecision,
    Executing(ToolInvocationRequest),
    Done(String),
}

/// 编排器：请求间共享的只读句柄（LLM、Tool Provider、凭证升级、peer 注册表）
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    tools: Arc<dyn ToolProvider>,
    exchanger: Option<Arc<dyn CredentialExchange>>,
    peers: Option<PeerRegistry>,
    recovery: RecoveryEngine,
    system_prompt: String,
    fallback_reply: String,
    max_rounds: usize,
    friendly_errors: bool,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<dyn ToolProvider>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tools,
            exchanger: None,
            peers: None,
            recovery: RecoveryEngine::new(),
            system_prompt: system_prompt.into(),
            fallback_reply: CAPABILITY_FALLBACK.to_string(),
            max_rounds: 5,
            friendly_errors: true,
        }
    }

    pub fn with_exchanger(mut self, exchanger: Option<Arc<dyn CredentialExchange>>) -> Self {
        self.exchanger = exchanger;
        self
    }

    pub fn with_peers(mut self, peers: PeerRegistry) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// 模型没有给出任何文本时的固定回复
    pub fn with_fallback_reply(mut self, reply: impl Into<String>) -> Self {
        self.fallback_reply = reply.into();
        self
    }

    pub fn with_friendly_errors(mut self, enabled: bool) -> Self {
        self.friendly_errors = enabled;
        self
    }

    pub fn peers(&self) -> Option<&PeerRegistry> {
        self.peers.as_ref()
    }

    /// 处理一条用户消息，总是返回可展示给用户的文本
    pub async fn handle_request(&self, user_message: &str, inbound_credential: Option<&str>) -> String {
        let span = tracing::info_span!("request", id = %Uuid::new_v4());
        async move {
            let message = user_message.trim();
            if message.is_empty() {
                tracing::info!("empty user message, returning capability overview");
                return self.fallback_reply.clone();
            }
            tracing::info!(
                message = %crate::observability::preview(message, 120),
                authenticated = inbound_credential.is_some(),
                "handling request"
            );
            let mut auth = AuthorizationContext::new(inbound_credential);
            match self.run(message, &mut auth).await {
                Ok(reply) => {
                    tracing::debug!(total_tokens = self.llm.token_usage().2, "request finished");
                    reply
                }
                Err(e) => {
                    tracing::error!(error = %e, "request failed");
                    self.recover(&e).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, user_message: &str, auth: &mut AuthorizationContext) -> Result<String, AgentError> {
        let provider_tools = self.tools.list_tools().await?;
        let table = DispatchTable::build(provider_tools, self.peers.as_ref());
        tracing::debug!(tools = table.descriptors().len(), "dispatch table built");

        let mut conversation = Conversation::seeded(&self.system_prompt, user_message);
        let mut state = LoopState::AwaitingDecision;
        let mut round = 0usize;

        loop {
            state = match state {
                LoopState::AwaitingDecision => {
                    let completion = self.llm.complete(conversation.messages(), table.descriptors()).await?;
                    match completion.into_first_call() {
                        (_, Some(call)) => LoopState::Executing(call),
                        (content, None) if round == 0 => LoopState::Done(self.or_fallback(content)),
                        (content, None) => LoopState::Done(self.or_fallback(content.trim().to_string())),
                    }
                }
                LoopState::Executing(call) if round >= self.max_rounds => {
                    tracing::warn!(round, pending = %call.name, "round budget exhausted, requesting final answer");
                    LoopState::Done(self.final_answer(&conversation).await?)
                }
                LoopState::Executing(call) => {
                    round += 1;
                    tracing::info!(round, tool = %call.name, "executing tool call");
                    match self.execute(&table, &call, auth).await? {
                        Step::Observed(result) => {
                            conversation.push_tool_exchange(call, &result);
                            LoopState::AwaitingDecision
                        }
                        Step::Terminal(reply) => LoopState::Done(reply),
                    }
                }
                LoopState::Done(reply) => return Ok(reply),
            };
        }
    }

    fn or_fallback(&self, content: String) -> String {
        if content.trim().is_empty() {
            self.fallback_reply.clone()
        } else {
            content
        }
    }

    /// 轮数耗尽：不带工具再补全一次
    async fn final_answer(&self, conversation: &Conversation) -> Result<String, AgentError> {
        let completion = self.llm.complete(conversation.messages(), &[]).await?;
        Ok(self.or_fallback(completion.content.trim().to_string()))
    }

    async fn execute(
        &self,
        table: &DispatchTable,
        call: &ToolInvocationRequest,
        auth: &mut AuthorizationContext,
    ) -> Result<Step, AgentError> {
        let started = Instant::now();
        let args = Value::Object(call.arguments.clone());
        let step = match table.resolve(&call.name) {
            Dispatch::Provider => self.invoke_provider(call, auth).await?,
            Dispatch::Delegate => Step::Observed(self.delegate(call).await),
            Dispatch::Unknown => {
                tracing::warn!(tool = %call.name, "model requested a tool that is not offered");
                Step::Observed(ToolInvocationResult::error(format!(
                    "Unknown tool: {}. Use one of the provided tools.",
                    call.name
                )))
            }
        };
        let (ok, outcome) = match &step {
            Step::Observed(r) if !r.is_error => (true, "ok"),
            Step::Observed(_) => (false, "error"),
            Step::Terminal(_) => (false, "terminal"),
        };
        audit(&call.name, outcome, ok, started, &args);
        Ok(step)
    }

    /// 调用 provider 工具；只有认证失败才做一次凭证升级并重试
    async fn invoke_provider(
        &self,
        call: &ToolInvocationRequest,
        auth: &mut AuthorizationContext,
    ) -> Result<Step, AgentError> {
        if let Some(token) = auth.exchanged_token() {
            let result = self.tools.call_tool(&call.name, &call.arguments, Some(token)).await?;
            return Ok(self.with_escalated(call, result));
        }

        let result = self.tools.call_tool(&call.name, &call.arguments, None).await?;
        if !result.is_error {
            return Ok(Step::Observed(result));
        }
        let text = result.text_content();

        if self.exchanger.is_none() || !is_auth_failure(&text) {
            if is_permission_denied(&text) {
                tracing::warn!(tool = %call.name, "tool denied access");
                return Ok(Step::Terminal(NO_PERMISSION_MESSAGE.to_string()));
            }
            return Ok(Step::Observed(result));
        }

        tracing::info!(tool = %call.name, "anonymous tool call rejected, escalating credential");
        let Some(token) = self.escalate(auth).await else {
            return Ok(Step::Terminal(SIGN_IN_MESSAGE.to_string()));
        };

        let retried = self.tools.call_tool(&call.name, &call.arguments, Some(&token)).await?;
        Ok(self.with_escalated(call, retried))
    }

    /// 携带升级凭证后的结果：再次认证失败 → 请登录；拒绝 → 无权限；其余照常交给模型
    fn with_escalated(&self, call: &ToolInvocationRequest, result: ToolInvocationResult) -> Step {
        if !result.is_error {
            return Step::Observed(result);
        }
        let text = result.text_content();
        if is_auth_failure(&text) {
            tracing::warn!(tool = %call.name, "tool rejected escalated credential");
            Step::Terminal(SIGN_IN_MESSAGE.to_string())
        } else if is_permission_denied(&text) {
            tracing::warn!(tool = %call.name, "tool denied access with escalated credential");
            Step::Terminal(NO_PERMISSION_MESSAGE.to_string())
        } else {
            Step::Observed(result)
        }
    }

    /// 每个请求至多换取一次；失败结果同样记住
    async fn escalate(&self, auth: &mut AuthorizationContext) -> Option<String> {
        match &auth.exchange {
            ExchangeState::Exchanged(c) => return Some(c.token.clone()),
            ExchangeState::Failed => return None,
            ExchangeState::NotAttempted => {}
        }
        let (Some(exchanger), Some(inbound)) = (&self.exchanger, auth.inbound.as_deref()) else {
            tracing::info!("no inbound credential to escalate");
            auth.exchange = ExchangeState::Failed;
            return None;
        };
        match exchanger.exchange(inbound).await {
            Ok(cred) => {
                tracing::info!(subject = %cred.subject, "credential escalated");
                let token = cred.token.clone();
                auth.exchange = ExchangeState::Exchanged(cred);
                Some(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "credential escalation failed");
                auth.exchange = ExchangeState::Failed;
                None
            }
        }
    }

    /// 委托给 peer；任何失败都折叠成错误结果
    async fn delegate(&self, call: &ToolInvocationRequest) -> ToolInvocationResult {
        let Some(peers) = &self.peers else {
            return ToolInvocationResult::error("No external agents are available.");
        };
        let args: DelegateArgs = match serde_json::from_value(Value::Object(call.arguments.clone())) {
            Ok(a) => a,
            Err(e) => return ToolInvocationResult::error(format!("Invalid delegation arguments: {e}")),
        };
        let agent = peers
            .find_by_name(&args.agent_name)
            .or_else(|| peers.find_by_skill(&[args.agent_name.as_str()]));
        let Some(agent) = agent else {
            return ToolInvocationResult::error(format!(
                "Unknown agent '{}'. Available agents: {}",
                args.agent_name,
                peers.names().join(", ")
            ));
        };
        match peers.send(agent, &args.message).await {
            Ok(text) => ToolInvocationResult::text(text),
            Err(e) => {
                tracing::warn!(agent = %agent.name, error = %e, "delegation failed");
                ToolInvocationResult::error(format!("Agent '{}' could not complete the request: {e}", agent.name))
            }
        }
    }

    /// 请求边界：错误只在这里翻译成用户回复
    async fn recover(&self, err: &AgentError) -> String {
        match self.recovery.handle(err) {
            RecoveryAction::Reply(msg) => msg,
            RecoveryAction::WaitForRateLimit(info) => rate_limit_message(&info, Utc::now()),
            RecoveryAction::Apologize(situation) if self.friendly_errors => {
                self.phrase_apology(&situation).await
            }
            RecoveryAction::Apologize(_) => GENERIC_APOLOGY.to_string(),
        }
    }

    /// 让模型把脱敏后的情况描述润色成致歉语；失败则用固定文案
    async fn phrase_apology(&self, situation: &str) -> String {
        let messages = [
            Message::system(APOLOGY_INSTRUCTION),
            Message::user(format!(
                "A problem occurred while handling the guest's request: {situation}\n\n\
                 Write a polite, brief message explaining that something went wrong and suggest trying again."
            )),
        ];
        match self.llm.complete(&messages, &[]).await {
            Ok(c) if !c.content.trim().is_empty() => c.content.trim().to_string(),
            Ok(_) => GENERIC_APOLOGY.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "could not phrase apology, using fixed text");
                GENERIC_APOLOGY.to_string()
            }
        }
    }

    /// 释放 Tool Provider 会话与 peer 注册表
    /// Completion Service 的累计 token 用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn shutdown(mut self) {
        let (prompt_tokens, completion_tokens, total_tokens) = self.token_usage();
        tracing::info!(prompt_tokens, completion_tokens, total_tokens, "completion service usage");
        self.tools.cleanup().await;
        if let Some(peers) = self.peers.as_mut() {
            peers.cleanup();
        }
        tracing::info!("orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::{AgentSkill, RemoteAgent};
    use crate::auth::AuthError;
    use crate::conversation::Role;
    use crate::llm::{Completion, LlmError, RateLimitInfo, ScriptedLlmClient};
    use crate::tools::{ToolDescriptor, ToolError};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 记录调用并按脚本返回结果的 Tool Provider
    #[derive(Default)]
    struct FakeTools {
        tools: Vec<ToolDescriptor>,
        results: Mutex<VecDeque<Result<ToolInvocationResult, ToolError>>>,
        calls: Mutex<Vec<(String, Option<String>)>>,
        list_error: bool,
        cleaned: AtomicUsize,
    }

    impl FakeTools {
        fn new(names: &[&str], results: Vec<Result<ToolInvocationResult, ToolError>>) -> Self {
            Self {
                tools: names
                    .iter()
                    .map(|n| ToolDescriptor::new(*n, format!("{n} tool"), json!({"type": "object"})))
                    .collect(),
                results: Mutex::new(results.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolProvider for FakeTools {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
            if self.list_error {
                return Err(ToolError::Transport("connection refused".into()));
            }
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: &Map<String, Value>,
            bearer: Option<&str>,
        ) -> Result<ToolInvocationResult, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), bearer.map(String::from)));
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ToolInvocationResult::text("ok")))
        }

        async fn cleanup(&self) {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeExchange {
        outcome: Result<String, ()>,
        calls: AtomicUsize,
    }

    impl FakeExchange {
        fn ok(token: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(token.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialExchange for FakeExchange {
        async fn exchange(&self, _inbound: &str) -> Result<ExchangedCredential, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(token) => Ok(ExchangedCredential {
                    token: token.clone(),
                    subject: "john.doe@gravitee.io".to_string(),
                }),
                Err(()) => Err(AuthError::InvalidToken),
            }
        }
    }

    fn call(id: &str, name: &str, args: Value) -> Completion {
        Completion::with_call(ToolInvocationRequest::new(
            id,
            name,
            args.as_object().cloned().unwrap_or_default(),
        ))
    }

    fn orchestrator(llm: Arc<ScriptedLlmClient>, tools: Arc<FakeTools>) -> Orchestrator {
        Orchestrator::new(llm, tools, "system").with_friendly_errors(false)
    }

    fn unauthorized() -> Result<ToolInvocationResult, ToolError> {
        Ok(ToolInvocationResult::error("HTTP 401: Unauthorized"))
    }

    #[tokio::test]
    async fn test_direct_answer_without_tools() {
        let llm = Arc::new(ScriptedLlmClient::replying(&["Bonjour! How can I help?"]));
        let tools = Arc::new(FakeTools::new(&["getAccommodations"], vec![]));
        let reply = orchestrator(llm.clone(), tools.clone()).handle_request("hello", None).await;
        assert_eq!(reply, "Bonjour! How can I help?");
        assert!(tools.calls().is_empty());
        assert_eq!(llm.calls()[0].tool_names, vec!["getAccommodations"]);
    }

    #[tokio::test]
    async fn test_empty_first_answer_uses_fallback() {
        let llm = Arc::new(ScriptedLlmClient::replying(&["   "]));
        let tools = Arc::new(FakeTools::new(&[], vec![]));
        let reply = orchestrator(llm, tools).handle_request("hi", None).await;
        assert_eq!(reply, CAPABILITY_FALLBACK);
    }

    #[tokio::test]
    async fn test_empty_message_makes_no_calls() {
        let llm = Arc::new(ScriptedLlmClient::replying(&["unused"]));
        let tools = Arc::new(FakeTools::new(&["getBookings"], vec![]));
        let reply = orchestrator(llm.clone(), tools.clone()).handle_request("  ", None).await;
        assert_eq!(reply, CAPABILITY_FALLBACK);
        assert_eq!(llm.call_count(), 0);
        assert!(tools.calls().is_empty());
    }

    #[tokio::test]
    async fn test_public_tool_then_answer() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "getAccommodations", json!({"location": "Paris"}))),
            Ok(Completion::text("  I found 3 hotels in Paris.  ")),
        ]));
        let tools = Arc::new(FakeTools::new(
            &["getAccommodations"],
            vec![Ok(ToolInvocationResult::text("[Hotel A, Hotel B, Hotel C]"))],
        ));
        let exchange = FakeExchange::ok("unused");
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_exchanger(Some(exchange.clone()))
            .handle_request("hotels in Paris", None)
            .await;
        assert_eq!(reply, "I found 3 hotels in Paris.");
        assert_eq!(tools.calls(), vec![("getAccommodations".to_string(), None)]);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);

        // 第二次补全看到成对的调用轮与结果轮
        let second = &llm.calls()[1].messages;
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[3].role, Role::Tool);
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_only_first_call_executed() {
        let mut completion = call("c1", "getAccommodations", json!({}));
        completion.tool_calls.push(ToolInvocationRequest::new("c2", "getBookings", Map::new()));
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(completion), Ok(Completion::text("done"))]));
        let tools = Arc::new(FakeTools::new(&["getAccommodations", "getBookings"], vec![]));
        let reply = orchestrator(llm, tools.clone()).handle_request("both", None).await;
        assert_eq!(reply, "done");
        assert_eq!(tools.calls().len(), 1);
        assert_eq!(tools.calls()[0].0, "getAccommodations");
    }

    #[tokio::test]
    async fn test_escalation_success_retries_with_exchanged_token() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "getBookings", json!({}))),
            Ok(Completion::text("You have 2 bookings.")),
        ]));
        let tools = Arc::new(FakeTools::new(
            &["getBookings"],
            vec![unauthorized(), Ok(ToolInvocationResult::text("[1, 2]"))],
        ));
        let exchange = FakeExchange::ok("exchanged-token");
        let reply = orchestrator(llm, tools.clone())
            .with_exchanger(Some(exchange.clone()))
            .handle_request("show my bookings", Some("Bearer user-token"))
            .await;
        assert_eq!(reply, "You have 2 bookings.");
        assert_eq!(
            tools.calls(),
            vec![
                ("getBookings".to_string(), None),
                ("getBookings".to_string(), Some("exchanged-token".to_string())),
            ]
        );
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_escalation_without_credential_asks_to_sign_in() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(call("c1", "getBookings", json!({})))]));
        let tools = Arc::new(FakeTools::new(&["getBookings"], vec![unauthorized()]));
        let exchange = FakeExchange::ok("unused");
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_exchanger(Some(exchange.clone()))
            .handle_request("show my bookings", None)
            .await;
        assert_eq!(reply, SIGN_IN_MESSAGE);
        assert_eq!(tools.calls().len(), 1);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exchange_failure_asks_to_sign_in() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(call("c1", "makeBooking", json!({})))]));
        let tools = Arc::new(FakeTools::new(&["makeBooking"], vec![unauthorized()]));
        let reply = orchestrator(llm, tools.clone())
            .with_exchanger(Some(FakeExchange::failing()))
            .handle_request("book it", Some("Bearer expired"))
            .await;
        assert_eq!(reply, SIGN_IN_MESSAGE);
        assert_eq!(tools.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_after_escalation_is_no_permission() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(call("c1", "deleteBooking", json!({"id": 1})))]));
        let tools = Arc::new(FakeTools::new(
            &["deleteBooking"],
            vec![
                unauthorized(),
                Ok(ToolInvocationResult::error("HTTP 403: Forbidden by AuthZen policy")),
            ],
        ));
        let reply = orchestrator(llm, tools)
            .with_exchanger(Some(FakeExchange::ok("t")))
            .handle_request("cancel booking 1", Some("Bearer u"))
            .await;
        assert_eq!(reply, NO_PERMISSION_MESSAGE);
    }

    #[tokio::test]
    async fn test_second_failure_without_denial_asks_to_sign_in() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(call("c1", "getBookings", json!({})))]));
        let tools = Arc::new(FakeTools::new(
            &["getBookings"],
            vec![unauthorized(), Ok(ToolInvocationResult::error("session expired"))],
        ));
        let reply = orchestrator(llm, tools)
            .with_exchanger(Some(FakeExchange::ok("t")))
            .handle_request("bookings", Some("Bearer u"))
            .await;
        assert_eq!(reply, SIGN_IN_MESSAGE);
    }

    #[tokio::test]
    async fn test_validation_error_is_not_escalated() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "getAccommodations", json!({"location": ""}))),
            Ok(Completion::text("Which city would you like to stay in?")),
        ]));
        let tools = Arc::new(FakeTools::new(
            &["getAccommodations"],
            vec![Ok(ToolInvocationResult::error("HTTP 422: location must not be empty"))],
        ));
        let exchange = FakeExchange::ok("unused");
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_exchanger(Some(exchange.clone()))
            .handle_request("find me a hotel", None)
            .await;
        assert_eq!(reply, "Which city would you like to stay in?");
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tools.calls().len(), 1);
        assert_eq!(
            llm.calls()[1].messages[3].content.as_deref(),
            Some("HTTP 422: location must not be empty")
        );
    }

    #[tokio::test]
    async fn test_non_auth_error_after_escalation_is_fed_back() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "makeBooking", json!({"accommodation_id": 1}))),
            Ok(Completion::text("Check-out must be after check-in.")),
        ]));
        let tools = Arc::new(FakeTools::new(
            &["makeBooking"],
            vec![
                unauthorized(),
                Ok(ToolInvocationResult::error("HTTP 422: check_out must be after check_in")),
            ],
        ));
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_exchanger(Some(FakeExchange::ok("t")))
            .handle_request("book May 5 to May 3", Some("Bearer u"))
            .await;
        assert_eq!(reply, "Check-out must be after check-in.");
        assert_eq!(llm.call_count(), 2);
        assert_eq!(tools.calls()[1], ("makeBooking".to_string(), Some("t".to_string())));
    }

    #[tokio::test]
    async fn test_second_unauthorized_after_escalation_asks_to_sign_in() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(call("c1", "getBookings", json!({})))]));
        let tools = Arc::new(FakeTools::new(&["getBookings"], vec![unauthorized(), unauthorized()]));
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_exchanger(Some(FakeExchange::ok("t")))
            .handle_request("bookings", Some("Bearer u"))
            .await;
        assert_eq!(reply, SIGN_IN_MESSAGE);
        assert_eq!(tools.calls().len(), 2);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exchange_happens_once_per_request() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "getBookings", json!({}))),
            Ok(call("c2", "makeBooking", json!({"accommodation_id": 1}))),
            Ok(Completion::text("Booked!")),
        ]));
        let tools = Arc::new(FakeTools::new(
            &["getBookings", "makeBooking"],
            vec![
                unauthorized(),
                Ok(ToolInvocationResult::text("[]")),
                Ok(ToolInvocationResult::text("booking 3 created")),
            ],
        ));
        let exchange = FakeExchange::ok("tool-token");
        let reply = orchestrator(llm, tools.clone())
            .with_exchanger(Some(exchange.clone()))
            .handle_request("book a room", Some("Bearer u"))
            .await;
        assert_eq!(reply, "Booked!");
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        // 已有升级凭证后，后续调用直接携带
        assert_eq!(tools.calls()[2], ("makeBooking".to_string(), Some("tool-token".to_string())));
    }

    #[tokio::test]
    async fn test_exchange_not_cached_across_requests() {
        let exchange = FakeExchange::ok("t");
        let tools = Arc::new(FakeTools::new(
            &["getBookings"],
            vec![unauthorized(), Ok(ToolInvocationResult::text("[]")), unauthorized(), Ok(ToolInvocationResult::text("[]"))],
        ));
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "getBookings", json!({}))),
            Ok(Completion::text("none")),
            Ok(call("c1", "getBookings", json!({}))),
            Ok(Completion::text("none")),
        ]));
        let orch = orchestrator(llm, tools).with_exchanger(Some(exchange.clone()));
        orch.handle_request("bookings", Some("Bearer u")).await;
        orch.handle_request("bookings", Some("Bearer u")).await;
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_error_without_exchanger_is_fed_back() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "get_exchange_rate", json!({"currency_date": "bad"}))),
            Ok(Completion::text("Please give a valid date.")),
        ]));
        let tools = Arc::new(FakeTools::new(
            &["get_exchange_rate"],
            vec![Ok(ToolInvocationResult::error("Invalid currency_date"))],
        ));
        let reply = orchestrator(llm.clone(), tools).handle_request("rate on bad date", None).await;
        assert_eq!(reply, "Please give a valid date.");
        let fed_back = &llm.calls()[1].messages[3];
        assert_eq!(fed_back.content.as_deref(), Some("Invalid currency_date"));
    }

    #[tokio::test]
    async fn test_denial_without_exchanger_short_circuits() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(call("c1", "getBookings", json!({})))]));
        let tools = Arc::new(FakeTools::new(
            &["getBookings"],
            vec![Ok(ToolInvocationResult::error("access denied"))],
        ));
        let reply = orchestrator(llm.clone(), tools).handle_request("bookings", None).await;
        assert_eq!(reply, NO_PERMISSION_MESSAGE);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back_as_error() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "launch_rockets", json!({}))),
            Ok(Completion::text("Sorry, I can't do that.")),
        ]));
        let tools = Arc::new(FakeTools::new(&["getBookings"], vec![]));
        let reply = orchestrator(llm.clone(), tools.clone()).handle_request("launch", None).await;
        assert_eq!(reply, "Sorry, I can't do that.");
        assert!(tools.calls().is_empty());
        let tool_turn = &llm.calls()[1].messages[3];
        assert!(tool_turn.content.as_deref().unwrap_or_default().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_round_budget_forces_final_answer_without_tools() {
        let mut script: Vec<Result<Completion, LlmError>> = (0..4)
            .map(|i| Ok(call(&format!("c{i}"), "getAccommodations", json!({}))))
            .collect();
        script.push(Ok(Completion::text(" Here is what I found. ")));
        let llm = Arc::new(ScriptedLlmClient::new(script));
        let tools = Arc::new(FakeTools::new(&["getAccommodations"], vec![]));
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_max_rounds(3)
            .handle_request("loop forever", None)
            .await;
        assert_eq!(reply, "Here is what I found.");
        assert_eq!(tools.calls().len(), 3);
        let calls = llm.calls();
        assert_eq!(calls.len(), 5);
        assert!(calls[4].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_default_budget_is_five_rounds_plus_final_answer() {
        let mut script: Vec<Result<Completion, LlmError>> = (0..6)
            .map(|i| Ok(call(&format!("c{i}"), "getAccommodations", json!({}))))
            .collect();
        script.push(Ok(Completion::text("Here are the hotels I found.")));
        let llm = Arc::new(ScriptedLlmClient::new(script));
        let tools = Arc::new(FakeTools::new(&["getAccommodations"], vec![]));
        let reply = orchestrator(llm.clone(), tools.clone())
            .handle_request("keep searching", None)
            .await;
        assert_eq!(reply, "Here are the hotels I found.");
        assert_eq!(tools.calls().len(), 5);
        let calls = llm.calls();
        assert_eq!(calls.len(), 7);
        assert!(calls[..6].iter().all(|c| !c.tool_names.is_empty()));
        assert!(calls[6].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_becomes_wait_message() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::RateLimited(RateLimitInfo {
            reset: Some("45".to_string()),
            quota: Some(100),
            remaining: Some(0),
        }))]));
        let tools = Arc::new(FakeTools::new(&[], vec![]));
        let reply = orchestrator(llm, tools).handle_request("hi", None).await;
        assert!(reply.contains("about 45 seconds"), "{reply}");
    }

    #[tokio::test]
    async fn test_unparsable_reset_is_generic_wait() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::RateLimited(RateLimitInfo {
            reset: Some("later".to_string()),
            ..Default::default()
        }))]));
        let reply = orchestrator(llm, Arc::new(FakeTools::new(&[], vec![])))
            .handle_request("hi", None)
            .await;
        assert!(reply.contains("wait a moment"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_generic_apology() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Http {
            status: 500,
            message: "Traceback (most recent call last)".to_string(),
        })]));
        let reply = orchestrator(llm, Arc::new(FakeTools::new(&[], vec![])))
            .handle_request("hi", None)
            .await;
        assert_eq!(reply, GENERIC_APOLOGY);
    }

    #[tokio::test]
    async fn test_friendly_apology_uses_secondary_completion() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Timeout),
            Ok(Completion::text("Sorry, I'm a bit slow right now, please try again.")),
        ]));
        let orch = Orchestrator::new(llm.clone(), Arc::new(FakeTools::new(&[], vec![])), "system");
        let reply = orch.handle_request("hi", None).await;
        assert_eq!(reply, "Sorry, I'm a bit slow right now, please try again.");
        let apology_call = &llm.calls()[1];
        assert!(apology_call.tool_names.is_empty());
        assert!(!apology_call.messages[1]
            .content
            .as_deref()
            .unwrap_or_default()
            .contains("timeout"));
    }

    #[tokio::test]
    async fn test_friendly_apology_falls_back_to_fixed_text() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Network("refused".into())),
            Err(LlmError::Network("refused".into())),
        ]));
        let orch = Orchestrator::new(llm, Arc::new(FakeTools::new(&[], vec![])), "system");
        assert_eq!(orch.handle_request("hi", None).await, GENERIC_APOLOGY);
    }

    #[tokio::test]
    async fn test_tool_listing_failure_is_apology() {
        let llm = Arc::new(ScriptedLlmClient::replying(&["unused"]));
        let tools = Arc::new(FakeTools {
            list_error: true,
            ..Default::default()
        });
        let reply = orchestrator(llm.clone(), tools).handle_request("hi", None).await;
        assert_eq!(reply, GENERIC_APOLOGY);
        assert_eq!(llm.call_count(), 0);
    }

    fn currency_agent(endpoint: &str) -> RemoteAgent {
        RemoteAgent {
            name: "Currency Agent".to_string(),
            description: "Helps with exchange rates for currencies".to_string(),
            version: "1.0.0".to_string(),
            url: "http://internal/".to_string(),
            endpoint: endpoint.to_string(),
            skills: vec![AgentSkill {
                id: "convert_currency".to_string(),
                name: "Currency Exchange Rates Tool".to_string(),
                description: "Helps with exchange values between various currencies".to_string(),
                tags: vec!["currency conversion".to_string(), "currency exchange".to_string()],
            }],
        }
    }

    #[tokio::test]
    async fn test_delegate_tool_offered_with_closed_agent_names() {
        let mut peers = PeerRegistry::new(5).unwrap();
        peers.register(currency_agent("http://127.0.0.1:1"));
        let llm = Arc::new(ScriptedLlmClient::replying(&["ok"]));
        let tools = Arc::new(FakeTools::new(&["getAccommodations"], vec![]));
        orchestrator(llm.clone(), tools).with_peers(peers).handle_request("hi", None).await;

        let names = &llm.calls()[0].tool_names;
        assert_eq!(names, &vec!["getAccommodations".to_string(), "delegate_to_agent".to_string()]);
    }

    #[tokio::test]
    async fn test_delegation_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/currency"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": "x",
                "result": {"kind": "message", "role": "agent", "parts": [{"kind": "text", "text": "100 EUR = 108.20 USD"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut peers = PeerRegistry::new(5).unwrap();
        peers.register(currency_agent(&format!("{}/currency", server.uri())));
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "delegate_to_agent", json!({"agent_name": "Currency Agent", "message": "convert 100 EUR to USD"}))),
            Ok(Completion::text("That's about 108 USD.")),
        ]));
        let tools = Arc::new(FakeTools::new(&["getAccommodations"], vec![]));
        let reply = orchestrator(llm.clone(), tools.clone())
            .with_peers(peers)
            .handle_request("how much is 100 EUR in USD?", None)
            .await;
        assert_eq!(reply, "That's about 108 USD.");
        assert!(tools.calls().is_empty());
        assert_eq!(
            llm.calls()[1].messages[3].content.as_deref(),
            Some("100 EUR = 108.20 USD")
        );
    }

    #[tokio::test]
    async fn test_delegation_by_skill_keyword_and_failure_is_fed_back() {
        let mut peers = PeerRegistry::new(2).unwrap();
        peers.register(currency_agent("http://127.0.0.1:1/unreachable"));
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(call("c1", "delegate_to_agent", json!({"agent_name": "currency", "message": "rate?"}))),
            Ok(Completion::text("The currency service is unavailable.")),
        ]));
        let reply = orchestrator(llm.clone(), Arc::new(FakeTools::new(&[], vec![])))
            .with_peers(peers)
            .handle_request("rate?", None)
            .await;
        assert_eq!(reply, "The currency service is unavailable.");
        let tool_turn = llm.calls()[1].messages[3].content.clone().unwrap_or_default();
        assert!(tool_turn.contains("Currency Agent"));
    }

    /// 只报告用量的 LLM 替身
    struct MeteredLlm;

    #[async_trait]
    impl LlmClient for MeteredLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<Completion, LlmError> {
            Ok(Completion::text("hello"))
        }

        fn token_usage(&self) -> (u64, u64, u64) {
            (12, 3, 15)
        }
    }

    #[tokio::test]
    async fn test_token_usage_comes_from_completion_service() {
        let orch = Orchestrator::new(Arc::new(MeteredLlm), Arc::new(FakeTools::new(&[], vec![])), "system");
        assert_eq!(orch.handle_request("hi", None).await, "hello");
        assert_eq!(orch.token_usage(), (12, 3, 15));
        orch.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_handles() {
        let tools = Arc::new(FakeTools::new(&[], vec![]));
        let mut peers = PeerRegistry::new(5).unwrap();
        peers.register(currency_agent("http://127.0.0.1:1"));
        let orch = orchestrator(Arc::new(ScriptedLlmClient::replying(&[])), tools.clone()).with_peers(peers);
        orch.shutdown().await;
        assert_eq!(tools.cleaned.load(Ordering::SeqCst), 1);
    }
}
