//! One user turn, end to end.
//!
//! ```text
//! ceiling check ─► route ─► history ─► append user msg ─► assemble context
//!       ─► stream ─► demultiplex ─► append assistant msg
//!       ─► per ready tool: permit ─► hooks ─► parse ─► execute (dedup)
//!       ─► optional legacy marker pass (same gate)
//! ```
//!
//! The orchestrator holds no per-conversation state. Every call gets an
//! explicit [`Session`]. Cancelling the future (dropping it) stops reading
//! the backend; tool calls only run after the stream has fully resolved, so
//! an interrupted stream never executes a partial invocation.

use blv_config::{AppConfig, ContextLimits};
use blv_core::error::Result;
use blv_core::message::{Message, Role, Session};
use blv_core::provider::{Provider, ProviderRequest};
use blv_core::store::KnowledgeStore;
use blv_core::tool::{ToolChoice, ToolKind};
use blv_hooks::{Decision, HookEngine, HookPhase};
use blv_router::{Router, RoutingConfig, RoutingPolicy};
use blv_store::Deduplicator;
use blv_tools::{ToolCall, ToolExecutor, definitions};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::context::{AssembledContext, ContextAssembler};
use crate::event::{TurnEvent, TurnStatus, TurnSummary};
use crate::markers;
use crate::multiplexer::{OutputEvent, consume};

pub const DEFAULT_TOKEN_CEILING: u64 = 200_000;

pub struct Orchestrator {
    /// Backend for the main completion stream
    provider: Arc<dyn Provider>,

    /// Knowledge, conversations and findings
    store: Arc<dyn KnowledgeStore>,

    router: Router,

    assembler: ContextAssembler,

    executor: ToolExecutor,

    /// Hook phase evaluated before every tool call
    phase: HookPhase,

    /// Conversations at or above this many tokens refuse new turns
    token_ceiling: u64,

    /// Scan finalized text for `[FINDING: ...]` markers
    legacy_markers: bool,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn KnowledgeStore>, router: Router) -> Self {
        Self {
            assembler: ContextAssembler::new(store.clone(), ContextLimits::default()),
            executor: ToolExecutor::new(Deduplicator::new(store.clone())),
            provider,
            store,
            router,
            phase: HookPhase::PreTool,
            token_ceiling: DEFAULT_TOKEN_CEILING,
            legacy_markers: false,
        }
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        store: Arc<dyn KnowledgeStore>,
        config: &AppConfig,
    ) -> Self {
        let router = Router::from_config(provider.clone(), config);
        let assembler = ContextAssembler::new(store.clone(), config.context.clone())
            .with_reply_language(config.reply_language.clone());
        Self::new(provider, store, router)
            .with_assembler(assembler)
            .with_token_ceiling(config.conversation.token_ceiling)
            .with_legacy_markers(config.legacy_markers)
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_token_ceiling(mut self, ceiling: u64) -> Self {
        self.token_ceiling = ceiling;
        self
    }

    /// Enable or disable the `[FINDING: ...]` post-processing pass.
    pub fn with_legacy_markers(mut self, enabled: bool) -> Self {
        self.legacy_markers = enabled;
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn policy(&self) -> &RoutingPolicy {
        self.router.policy()
    }

    /// Run one turn, emitting [`TurnEvent`]s as it goes.
    ///
    /// `events` must be drained while the turn runs (or be large enough to
    /// hold the whole turn). A dropped receiver does not stop the turn.
    ///
    /// Only store failures are returned as errors. Backend and tool failures
    /// are reported as events and reflected in the summary.
    pub async fn process_turn(
        &self,
        session: &Session,
        message: &str,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Result<TurnSummary> {
        let conversation = &session.conversation_id;
        let mut summary = TurnSummary::default();

        let used = self.store.conversation_tokens(conversation).await?;
        if used >= self.token_ceiling {
            warn!(
                conversation = %conversation.as_str(),
                used,
                limit = self.token_ceiling,
                "Token ceiling reached, turn refused"
            );
            emit(
                events,
                TurnEvent::TokenLimitReached {
                    used,
                    limit: self.token_ceiling,
                },
            )
            .await;
            summary.status = TurnStatus::TokenLimitReached;
            return Ok(summary);
        }

        let routing = self.router.route(message).await;
        summary.intent = routing.intent;
        if let Some(intent) = routing.intent {
            emit(events, TurnEvent::Intent { intent }).await;
        }
        info!(
            intent = ?routing.intent,
            model = %routing.model_id,
            context = %routing.context_detail,
            tools = routing.advertised_tools().len(),
            "Turn routed"
        );

        let mut history = self
            .store
            .get_history(conversation, session.history_limit)
            .await?;
        history.retain(|m| !m.is_blank());

        self.store
            .append_message(conversation, Role::User, message, estimate_tokens(message))
            .await?;

        let context = self.assembler.build(routing.context_detail).await?;
        let request = build_request(&routing, &context, history, message);
        debug!(
            messages = request.messages.len(),
            system_blocks = request.system.len(),
            thinking = ?request.thinking_budget,
            "Sending request"
        );

        let ready = match self.provider.stream(request).await {
            Ok(rx) => self.demultiplex(consume(rx), events, &mut summary).await,
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Backend stream failed to open");
                summary.status = TurnStatus::StreamFailed;
                emit(events, TurnEvent::StreamError { message: e.to_string() }).await;
                Vec::new()
            }
        };

        if !summary.text.trim().is_empty() {
            let tokens = summary
                .usage
                .map(|u| u.output_tokens)
                .filter(|t| *t > 0)
                .unwrap_or_else(|| estimate_tokens(&summary.text));
            self.store
                .append_message(conversation, Role::Assistant, &summary.text, tokens)
                .await?;
        }

        let found = if self.legacy_markers && summary.status == TurnStatus::Completed {
            markers::extract(&summary.text)
        } else {
            Vec::new()
        };

        if !ready.is_empty() || !found.is_empty() {
            let engine = HookEngine::load(self.store.as_ref(), &self.phase).await?;

            for (name, args) in ready {
                self.run_tool(&routing, &engine, name, args, events, &mut summary)
                    .await;
            }

            if !found.is_empty() {
                debug!(count = found.len(), "Legacy finding markers found");
            }
            for marker in found {
                let args = serde_json::to_value(marker)?;
                let name = ToolKind::SaveEvent.name().to_string();
                self.run_tool(&routing, &engine, name, args, events, &mut summary)
                    .await;
            }
        }

        emit(
            events,
            TurnEvent::Done {
                conversation_id: conversation.as_str().to_string(),
            },
        )
        .await;
        Ok(summary)
    }

    /// Forward the stream as turn events. Returns the tools that resolved.
    async fn demultiplex(
        &self,
        mut stream: crate::multiplexer::OutputStream,
        events: &mpsc::Sender<TurnEvent>,
        summary: &mut TurnSummary,
    ) -> Vec<(String, Value)> {
        let mut ready = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                OutputEvent::ReasoningStart => emit(events, TurnEvent::ReasoningStart).await,
                OutputEvent::ReasoningChunk { text } => {
                    summary.reasoning.push_str(&text);
                    emit(events, TurnEvent::Reasoning { text }).await;
                }
                OutputEvent::ContentChunk { text } => {
                    summary.text.push_str(&text);
                    emit(events, TurnEvent::Content { text }).await;
                }
                OutputEvent::ToolStart { name, .. } => {
                    emit(events, TurnEvent::ToolStart { name }).await;
                }
                OutputEvent::ToolReady { name, args, .. } => ready.push((name, args)),
                OutputEvent::ToolError { name, reason, .. } => {
                    warn!(tool = %name, reason = %reason, "Tool arguments did not parse");
                    summary.failed += 1;
                    emit(events, TurnEvent::ToolArgsInvalid { name, reason }).await;
                }
                OutputEvent::UsageFinal { usage } => {
                    debug!(
                        input = usage.input_tokens,
                        cache_read = usage.cache_read_tokens,
                        output = usage.output_tokens,
                        "Usage"
                    );
                    summary.usage = Some(usage);
                    emit(events, TurnEvent::Usage { usage }).await;
                }
                OutputEvent::StreamError { message } => {
                    warn!(error = %message, "Backend stream interrupted");
                    summary.status = TurnStatus::StreamFailed;
                    emit(events, TurnEvent::StreamError { message }).await;
                }
            }
        }
        ready
    }

    /// Permit, gate and execute one tool invocation.
    async fn run_tool(
        &self,
        routing: &RoutingConfig,
        engine: &HookEngine,
        name: String,
        args: Value,
        events: &mpsc::Sender<TurnEvent>,
        summary: &mut TurnSummary,
    ) {
        let Some(kind) = ToolKind::from_name(&name) else {
            warn!(tool = %name, "Unknown tool dropped");
            summary.dropped += 1;
            emit(
                events,
                TurnEvent::ToolDropped {
                    name,
                    reason: "unknown tool".into(),
                },
            )
            .await;
            return;
        };

        if !routing.permits(kind) {
            warn!(tool = %name, intent = ?routing.intent, "Tool not enabled for this turn, dropped");
            summary.dropped += 1;
            emit(
                events,
                TurnEvent::ToolDropped {
                    name,
                    reason: "not enabled for this turn".into(),
                },
            )
            .await;
            return;
        }

        let gated = engine.evaluate(&self.phase, &name, args);
        match gated.decision {
            Decision::Deny => {
                summary.denied += 1;
                emit(
                    events,
                    TurnEvent::HookDenied {
                        hook: gated.hook,
                        tool: name,
                        message: gated.message.unwrap_or_default(),
                    },
                )
                .await;
                return;
            }
            Decision::Warn => {
                emit(
                    events,
                    TurnEvent::HookWarning {
                        hook: gated.hook.clone(),
                        tool: name.clone(),
                        message: gated.message.clone().unwrap_or_default(),
                    },
                )
                .await;
            }
            Decision::Allow => {}
        }

        let result = match ToolCall::parse(kind, gated.args) {
            Ok(call) => self.executor.execute(call).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                emit(
                    events,
                    TurnEvent::ToolResult {
                        tool: kind,
                        output: outcome.render(),
                        outcome: outcome.clone(),
                    },
                )
                .await;
                summary.outcomes.push(outcome);
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool call failed");
                summary.failed += 1;
                emit(
                    events,
                    TurnEvent::ToolFailed {
                        tool: name,
                        reason: e.to_string(),
                    },
                )
                .await;
            }
        }
    }
}

fn build_request(
    routing: &RoutingConfig,
    context: &AssembledContext,
    mut history: Vec<Message>,
    message: &str,
) -> ProviderRequest {
    history.push(Message::user(message));
    let tools = definitions(&routing.advertised_tools());
    let tool_choice = if tools.is_empty() {
        ToolChoice::None
    } else {
        routing.tool_choice.clone()
    };

    ProviderRequest {
        model: routing.model_id.clone(),
        system: context.system_blocks(),
        messages: history,
        temperature: routing.request_temperature(),
        max_tokens: routing.max_output_tokens,
        tools,
        tool_choice,
        thinking_budget: routing
            .reasoning_enabled()
            .then_some(routing.reasoning_budget),
    }
}

/// Rough token count: four characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX)
}

async fn emit(events: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    if events.send(event).await.is_err() {
        trace!("Turn event receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blv_config::ModelsConfig;
    use blv_router::Intent;

    #[test]
    fn token_estimate_counts_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn request_without_tools_forces_none() {
        let policy = RoutingPolicy::new(ModelsConfig::default());
        let routing = policy.resolve(Intent::Memory);
        let request = build_request(&routing, &AssembledContext::default(), Vec::new(), "what did I test?");
        assert!(request.tools.is_empty());
        assert_eq!(request.tool_choice, ToolChoice::None);
        assert_eq!(request.messages.len(), 1);
        assert!(request.system.is_empty());
        assert_eq!(request.model, ModelsConfig::default().fast);
    }

    #[test]
    fn idea_request_forces_suggest_test() {
        let policy = RoutingPolicy::new(ModelsConfig::default());
        let routing = policy.resolve(Intent::Idea);
        let request = build_request(&routing, &AssembledContext::default(), Vec::new(), "idea?");
        assert_eq!(request.tool_choice, ToolChoice::Tool(ToolKind::SuggestTest));
        let names: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["suggest_test"]);
        assert_eq!(request.temperature, Some(0.85));
    }

    #[test]
    fn thinking_request_drops_temperature() {
        let policy = RoutingPolicy::new(ModelsConfig::default())
            .with_thinking(blv_config::ThinkingMode::Normal);
        let routing = policy.resolve(Intent::Chat);
        let request = build_request(&routing, &AssembledContext::default(), Vec::new(), "hi");
        assert_eq!(request.thinking_budget, Some(16000));
        assert!(request.temperature.is_none());
        assert_eq!(request.max_tokens, 2048 + 16000);
        assert_eq!(request.tools.len(), 4);
    }
}
