//! Static per-intent routing table.

use blv_config::{AppConfig, ModelsConfig, ThinkingMode};
use blv_core::tool::{ToolChoice, ToolKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::intent::Intent;

/// Model capability tier, resolved to a model id through [`ModelsConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Standard,
    Deep,
}

impl ModelTier {
    pub fn model_id<'a>(&self, models: &'a ModelsConfig) -> &'a str {
        match self {
            ModelTier::Fast => &models.fast,
            ModelTier::Standard => &models.standard,
            ModelTier::Deep => &models.deep,
        }
    }
}

/// How much of the knowledge store goes into the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextDetail {
    /// Rules, plans, triggers, prompts, recent events and captured requests.
    Full,
    /// Every stored event with its status.
    EventsOnly,
    /// Anti-duplication instruction plus the latest events.
    Minimal,
}

impl ContextDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextDetail::Full => "full",
            ContextDetail::EventsOnly => "events-only",
            ContextDetail::Minimal => "minimal",
        }
    }
}

impl fmt::Display for ContextDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution parameters for one turn. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// `None` when routing is disabled.
    pub intent: Option<Intent>,
    pub tier: ModelTier,
    pub model_id: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub tool_choice: ToolChoice,
    pub allowed_tools: Vec<ToolKind>,
    pub context_detail: ContextDetail,
    /// Extended reasoning budget; 0 disables reasoning.
    pub reasoning_budget: u32,
}

impl RoutingConfig {
    /// Tools are advertised only when the choice is not `none` and the
    /// allow-list is non-empty.
    pub fn advertises_tools(&self) -> bool {
        self.tool_choice.allows_tools() && !self.allowed_tools.is_empty()
    }

    pub fn permits(&self, kind: ToolKind) -> bool {
        self.advertises_tools() && self.allowed_tools.contains(&kind)
    }

    /// Tools to advertise, in registry order.
    pub fn advertised_tools(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| self.permits(*kind))
            .collect()
    }

    pub fn reasoning_enabled(&self) -> bool {
        self.reasoning_budget > 0
    }

    /// The backend rejects a temperature alongside extended reasoning.
    pub fn request_temperature(&self) -> Option<f32> {
        (!self.reasoning_enabled()).then_some(self.temperature)
    }
}

struct PolicyRow {
    tier: ModelTier,
    tool_choice: ToolChoice,
    temperature: f32,
    max_tokens: u32,
    tools: &'static [ToolKind],
    context: ContextDetail,
}

fn row(intent: Intent) -> PolicyRow {
    match intent {
        Intent::Save => PolicyRow {
            tier: ModelTier::Standard,
            tool_choice: ToolChoice::Auto,
            temperature: 0.2,
            max_tokens: 512,
            tools: &[ToolKind::SaveEvent],
            context: ContextDetail::Minimal,
        },
        Intent::Idea => PolicyRow {
            tier: ModelTier::Standard,
            tool_choice: ToolChoice::Tool(ToolKind::SuggestTest),
            temperature: 0.85,
            max_tokens: 1500,
            tools: &[ToolKind::SuggestTest],
            context: ContextDetail::EventsOnly,
        },
        Intent::Memory => PolicyRow {
            tier: ModelTier::Fast,
            tool_choice: ToolChoice::None,
            temperature: 0.1,
            max_tokens: 1024,
            tools: &[],
            context: ContextDetail::EventsOnly,
        },
        Intent::Chat => PolicyRow {
            tier: ModelTier::Standard,
            tool_choice: ToolChoice::Auto,
            temperature: 0.6,
            max_tokens: 2048,
            tools: &ToolKind::ALL,
            context: ContextDetail::Full,
        },
    }
}

const ANALYSIS_TEMPERATURE: f32 = 0.3;
const ANALYSIS_MAX_TOKENS: u32 = 64_000;

/// Resolves intents to [`RoutingConfig`]s.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    models: ModelsConfig,
    thinking: ThinkingMode,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl RoutingPolicy {
    pub fn new(models: ModelsConfig) -> Self {
        Self {
            models,
            thinking: ThinkingMode::None,
            default_temperature: 0.7,
            default_max_tokens: 8192,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            models: config.models.clone(),
            thinking: config.thinking,
            default_temperature: config.default_temperature,
            default_max_tokens: config.default_max_tokens,
        }
    }

    pub fn with_thinking(mut self, thinking: ThinkingMode) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn resolve(&self, intent: Intent) -> RoutingConfig {
        self.build(Some(intent), row(intent))
    }

    /// Used when routing is disabled: the CHAT tool surface and context with
    /// the configured default temperature and output budget.
    pub fn unrouted(&self) -> RoutingConfig {
        self.build(
            None,
            PolicyRow {
                temperature: self.default_temperature,
                max_tokens: self.default_max_tokens,
                ..row(Intent::Chat)
            },
        )
    }

    /// Deep-tier, tool-free configuration for flow analysis.
    pub fn analysis(&self) -> RoutingConfig {
        let budget = ThinkingMode::Deep.budget();
        RoutingConfig {
            intent: None,
            tier: ModelTier::Deep,
            model_id: ModelTier::Deep.model_id(&self.models).to_string(),
            temperature: ANALYSIS_TEMPERATURE,
            max_output_tokens: ANALYSIS_MAX_TOKENS.max(budget + 1),
            tool_choice: ToolChoice::None,
            allowed_tools: Vec::new(),
            context_detail: ContextDetail::Full,
            reasoning_budget: budget,
        }
    }

    fn build(&self, intent: Option<Intent>, row: PolicyRow) -> RoutingConfig {
        // Reasoning only for the open-ended surface: auto choice over every tool.
        let full_surface =
            row.tool_choice == ToolChoice::Auto && row.tools.len() == ToolKind::ALL.len();
        let reasoning_budget = if full_surface { self.thinking.budget() } else { 0 };

        RoutingConfig {
            intent,
            tier: row.tier,
            model_id: row.tier.model_id(&self.models).to_string(),
            temperature: row.temperature,
            max_output_tokens: row.max_tokens + reasoning_budget,
            tool_choice: row.tool_choice,
            allowed_tools: row.tools.to_vec(),
            context_detail: row.context,
            reasoning_budget,
        }
    }
}
