//! Turn-level events and the end-of-turn summary.
//!
//! [`TurnEvent`] is what a front end renders while a turn runs: the routed
//! intent, streamed reasoning and content, and what happened to each tool
//! invocation. Events serialize with a `type` tag so they can be forwarded
//! as JSON lines.

use blv_core::stream::UsageSummary;
use blv_core::tool::ToolKind;
use blv_router::Intent;
use blv_tools::ToolOutcome;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The classifier's label. Absent when routing is disabled.
    Intent { intent: Intent },

    /// The conversation is over its token ceiling. Nothing was sent.
    TokenLimitReached { used: u64, limit: u64 },

    ReasoningStart,
    Reasoning { text: String },
    Content { text: String },

    ToolStart { name: String },

    /// The model's arguments were not valid JSON.
    ToolArgsInvalid { name: String, reason: String },

    /// Unknown tool, or a tool this turn's routing does not enable.
    ToolDropped { name: String, reason: String },

    HookWarning {
        hook: Option<String>,
        tool: String,
        message: String,
    },

    /// A hook blocked the call. Nothing was executed or persisted.
    HookDenied {
        hook: Option<String>,
        tool: String,
        message: String,
    },

    ToolResult {
        tool: ToolKind,
        output: String,
        outcome: ToolOutcome,
    },

    ToolFailed { tool: String, reason: String },

    Usage { usage: UsageSummary },

    /// The backend stream broke. Content already emitted remains valid.
    StreamError { message: String },

    Done { conversation_id: String },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Intent { .. } => "intent",
            Self::TokenLimitReached { .. } => "token_limit_reached",
            Self::ReasoningStart => "reasoning_start",
            Self::Reasoning { .. } => "reasoning",
            Self::Content { .. } => "content",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolArgsInvalid { .. } => "tool_args_invalid",
            Self::ToolDropped { .. } => "tool_dropped",
            Self::HookWarning { .. } => "hook_warning",
            Self::HookDenied { .. } => "hook_denied",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Usage { .. } => "usage",
            Self::StreamError { .. } => "stream_error",
            Self::Done { .. } => "done",
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    #[default]
    Completed,
    StreamFailed,
    TokenLimitReached,
}

/// Everything a caller needs after the event channel goes quiet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnSummary {
    pub status: TurnStatus,
    pub intent: Option<Intent>,
    pub text: String,
    pub reasoning: String,
    pub usage: Option<UsageSummary>,
    pub outcomes: Vec<ToolOutcome>,
    pub denied: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl TurnSummary {
    pub fn saved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ToolOutcome::Saved { .. }))
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ToolOutcome::Duplicate { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization_intent() {
        let json = serde_json::to_string(&TurnEvent::Intent {
            intent: Intent::Save,
        })
        .unwrap();
        assert!(json.contains(r#""type":"intent""#));
        assert!(json.contains(r#""intent":"SAVE""#));
    }

    #[test]
    fn event_serialization_tool_result() {
        let event = TurnEvent::ToolResult {
            tool: ToolKind::AskClarification,
            output: "❓ which card?".into(),
            outcome: ToolOutcome::Clarification {
                question: "which card?".into(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool"], "ask_clarification");
        assert_eq!(json["outcome"]["outcome"], "clarification");
    }

    #[test]
    fn event_type_names() {
        assert_eq!(TurnEvent::ReasoningStart.event_type(), "reasoning_start");
        assert_eq!(
            TurnEvent::HookDenied {
                hook: None,
                tool: "save_event".into(),
                message: "no".into()
            }
            .event_type(),
            "hook_denied"
        );
        assert_eq!(
            TurnEvent::Done {
                conversation_id: "c".into()
            }
            .event_type(),
            "done"
        );
    }

    #[test]
    fn summary_counts() {
        let summary = TurnSummary {
            outcomes: vec![
                ToolOutcome::Duplicate {
                    finding: Default::default(),
                    fingerprint: "a".into(),
                },
                ToolOutcome::Saved {
                    finding: Default::default(),
                    fingerprint: "b".into(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(summary.saved(), 1);
        assert_eq!(summary.duplicates(), 1);
        assert_eq!(summary.status, TurnStatus::Completed);
    }
}
