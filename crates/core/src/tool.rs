//! Tool kinds: the closed set of structured actions the model may propose.
//!
//! Tools are a tagged enum rather than a name-keyed registry, so every
//! dispatch site matches exhaustively and a new tool is a compile-time
//! checked addition. Schemas and handlers live in `blv-tools`.

use serde::{Deserialize, Serialize};

/// Every tool the assistant can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Persist a tested pattern as a finding
    SaveEvent,
    /// Display a structured vulnerability analysis
    ShowAnalysis,
    /// Suggest a concrete test to run
    SuggestTest,
    /// Ask the user a clarifying question
    AskClarification,
}

impl ToolKind {
    /// Registry order.
    pub const ALL: [ToolKind; 4] = [
        ToolKind::SaveEvent,
        ToolKind::ShowAnalysis,
        ToolKind::SuggestTest,
        ToolKind::AskClarification,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SaveEvent => "save_event",
            ToolKind::ShowAnalysis => "show_analysis",
            ToolKind::SuggestTest => "suggest_test",
            ToolKind::AskClarification => "ask_clarification",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Whether a successful call writes to the knowledge store.
    pub fn persists(&self) -> bool {
        matches!(self, ToolKind::SaveEvent)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// How the backend may pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "tool")]
pub enum ToolChoice {
    /// The model decides
    Auto,
    /// Tools are disabled for this request
    None,
    /// The model must call this tool
    Tool(ToolKind),
}

impl ToolChoice {
    pub fn allows_tools(&self) -> bool {
        !matches!(self, ToolChoice::None)
    }
}
