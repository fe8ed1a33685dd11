//! Typed tool arguments.

use blv_core::error::ToolError;
use blv_core::knowledge::NewFinding;
use blv_core::tool::ToolKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_QUESTION: &str = "Could you clarify?";

fn default_true() -> bool {
    true
}

fn default_question() -> String {
    DEFAULT_QUESTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveEventArgs {
    #[serde(default)]
    pub pattern: String,
    #[serde(default = "default_true")]
    pub worked: bool,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub technique: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
}

impl SaveEventArgs {
    pub fn into_finding(self) -> NewFinding {
        NewFinding {
            pattern: self.pattern.trim().to_string(),
            worked: self.worked,
            target: self.target.trim().to_string(),
            technique: self.technique.trim().to_string(),
            impact: self.impact.trim().to_string(),
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            payload: self.payload.filter(|p| !p.trim().is_empty()),
        }
    }
}

/// Analysis confidence. Unknown labels read as `Medium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl From<String> for Confidence {
    fn from(s: String) -> Self {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Confidence::Low,
            "HIGH" => Confidence::High,
            _ => Confidence::Medium,
        }
    }
}

impl From<Confidence> for String {
    fn from(c: Confidence) -> Self {
        c.to_string()
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowAnalysisArgs {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub hypothesis: String,
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestTestArgs {
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationArgs {
    #[serde(default = "default_question")]
    pub question: String,
}

/// A parsed tool invocation, one variant per [`ToolKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SaveEvent(SaveEventArgs),
    ShowAnalysis(ShowAnalysisArgs),
    SuggestTest(SuggestTestArgs),
    AskClarification(ClarificationArgs),
}

impl ToolCall {
    pub fn parse(kind: ToolKind, args: Value) -> Result<Self, ToolError> {
        Ok(match kind {
            ToolKind::SaveEvent => ToolCall::SaveEvent(decode(kind, args)?),
            ToolKind::ShowAnalysis => ToolCall::ShowAnalysis(decode(kind, args)?),
            ToolKind::SuggestTest => ToolCall::SuggestTest(decode(kind, args)?),
            ToolKind::AskClarification => ToolCall::AskClarification(decode(kind, args)?),
        })
    }

    /// Parse by tool name as the model reports it.
    pub fn from_name(name: &str, args: Value) -> Result<Self, ToolError> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        Self::parse(kind, args)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::SaveEvent(_) => ToolKind::SaveEvent,
            ToolCall::ShowAnalysis(_) => ToolKind::ShowAnalysis,
            ToolCall::SuggestTest(_) => ToolKind::SuggestTest,
            ToolCall::AskClarification(_) => ToolKind::AskClarification,
        }
    }
}

fn decode<T: DeserializeOwned>(kind: ToolKind, args: Value) -> Result<T, ToolError> {
    // Models sometimes send `null` when a tool takes no required input.
    let args = if args.is_null() { Value::Object(Default::default()) } else { args };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool_name: kind.name().to_string(),
        reason: e.to_string(),
    })
}
