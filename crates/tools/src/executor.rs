//! Tool execution: one handler per [`ToolCall`] variant.

use blv_core::error::ToolError;
use blv_core::knowledge::NewFinding;
use blv_core::tool::ToolKind;
use blv_store::{Deduplicator, WriteOutcome};
use serde::Serialize;
use tracing::info;

use crate::args::{ShowAnalysisArgs, SuggestTestArgs, ToolCall};

/// What a tool call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Saved { finding: NewFinding, fingerprint: String },
    /// Already known; nothing was written.
    Duplicate { finding: NewFinding, fingerprint: String },
    Analysis(ShowAnalysisArgs),
    Suggestion(SuggestTestArgs),
    Clarification { question: String },
}

impl ToolOutcome {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolOutcome::Saved { .. } | ToolOutcome::Duplicate { .. } => ToolKind::SaveEvent,
            ToolOutcome::Analysis(_) => ToolKind::ShowAnalysis,
            ToolOutcome::Suggestion(_) => ToolKind::SuggestTest,
            ToolOutcome::Clarification { .. } => ToolKind::AskClarification,
        }
    }

    /// Plain-text rendering for terminals and logs.
    pub fn render(&self) -> String {
        match self {
            ToolOutcome::Saved { finding, .. } => {
                if finding.worked {
                    format!("✓ Saved: VULN {} on {}", finding.pattern, finding.target)
                } else {
                    format!("✓ Saved: BLOCKED {} by {}", finding.pattern, finding.target)
                }
            }
            ToolOutcome::Duplicate { finding, .. } => {
                format!("⚠ Duplicate: {} (already known)", finding.pattern)
            }
            ToolOutcome::Analysis(a) => {
                let mut out = format!("📊 {}\n\n{}\n", or_default(&a.title, "Analysis"), a.pattern);
                out.push_str(&format!(
                    "  Target: {}\n  Hypothesis: {}\n\nTESTS\n",
                    a.target.as_deref().unwrap_or("Unknown"),
                    or_default(&a.hypothesis, "Unknown"),
                ));
                for test in &a.tests {
                    out.push_str(&format!("  ▸ {test}\n"));
                }
                out.push_str(&format!(
                    "\nImpact: {}\nConfidence: {}",
                    a.impact.as_deref().unwrap_or("Unknown"),
                    a.confidence
                ));
                out
            }
            ToolOutcome::Suggestion(s) => {
                let mut out = format!(
                    "🧪 Test Suggestion\n\nPattern: {}\nTarget: {}\n\nSTEPS\n",
                    or_default(&s.pattern, "Unknown"),
                    s.target.as_deref().unwrap_or("Unknown"),
                );
                for (i, step) in s.steps.iter().enumerate() {
                    out.push_str(&format!("  {}. {step}\n", i + 1));
                }
                out.push_str("\nVARIABLES\n");
                if s.variables.is_empty() {
                    out.push_str("  None\n");
                }
                for var in &s.variables {
                    out.push_str(&format!("  • {var}\n"));
                }
                out.push_str(&format!("\nExpected: {}", or_default(&s.expected, "Unknown")));
                out
            }
            ToolOutcome::Clarification { question } => format!("❓ {question}"),
        }
    }
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() { fallback } else { value }
}

/// Runs tool calls. Only `save_event` touches the store.
#[derive(Clone)]
pub struct ToolExecutor {
    dedup: Deduplicator,
}

impl ToolExecutor {
    pub fn new(dedup: Deduplicator) -> Self {
        Self { dedup }
    }

    pub async fn execute(&self, call: ToolCall) -> Result<ToolOutcome, ToolError> {
        match call {
            ToolCall::SaveEvent(args) => {
                let finding = args.into_finding();
                if finding.pattern.is_empty() || finding.target.is_empty() {
                    return Err(ToolError::InvalidArguments {
                        tool_name: ToolKind::SaveEvent.name().into(),
                        reason: "Missing required fields: pattern and target".into(),
                    });
                }

                let outcome = self
                    .dedup
                    .record_finding(finding.clone())
                    .await
                    .map_err(|source| ToolError::Store {
                        tool_name: ToolKind::SaveEvent.name().into(),
                        source,
                    })?;

                Ok(match outcome {
                    WriteOutcome::Inserted { fingerprint } => {
                        info!(pattern = %finding.pattern, target = %finding.target, "Finding saved");
                        ToolOutcome::Saved { finding, fingerprint }
                    }
                    WriteOutcome::Duplicate { fingerprint } => {
                        ToolOutcome::Duplicate { finding, fingerprint }
                    }
                })
            }
            ToolCall::ShowAnalysis(args) => Ok(ToolOutcome::Analysis(args)),
            ToolCall::SuggestTest(args) => Ok(ToolOutcome::Suggestion(args)),
            ToolCall::AskClarification(args) => {
                let question = if args.question.trim().is_empty() {
                    crate::args::DEFAULT_QUESTION.to_string()
                } else {
                    args.question
                };
                Ok(ToolOutcome::Clarification { question })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blv_core::store::KnowledgeStore;
    use blv_store::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn executor() -> (ToolExecutor, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let executor = ToolExecutor::new(Deduplicator::new(store.clone()));
        (executor, store)
    }

    fn save(args: serde_json::Value) -> ToolCall {
        ToolCall::parse(ToolKind::SaveEvent, args).unwrap()
    }

    #[tokio::test]
    async fn save_then_duplicate() {
        let (executor, store) = executor();
        let args = json!({
            "pattern": "PaRes replay",
            "worked": false,
            "target": "shop",
            "technique": "replay token",
            "impact": "payment bypass"
        });

        let first = executor.execute(save(args.clone())).await.unwrap();
        assert!(matches!(first, ToolOutcome::Saved { .. }));
        assert_eq!(first.render(), "✓ Saved: BLOCKED PaRes replay by shop");
        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["outcome"], "saved");
        assert_eq!(json["finding"]["target"], "shop");

        let second = executor.execute(save(args)).await.unwrap();
        assert!(matches!(second, ToolOutcome::Duplicate { .. }));
        assert!(second.render().contains("already known"));
        assert_eq!(store.get_recent_events(10, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_requires_pattern_and_target() {
        let (executor, store) = executor();
        let err = executor
            .execute(save(json!({"pattern": "x", "target": "   "})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(store.get_recent_events(10, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn display_tools_do_not_persist() {
        let (executor, store) = executor();
        let call = ToolCall::parse(
            ToolKind::SuggestTest,
            json!({"pattern": "IDOR", "steps": ["swap id", "replay"], "expected": "other order"}),
        )
        .unwrap();
        let outcome = executor.execute(call).await.unwrap();
        let text = outcome.render();
        assert!(text.contains("  1. swap id\n  2. replay"));
        assert!(text.contains("  None"));
        assert_eq!(outcome.kind(), ToolKind::SuggestTest);
        assert!(store.get_recent_events(10, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn analysis_rendering() {
        let (executor, _) = executor();
        let call = ToolCall::parse(
            ToolKind::ShowAnalysis,
            json!({"title": "Cart tampering", "pattern": "price", "hypothesis": "h", "tests": ["a", "b"]}),
        )
        .unwrap();
        let text = executor.execute(call).await.unwrap().render();
        assert!(text.starts_with("📊 Cart tampering"));
        assert!(text.ends_with("Confidence: MEDIUM"));
    }

    #[tokio::test]
    async fn blank_question_gets_default() {
        let (executor, _) = executor();
        let call = ToolCall::parse(ToolKind::AskClarification, json!({"question": " "})).unwrap();
        let outcome = executor.execute(call).await.unwrap();
        assert_eq!(outcome.render(), "❓ Could you clarify?");
    }
}
