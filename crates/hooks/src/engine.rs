//! Hook evaluation engine.
//!
//! The engine holds a compiled snapshot of the hooks for one turn and
//! returns a [`HookOutcome`] the orchestrator must obey.

use blv_core::error::StoreError;
use blv_core::knowledge::HookRecord;
use blv_core::store::KnowledgeStore;
use serde_json::Value;
use tracing::{debug, warn};

use crate::model::{Decision, Hook, HookPhase};

/// Result of evaluating a tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutcome {
    pub decision: Decision,
    /// Which hook fired, if any.
    pub hook: Option<String>,
    /// Rendered message for `warn` and `deny`.
    pub message: Option<String>,
    /// Arguments the invocation should proceed with.
    pub args: Value,
}

impl HookOutcome {
    pub fn allow(args: Value) -> Self {
        Self {
            decision: Decision::Allow,
            hook: None,
            message: None,
            args,
        }
    }

    pub fn is_denied(&self) -> bool {
        self.decision == Decision::Deny
    }
}

#[derive(Debug, Default)]
pub struct HookEngine {
    /// Sorted by descending priority, then name.
    hooks: Vec<Hook>,
}

impl HookEngine {
    /// Compile records. Malformed ones are skipped with a warning.
    pub fn new(records: &[HookRecord]) -> Self {
        let mut hooks: Vec<Hook> = records
            .iter()
            .filter(|r| r.active)
            .filter_map(|record| match Hook::compile(record) {
                Ok(hook) => Some(hook),
                Err(e) => {
                    warn!(hook = %record.name, error = %e, "Skipping malformed hook");
                    None
                }
            })
            .collect();

        hooks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Self { hooks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the active hooks for `phase` from the store.
    pub async fn load(store: &dyn KnowledgeStore, phase: &HookPhase) -> Result<Self, StoreError> {
        let records = store.get_hooks(phase.as_str()).await?;
        let engine = Self::new(&records);
        debug!(phase = %phase, hooks = engine.len(), "Hooks loaded");
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the matching hooks for `tool_name` in priority order.
    ///
    /// The first failing check decides the outcome. A hook whose check
    /// errors is skipped. With no failures the original args are returned
    /// with `allow`.
    pub fn evaluate(&self, phase: &HookPhase, tool_name: &str, args: Value) -> HookOutcome {
        for hook in self.hooks.iter().filter(|h| h.applies_to(phase, tool_name)) {
            let violation = match hook.check.evaluate(&hook.name, &args) {
                Ok(Some(violation)) => violation,
                Ok(None) => continue,
                Err(e) => {
                    warn!(hook = %hook.name, tool = tool_name, error = %e, "Hook check failed, skipping");
                    continue;
                }
            };

            let message =
                violation.render(hook.message_template.as_deref(), &hook.name, tool_name);

            match hook.decision {
                Decision::Deny => {
                    warn!(hook = %hook.name, tool = tool_name, "Hook DENIED tool call: {message}");
                }
                Decision::Warn => {
                    warn!(hook = %hook.name, tool = tool_name, "Hook WARNING: {message}");
                }
                Decision::Allow => {
                    debug!(hook = %hook.name, tool = tool_name, "Hook explicitly ALLOWED");
                }
            }

            return HookOutcome {
                decision: hook.decision,
                hook: Some(hook.name.clone()),
                message: Some(message),
                args,
            };
        }

        HookOutcome::allow(args)
    }
}
