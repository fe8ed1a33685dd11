//! Hook data model: phases, matchers, decisions and compiled hooks.

use blv_core::knowledge::HookRecord;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::HookError;
use crate::check::Check;

/// When a hook runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookPhase {
    /// Before a tool invocation executes.
    PreTool,
    /// Any other phase name stored on a record.
    Custom(String),
}

impl HookPhase {
    pub fn as_str(&self) -> &str {
        match self {
            HookPhase::PreTool => "pre_tool",
            HookPhase::Custom(name) => name,
        }
    }
}

impl From<String> for HookPhase {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pre_tool" | "pre-tool" => HookPhase::PreTool,
            _ => HookPhase::Custom(s),
        }
    }
}

impl From<&str> for HookPhase {
    fn from(s: &str) -> Self {
        HookPhase::from(s.to_string())
    }
}

impl From<HookPhase> for String {
    fn from(phase: HookPhase) -> Self {
        phase.as_str().to_string()
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when a hook's check fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Proceed (an explicit pass).
    #[default]
    Allow,
    /// Proceed with the original arguments, but tell the caller.
    Warn,
    /// Block the invocation; nothing is persisted.
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Warn => "warn",
            Decision::Deny => "deny",
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(Decision::Allow),
            "warn" => Ok(Decision::Warn),
            "deny" | "block" => Ok(Decision::Deny),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects the tools a hook applies to.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// `*`
    Any,
    /// Exact tool name. Used when the pattern is not a valid regex.
    Exact(String),
    /// Exact name or a regex anchored at the start of the tool name.
    Pattern { raw: String, regex: Regex },
}

impl Matcher {
    /// An invalid regex degrades to exact-name matching.
    pub fn compile(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern == "*" {
            return Matcher::Any;
        }
        match Regex::new(&format!("^(?:{pattern})")) {
            Ok(regex) => Matcher::Pattern {
                raw: pattern.to_string(),
                regex,
            },
            Err(_) => Matcher::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Exact(name) => name == tool_name,
            Matcher::Pattern { raw, regex } => raw == tool_name || regex.is_match(tool_name),
        }
    }
}

/// A hook record compiled for evaluation.
#[derive(Debug, Clone)]
pub struct Hook {
    pub name: String,
    pub phase: HookPhase,
    pub matcher: Matcher,
    pub check: Check,
    pub decision: Decision,
    pub message_template: Option<String>,
    pub priority: i64,
}

impl Hook {
    pub fn compile(record: &HookRecord) -> Result<Self, HookError> {
        let decision = record
            .action
            .parse::<Decision>()
            .map_err(|action| HookError::UnknownAction {
                hook: record.name.clone(),
                action,
            })?;
        let check = Check::compile(
            &record.name,
            &record.check_type,
            record.check_value.as_deref(),
        )?;

        Ok(Self {
            name: record.name.clone(),
            phase: HookPhase::from(record.event_name.clone()),
            matcher: Matcher::compile(&record.matcher),
            check,
            decision,
            message_template: record
                .message_template
                .clone()
                .filter(|t| !t.trim().is_empty()),
            priority: record.priority,
        })
    }

    pub fn applies_to(&self, phase: &HookPhase, tool_name: &str) -> bool {
        &self.phase == phase && self.matcher.matches(tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_from_string() {
        assert_eq!(HookPhase::from("pre_tool"), HookPhase::PreTool);
        assert_eq!(HookPhase::from("post_save"), HookPhase::Custom("post_save".into()));
        assert_eq!(String::from(HookPhase::PreTool), "pre_tool");
    }

    #[test]
    fn decision_parse() {
        assert_eq!("DENY".parse::<Decision>().unwrap(), Decision::Deny);
        assert_eq!(" warn ".parse::<Decision>().unwrap(), Decision::Warn);
        assert!("confirm".parse::<Decision>().is_err());
    }

    #[test]
    fn matcher_star_exact_and_regex() {
        assert!(Matcher::compile("*").matches("anything"));

        let exact = Matcher::compile("save_event");
        assert!(exact.matches("save_event"));
        assert!(!exact.matches("show_analysis"));

        let regex = Matcher::compile("s(ave|how)_.*");
        assert!(regex.matches("save_event"));
        assert!(regex.matches("show_analysis"));
        assert!(!regex.matches("suggest_test"));
        assert!(!regex.matches("ask_show_analysis"));
    }

    #[test]
    fn invalid_regex_matches_nothing_but_itself() {
        let matcher = Matcher::compile("save_(event");
        assert!(matches!(matcher, Matcher::Exact(_)));
        assert!(!matcher.matches("save_event"));
        assert!(matcher.matches("save_(event"));
    }

    #[test]
    fn compile_record() {
        let record = HookRecord::new("t", "pre_tool", "*", "length", Some("title:50"), "deny")
            .with_priority(7)
            .with_message("  ");
        let hook = Hook::compile(&record).unwrap();
        assert_eq!(hook.decision, Decision::Deny);
        assert_eq!(hook.priority, 7);
        assert!(hook.message_template.is_none());
        assert!(hook.applies_to(&HookPhase::PreTool, "save_event"));
        assert!(!hook.applies_to(&HookPhase::from("post"), "save_event"));
    }

    #[test]
    fn compile_rejects_unknown_action() {
        let record = HookRecord::new("t", "pre_tool", "*", "length", None, "explode");
        assert!(matches!(
            Hook::compile(&record),
            Err(HookError::UnknownAction { .. })
        ));
    }
}
