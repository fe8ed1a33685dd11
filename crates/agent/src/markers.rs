//! Legacy inline finding markers.
//!
//! Older prompts asked the model to write findings inline as
//! `[FINDING: pattern | target | technique | impact | status]`. When enabled,
//! this pass runs over the finalized assistant text and turns each marker into
//! a `save_event` argument set. The orchestrator sends those through the same
//! hook and dedup path as real tool calls.

use blv_tools::SaveEventArgs;
use regex_lite::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[FINDING:\s*([^\]]*)\]").ok())
        .as_ref()
}

/// Every well-formed marker in `text`, in order of appearance.
pub fn extract(text: &str) -> Vec<SaveEventArgs> {
    let Some(re) = marker_regex() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let parsed = parse_marker(body);
            if parsed.is_none() {
                debug!(marker = body, "Ignoring finding marker without pattern and target");
            }
            parsed
        })
        .collect()
}

fn parse_marker(body: &str) -> Option<SaveEventArgs> {
    let fields: Vec<&str> = body.split('|').map(str::trim).collect();
    let field = |i: usize| fields.get(i).copied().unwrap_or_default().to_string();

    let pattern = field(0);
    let target = field(1);
    if pattern.is_empty() || target.is_empty() {
        return None;
    }

    Some(SaveEventArgs {
        pattern,
        target,
        technique: field(2),
        impact: field(3),
        worked: parse_status(fields.get(4).copied().unwrap_or_default()),
        notes: None,
        payload: None,
    })
}

fn parse_status(status: &str) -> bool {
    !matches!(status.to_lowercase().as_str(), "blocked" | "no" | "false")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_marker() {
        let text = "Noted.\n[FINDING: PaRes replay | shop.example | replay token | payment bypass | blocked]\nNext?";
        let found = extract(text);
        assert_eq!(found.len(), 1);
        let f = &found[0];
        assert_eq!(f.pattern, "PaRes replay");
        assert_eq!(f.target, "shop.example");
        assert_eq!(f.technique, "replay token");
        assert_eq!(f.impact, "payment bypass");
        assert!(!f.worked);
    }

    #[test]
    fn trailing_fields_are_optional_and_status_defaults_to_worked() {
        let found = extract("[finding: IDOR | api]");
        assert_eq!(found.len(), 1);
        assert!(found[0].worked);
        assert!(found[0].technique.is_empty());
    }

    #[test]
    fn status_words() {
        for (word, worked) in [
            ("VULN", true),
            ("worked", true),
            ("yes", true),
            ("true", true),
            ("Blocked", false),
            ("no", false),
            ("false", false),
        ] {
            let found = extract(&format!("[FINDING: p | t | x | y | {word}]"));
            assert_eq!(found[0].worked, worked, "{word}");
        }
    }

    #[test]
    fn markers_without_target_are_skipped() {
        let text = "[FINDING: only pattern] and [FINDING: a | b] and [FINDING:  | b]";
        let found = extract(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pattern, "a");
    }

    #[test]
    fn no_markers() {
        assert!(extract("Plain reply with [brackets] only.").is_empty());
    }
}
