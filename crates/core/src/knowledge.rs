//! Knowledge domain types.
//!
//! Four families of records live in the knowledge store:
//! - knowledge entries (rules, triggers, prompts, plans) that shape the system prompt
//! - findings ("events"): the outcome of one tested pattern against a target
//! - captured HTTP requests
//! - hook records: raw validation rules compiled by the hook engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Which family a knowledge entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    Rule,
    Trigger,
    Prompt,
    Plan,
}

impl KnowledgeKind {
    pub const ALL: [KnowledgeKind; 4] = [
        KnowledgeKind::Rule,
        KnowledgeKind::Trigger,
        KnowledgeKind::Prompt,
        KnowledgeKind::Plan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeKind::Rule => "rule",
            KnowledgeKind::Trigger => "trigger",
            KnowledgeKind::Prompt => "prompt",
            KnowledgeKind::Plan => "plan",
        }
    }
}

impl std::fmt::Display for KnowledgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KnowledgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rule" | "rules" => Ok(KnowledgeKind::Rule),
            "trigger" | "triggers" => Ok(KnowledgeKind::Trigger),
            "prompt" | "prompts" => Ok(KnowledgeKind::Prompt),
            "plan" | "plans" => Ok(KnowledgeKind::Plan),
            other => Err(format!("unknown knowledge kind: {other}")),
        }
    }
}

/// Variant-specific payload of a knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KnowledgeBody {
    Rule {
        description: String,
    },
    Trigger {
        pattern: String,
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Prompt {
        content: String,
    },
    Plan {
        target: String,
        objective: String,
    },
}

impl KnowledgeBody {
    pub fn kind(&self) -> KnowledgeKind {
        match self {
            KnowledgeBody::Rule { .. } => KnowledgeKind::Rule,
            KnowledgeBody::Trigger { .. } => KnowledgeKind::Trigger,
            KnowledgeBody::Prompt { .. } => KnowledgeKind::Prompt,
            KnowledgeBody::Plan { .. } => KnowledgeKind::Plan,
        }
    }
}

/// A named, prioritized, toggleable knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub priority: i64,
    pub body: KnowledgeBody,
}

impl KnowledgeEntry {
    pub fn kind(&self) -> KnowledgeKind {
        self.body.kind()
    }

    /// Context ordering: descending priority, then ascending name.
    pub fn context_order(a: &KnowledgeEntry, b: &KnowledgeEntry) -> Ordering {
        b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name))
    }
}

/// A candidate finding, before fingerprinting and persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewFinding {
    pub pattern: String,
    pub worked: bool,
    pub target: String,
    #[serde(default)]
    pub technique: String,
    #[serde(default)]
    pub impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl NewFinding {
    /// Fields the dedup fingerprint is computed over, in order.
    pub fn fingerprint_fields(&self) -> [&str; 4] {
        [&self.pattern, &self.target, &self.technique, &self.impact]
    }
}

/// A persisted finding. Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub pattern: String,
    pub worked: bool,
    pub target: String,
    pub technique: String,
    pub impact: String,
    pub notes: Option<String>,
    pub payload: Option<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Finding {
    pub fn from_new(id: i64, new: NewFinding, content_hash: String) -> Self {
        Self {
            id,
            pattern: new.pattern,
            worked: new.worked,
            target: new.target,
            technique: new.technique,
            impact: new.impact,
            notes: new.notes,
            payload: new.payload,
            content_hash,
            created_at: Utc::now(),
        }
    }

    /// Case-insensitive keyword match over pattern, target, technique and notes.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        [
            Some(self.pattern.as_str()),
            Some(self.target.as_str()),
            Some(self.technique.as_str()),
            self.notes.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// A captured HTTP exchange, already cleaned, before persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewHttpRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub response: String,
}

impl NewHttpRequest {
    pub fn fingerprint_fields(&self) -> [&str; 3] {
        [&self.url, &self.method, &self.body]
    }
}

/// A persisted HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestRecord {
    pub id: i64,
    pub url: String,
    pub method: String,
    pub headers: String,
    pub body: String,
    pub response: String,
    pub content_hash: String,
}

impl HttpRequestRecord {
    pub fn from_new(id: i64, new: NewHttpRequest, content_hash: String) -> Self {
        Self {
            id,
            url: new.url,
            method: new.method,
            headers: new.headers,
            body: new.body,
            response: new.response,
            content_hash,
        }
    }
}

/// A hook exactly as stored. Matchers and checks stay raw text here; the hook
/// engine compiles them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRecord {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    /// Phase the hook applies to (e.g. "pre_tool")
    pub event_name: String,
    /// `*`, an exact tool name, or a regular expression
    pub matcher: String,
    pub check_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_value: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_template: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl HookRecord {
    pub fn new(
        name: impl Into<String>,
        event_name: impl Into<String>,
        matcher: impl Into<String>,
        check_type: impl Into<String>,
        check_value: Option<&str>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            event_name: event_name.into(),
            matcher: matcher.into(),
            check_type: check_type.into(),
            check_value: check_value.map(str::to_string),
            action: action.into(),
            message_template: None,
            priority: 0,
            active: true,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_message(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}
