//! System prompt assembly from the live knowledge store.
//!
//! The prompt is a list of [`ContextSection`]s. Sections that change rarely
//! (rules, plans, triggers, prompts, fixed instructions) form a cacheable
//! prefix; sections that change every turn (events, captured requests) form
//! a volatile suffix. [`AssembledContext::system_blocks`] turns that split
//! into the cache-boundary hint the backend consumes.
//!
//! Every build reads the store afresh. Nothing is cached across turns.

use blv_config::ContextLimits;
use blv_core::error::StoreError;
use blv_core::knowledge::{Finding, HttpRequestRecord, KnowledgeBody, KnowledgeEntry, KnowledgeKind};
use blv_core::provider::SystemBlock;
use blv_core::store::KnowledgeStore;
use blv_router::ContextDetail;
use std::sync::Arc;
use tracing::debug;

/// Substrings that mark a JSON body key as worth pointing out.
const SENSITIVE_KEY_HINTS: &[&str] = &[
    "id", "user", "amount", "price", "payment", "order", "token", "card",
];

const ANTI_DUPLICATION_RULE: &str = "# ABSOLUTE RULE\n\
    BEFORE calling save_event, you MUST check the list below.\n\
    If a SIMILAR event already exists, do NOT call save_event: answer \
    \"🔄 Already in memory: [existing pattern]\"";

const EVENTS_INTRO: &str = "You are a BLV assistant. These are the events stored in memory:";

/// One demarcated block of the system prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSection {
    pub name: &'static str,
    pub text: String,
    pub cacheable: bool,
}

impl ContextSection {
    fn stable(name: &'static str, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
            cacheable: true,
        }
    }

    fn volatile(name: &'static str, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
            cacheable: false,
        }
    }
}

/// A built system prompt. Cacheable sections always precede volatile ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledContext {
    sections: Vec<ContextSection>,
}

impl AssembledContext {
    fn push(&mut self, section: ContextSection) {
        if !section.text.trim().is_empty() {
            self.sections.push(section);
        }
    }

    pub fn sections(&self) -> &[ContextSection] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&ContextSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Number of leading sections that form the cacheable prefix.
    pub fn cache_boundary(&self) -> usize {
        self.sections.iter().take_while(|s| s.cacheable).count()
    }

    pub fn prefix(&self) -> String {
        join(&self.sections[..self.cache_boundary()])
    }

    pub fn suffix(&self) -> String {
        join(&self.sections[self.cache_boundary()..])
    }

    /// The whole prompt.
    pub fn text(&self) -> String {
        join(&self.sections)
    }

    /// Prefix as one cached block, suffix as one volatile block. Empty
    /// halves are left out.
    pub fn system_blocks(&self) -> Vec<SystemBlock> {
        let mut blocks = Vec::with_capacity(2);
        let prefix = self.prefix();
        if !prefix.is_empty() {
            blocks.push(SystemBlock::cached(prefix));
        }
        let suffix = self.suffix();
        if !suffix.is_empty() {
            blocks.push(SystemBlock::volatile(suffix));
        }
        blocks
    }
}

fn join(sections: &[ContextSection]) -> String {
    sections
        .iter()
        .map(|s| s.text.trim_end())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct ContextAssembler {
    store: Arc<dyn KnowledgeStore>,
    limits: ContextLimits,
    reply_language: String,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn KnowledgeStore>, limits: ContextLimits) -> Self {
        Self {
            store,
            limits,
            reply_language: "English".into(),
        }
    }

    pub fn with_reply_language(mut self, language: impl Into<String>) -> Self {
        self.reply_language = language.into();
        self
    }

    pub async fn build(&self, detail: ContextDetail) -> Result<AssembledContext, StoreError> {
        let context = match detail {
            ContextDetail::Minimal => self.minimal().await?,
            ContextDetail::EventsOnly => self.events_only().await?,
            ContextDetail::Full => self.full().await?,
        };
        debug!(
            detail = %detail,
            sections = context.sections.len(),
            cached = context.cache_boundary(),
            "Context assembled"
        );
        Ok(context)
    }

    fn language_instruction(&self) -> String {
        format!("# INSTRUCTION\nAlways answer in {}.", self.reply_language)
    }

    async fn minimal(&self) -> Result<AssembledContext, StoreError> {
        let events = self.store.get_recent_events(self.limits.minimal_events, false).await?;

        let mut ctx = AssembledContext::default();
        ctx.push(ContextSection::stable("anti_duplication", ANTI_DUPLICATION_RULE));
        ctx.push(ContextSection::stable("instruction", self.language_instruction()));
        if !events.is_empty() {
            let mut text = String::from("# EXISTING EVENTS\n");
            for e in &events {
                text.push_str(&format!("{} {} | {}\n", status_icon(e), e.pattern, e.target));
            }
            ctx.push(ContextSection::volatile("events", text));
        }
        Ok(ctx)
    }

    async fn events_only(&self) -> Result<AssembledContext, StoreError> {
        let events = self.store.get_recent_events(self.limits.listed_events, false).await?;

        let mut ctx = AssembledContext::default();
        ctx.push(ContextSection::stable("intro", EVENTS_INTRO));
        ctx.push(ContextSection::stable("instruction", self.language_instruction()));

        let text = if events.is_empty() {
            "(no events recorded)".to_string()
        } else {
            events.iter().map(event_line).collect::<Vec<_>>().join("\n")
        };
        ctx.push(ContextSection::volatile("events", text));
        Ok(ctx)
    }

    async fn full(&self) -> Result<AssembledContext, StoreError> {
        let mut ctx = AssembledContext::default();

        let rules = self.active(KnowledgeKind::Rule).await?;
        if !rules.is_empty() {
            let mut text = String::from("# BEHAVIOURAL RULES\n");
            for entry in &rules {
                if let KnowledgeBody::Rule { description } = &entry.body {
                    text.push_str(&format!("- {description}\n"));
                }
            }
            ctx.push(ContextSection::stable("rules", text));
        }

        let plans = self.active(KnowledgeKind::Plan).await?;
        if !plans.is_empty() {
            let mut text = String::from("# ACTIVE PLAN\n");
            for entry in &plans {
                if let KnowledgeBody::Plan { target, objective } = &entry.body {
                    text.push_str(&format!(
                        "## {}\n- Target: {target}\n- Objective: {objective}\n",
                        entry.name
                    ));
                }
            }
            ctx.push(ContextSection::stable("plans", text));
        }

        let triggers = self.active(KnowledgeKind::Trigger).await?;
        if !triggers.is_empty() {
            let mut text = String::from("# BLV TRIGGERS\n");
            for entry in &triggers {
                if let KnowledgeBody::Trigger { pattern, response, .. } = &entry.body {
                    text.push_str(&format!("- {pattern} → {response}\n"));
                }
            }
            ctx.push(ContextSection::stable("triggers", text));
        }

        let prompts = self.active(KnowledgeKind::Prompt).await?;
        let prompt_text = prompts
            .iter()
            .filter_map(|entry| match &entry.body {
                KnowledgeBody::Prompt { content } => Some(content.trim()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        ctx.push(ContextSection::stable("prompts", prompt_text));
        ctx.push(ContextSection::stable("instruction", self.language_instruction()));

        let events = self.store.get_recent_events(self.limits.memory_events, false).await?;
        if !events.is_empty() {
            let mut text =
                String::from("# 🧠 MEMORY (events already recorded, do NOT re-suggest)\n");
            for e in &events {
                text.push_str(&format!("- {} {}", status_icon(e), e.pattern));
                if !e.target.is_empty() {
                    text.push_str(&format!(" | {}", e.target));
                }
                text.push('\n');
            }
            ctx.push(ContextSection::volatile("memory", text));
        }

        let total = self.store.count_requests().await?;
        if total > 0 {
            let requests = self.store.get_requests(self.limits.requests).await?;
            let mut text = format!("# HTTP REQUESTS ({total} endpoints)\n");
            for request in &requests {
                text.push_str(&self.request_line(request));
                text.push('\n');
            }
            ctx.push(ContextSection::volatile("requests", text));
        }

        Ok(ctx)
    }

    async fn active(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let mut entries = self.store.get_active(kind).await?;
        entries.retain(|e| e.active);
        entries.sort_by(KnowledgeEntry::context_order);
        Ok(entries)
    }

    fn request_line(&self, request: &HttpRequestRecord) -> String {
        let mut line = format!("- {} {}", request.method, request.url);
        let keys = sensitive_params(&request.body, self.limits.sensitive_params);
        if !keys.is_empty() {
            line.push_str(&format!(" | params: {}", keys.join(", ")));
        }
        line
    }
}

fn status_icon(event: &Finding) -> &'static str {
    if event.worked { "💥" } else { "🛡️" }
}

fn event_line(event: &Finding) -> String {
    let status = if event.worked { "💥 VULN" } else { "🛡️ BLOCKED" };
    let mut line = format!("- {status} | {}", event.pattern);
    for field in [&event.target, &event.technique] {
        if !field.is_empty() {
            line.push_str(&format!(" | {field}"));
        }
    }
    line
}

/// Top-level keys of a JSON object body that look security-relevant.
pub fn sensitive_params(body: &str, max: usize) -> Vec<String> {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };
    map.keys()
        .filter(|key| {
            let lower = key.to_lowercase();
            SENSITIVE_KEY_HINTS.iter().any(|hint| lower.contains(hint))
        })
        .take(max)
        .cloned()
        .collect()
}
