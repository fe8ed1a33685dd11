//! In-memory store: useful for tests and ephemeral sessions.

use async_trait::async_trait;
use blv_core::error::StoreError;
use blv_core::knowledge::{
    Finding, HookRecord, HttpRequestRecord, KnowledgeBody, KnowledgeEntry, KnowledgeKind,
};
use blv_core::message::{
    ConversationId, ConversationSummary, Message, Role, default_conversation_name,
};
use blv_core::store::{Collection, KnowledgeStore, NewRecord};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    next_id: i64,
    entries: Vec<KnowledgeEntry>,
    events: Vec<Finding>,
    requests: Vec<HttpRequestRecord>,
    hooks: Vec<HookRecord>,
    conversations: Vec<ConversationSummary>,
    messages: HashMap<ConversationId, Vec<Message>>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A store that keeps every collection in memory behind one lock.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_context_order(mut entries: Vec<KnowledgeEntry>) -> Vec<KnowledgeEntry> {
    entries.sort_by(KnowledgeEntry::context_order);
    entries
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_active(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let state = self.state.read().await;
        let entries = state
            .entries
            .iter()
            .filter(|e| e.kind() == kind && e.active)
            .cloned()
            .collect();
        Ok(sorted_by_context_order(entries))
    }

    async fn list_entries(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let state = self.state.read().await;
        let entries = state
            .entries
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect();
        Ok(sorted_by_context_order(entries))
    }

    async fn add_entry(
        &self,
        name: &str,
        priority: i64,
        body: KnowledgeBody,
    ) -> Result<KnowledgeEntry, StoreError> {
        let mut state = self.state.write().await;
        let kind = body.kind();
        if state.entries.iter().any(|e| e.kind() == kind && e.name == name) {
            return Err(StoreError::Storage(format!("{kind} '{name}' already exists")));
        }

        let entry = KnowledgeEntry {
            id: state.next_id(),
            name: name.to_string(),
            active: true,
            priority,
            body,
        };
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn toggle_entry(&self, kind: KnowledgeKind, name: &str) -> Result<Option<bool>, StoreError> {
        let mut state = self.state.write().await;
        Ok(state
            .entries
            .iter_mut()
            .find(|e| e.kind() == kind && e.name == name)
            .map(|e| {
                e.active = !e.active;
                e.active
            }))
    }

    async fn delete_entry(&self, kind: KnowledgeKind, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|e| !(e.kind() == kind && e.name == name));
        Ok(state.entries.len() < before)
    }

    async fn get_recent_events(&self, limit: usize, worked_only: bool) -> Result<Vec<Finding>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| !worked_only || e.worked)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search_events(&self, keyword: &str) -> Result<Vec<Finding>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.matches_keyword(keyword))
            .cloned()
            .collect())
    }

    async fn get_requests(&self, limit: usize) -> Result<Vec<HttpRequestRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.iter().take(limit).cloned().collect())
    }

    async fn count_requests(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().await.requests.len())
    }

    async fn contains_fingerprint(
        &self,
        collection: Collection,
        fingerprint: &str,
    ) -> Result<bool, StoreError> {
        let state = self.state.read().await;
        Ok(match collection {
            Collection::Events => state.events.iter().any(|e| e.content_hash == fingerprint),
            Collection::Requests => state.requests.iter().any(|r| r.content_hash == fingerprint),
        })
    }

    async fn insert_if_new(&self, fingerprint: &str, record: NewRecord) -> Result<bool, StoreError> {
        // Check and insert under one write lock.
        let mut state = self.state.write().await;
        match record {
            NewRecord::Finding(new) => {
                if state.events.iter().any(|e| e.content_hash == fingerprint) {
                    return Ok(false);
                }
                let id = state.next_id();
                state.events.push(Finding::from_new(id, new, fingerprint.to_string()));
            }
            NewRecord::Request(new) => {
                if state.requests.iter().any(|r| r.content_hash == fingerprint) {
                    return Ok(false);
                }
                let id = state.next_id();
                state
                    .requests
                    .push(HttpRequestRecord::from_new(id, new, fingerprint.to_string()));
            }
        }
        Ok(true)
    }

    async fn add_hook(&self, mut hook: HookRecord) -> Result<HookRecord, StoreError> {
        let mut state = self.state.write().await;
        if state.hooks.iter().any(|h| h.name == hook.name) {
            return Err(StoreError::Storage(format!("hook '{}' already exists", hook.name)));
        }
        hook.id = state.next_id();
        state.hooks.push(hook.clone());
        Ok(hook)
    }

    async fn get_hooks(&self, phase: &str) -> Result<Vec<HookRecord>, StoreError> {
        let state = self.state.read().await;
        let mut hooks: Vec<HookRecord> = state
            .hooks
            .iter()
            .filter(|h| h.active && h.event_name == phase)
            .cloned()
            .collect();
        hooks.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(hooks)
    }

    async fn create_conversation(&self, name: Option<&str>) -> Result<ConversationSummary, StoreError> {
        let now = Utc::now();
        let summary = ConversationSummary {
            id: ConversationId::new(),
            name: name
                .filter(|n| !n.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| default_conversation_name(now)),
            created_at: now,
        };

        let mut state = self.state.write().await;
        state.conversations.push(summary.clone());
        state.messages.insert(summary.id.clone(), Vec::new());
        Ok(summary)
    }

    async fn find_conversation(&self, name: &str) -> Result<Option<ConversationSummary>, StoreError> {
        let state = self.state.read().await;
        Ok(state.conversations.iter().find(|c| c.name == name).cloned())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let state = self.state.read().await;
        Ok(state.conversations.iter().rev().cloned().collect())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let before = state.conversations.len();
        state.conversations.retain(|c| &c.id != id);
        state.messages.remove(id);
        Ok(state.conversations.len() < before)
    }

    async fn append_message(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
        tokens: u32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let messages = state
            .messages
            .get_mut(conversation)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation}")))?;
        messages.push(Message {
            role,
            content: text.to_string(),
            token_count: tokens,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn get_history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        let Some(messages) = state.messages.get(conversation) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn message_count(&self, conversation: &ConversationId) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.messages.get(conversation).map_or(0, Vec::len))
    }

    async fn conversation_tokens(&self, conversation: &ConversationId) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(conversation)
            .map_or(0, |m| m.iter().map(|msg| u64::from(msg.token_count)).sum()))
    }
}
