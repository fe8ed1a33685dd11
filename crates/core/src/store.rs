//! KnowledgeStore trait: typed access to the persisted knowledge collections.
//!
//! The assistant never issues raw queries; it only calls the operations below.
//! Implementations must make each single operation atomic, in particular
//! `insert_if_new`, which is the only idempotency mechanism for findings and
//! captured requests. Nothing is promised across two calls.

use async_trait::async_trait;
use crate::error::StoreError;
use crate::knowledge::{
    Finding, HookRecord, HttpRequestRecord, KnowledgeBody, KnowledgeEntry, KnowledgeKind,
    NewFinding, NewHttpRequest,
};
use crate::message::{ConversationId, ConversationSummary, Message, Role};

/// A fingerprint-gated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Events,
    Requests,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Events => "events",
            Collection::Requests => "requests",
        }
    }
}

/// A record awaiting its fingerprint-gated insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum NewRecord {
    Finding(NewFinding),
    Request(NewHttpRequest),
}

impl NewRecord {
    pub fn collection(&self) -> Collection {
        match self {
            NewRecord::Finding(_) => Collection::Events,
            NewRecord::Request(_) => Collection::Requests,
        }
    }
}

/// The knowledge store seam.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    // --- Knowledge entries ---

    /// Active entries of one kind, ordered by descending priority then name.
    async fn get_active(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError>;

    /// Every entry of one kind, active or not, in the same order.
    async fn list_entries(&self, kind: KnowledgeKind) -> Result<Vec<KnowledgeEntry>, StoreError>;

    /// Add an entry. Names are unique per kind.
    async fn add_entry(
        &self,
        name: &str,
        priority: i64,
        body: KnowledgeBody,
    ) -> Result<KnowledgeEntry, StoreError>;

    /// Flip an entry's active flag. Returns the new state, or `None` if the name is unknown.
    async fn toggle_entry(&self, kind: KnowledgeKind, name: &str) -> Result<Option<bool>, StoreError>;

    /// Returns false if nothing was deleted.
    async fn delete_entry(&self, kind: KnowledgeKind, name: &str) -> Result<bool, StoreError>;

    // --- Findings and requests ---

    /// Most recent findings first.
    async fn get_recent_events(&self, limit: usize, worked_only: bool) -> Result<Vec<Finding>, StoreError>;

    /// Most recent first; matches pattern, target, technique or notes.
    async fn search_events(&self, keyword: &str) -> Result<Vec<Finding>, StoreError>;

    /// Captured requests in capture order, at most `limit`.
    async fn get_requests(&self, limit: usize) -> Result<Vec<HttpRequestRecord>, StoreError>;

    async fn count_requests(&self) -> Result<usize, StoreError>;

    async fn contains_fingerprint(
        &self,
        collection: Collection,
        fingerprint: &str,
    ) -> Result<bool, StoreError>;

    /// Insert unless a record with this fingerprint already exists in the
    /// record's collection. Returns whether a row was written.
    async fn insert_if_new(&self, fingerprint: &str, record: NewRecord) -> Result<bool, StoreError>;

    // --- Hooks ---

    async fn add_hook(&self, hook: HookRecord) -> Result<HookRecord, StoreError>;

    /// Active hooks for a phase, ordered by descending priority then name.
    async fn get_hooks(&self, phase: &str) -> Result<Vec<HookRecord>, StoreError>;

    // --- Conversations ---

    /// Create a conversation; `None` picks the timestamped default name.
    async fn create_conversation(&self, name: Option<&str>) -> Result<ConversationSummary, StoreError>;

    async fn find_conversation(&self, name: &str) -> Result<Option<ConversationSummary>, StoreError>;

    /// Newest first.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, StoreError>;

    /// Deletes the conversation and its messages.
    async fn delete_conversation(&self, id: &ConversationId) -> Result<bool, StoreError>;

    async fn append_message(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
        tokens: u32,
    ) -> Result<(), StoreError>;

    /// The last `limit` messages, in chronological order.
    async fn get_history(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    async fn message_count(&self, conversation: &ConversationId) -> Result<usize, StoreError>;

    /// Sum of the token counts recorded on the conversation's messages.
    async fn conversation_tokens(&self, conversation: &ConversationId) -> Result<u64, StoreError>;

    async fn get_or_create_conversation(&self, name: &str) -> Result<ConversationSummary, StoreError> {
        match self.find_conversation(name).await? {
            Some(existing) => Ok(existing),
            None => self.create_conversation(Some(name)).await,
        }
    }
}
