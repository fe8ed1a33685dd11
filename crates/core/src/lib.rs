//! # BLV Core
//!
//! Domain types, traits, and error definitions for the BLV assistant.
//! This crate has no framework dependencies: it defines the domain model
//! every other crate implements against.
//!
//! ## Seams
//!
//! Two subsystems are defined as traits here and implemented elsewhere:
//! - [`Provider`]: the model backend (streaming block events + plain completion)
//! - [`KnowledgeStore`]: the persisted knowledge collections
//!
//! Everything else (messages, knowledge entries, findings, captured requests,
//! tool kinds, backend stream events) is a plain value type.

pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod store;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use knowledge::{
    Finding, HookRecord, HttpRequestRecord, KnowledgeBody, KnowledgeEntry, KnowledgeKind,
    NewFinding, NewHttpRequest,
};
pub use message::{
    ConversationId, ConversationSummary, Message, Role, Session, default_conversation_name,
};
pub use provider::{EventStream, Provider, ProviderRequest, ProviderResponse, SystemBlock};
pub use store::{Collection, KnowledgeStore, NewRecord};
pub use stream::{BackendEvent, BlockDelta, BlockKind, TextPayload, UsageSummary};
pub use tool::{ToolChoice, ToolDefinition, ToolKind};
