//! The assistant's tools.
//!
//! Four tools, one [`ToolKind`](blv_core::tool::ToolKind) each: schemas in
//! [`catalog`], typed arguments in [`args`], and handlers in [`executor`].
//! Only `save_event` writes, and it always goes through the deduplicator.

pub mod args;
pub mod catalog;
pub mod executor;

pub use args::{
    ClarificationArgs, Confidence, SaveEventArgs, ShowAnalysisArgs, SuggestTestArgs, ToolCall,
};
pub use catalog::{catalog, definition, definitions};
pub use executor::{ToolExecutor, ToolOutcome};
