//! Hooks: configurable validation rules applied to tool invocations
//! before they touch persistent state.
//!
//! Hook records live in the knowledge store. Each one is compiled once into
//! a [`Hook`] (matcher + typed [`Check`] + [`Decision`]) and evaluated in
//! descending priority order. The first failing check decides the outcome.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Orchestrator │───▶│  HookEngine  │───▶│ Deduplicator │
//! │ (tool ready) │    │              │    │  + store     │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!                           │
//!                     ┌─────┴─────┐
//!                     │ Decision  │
//!                     │ allow     │
//!                     │ warn      │
//!                     │ deny      │
//!                     └───────────┘
//! ```
//!
//! # Example hook record
//!
//! ```json
//! {
//!   "name": "short-titles",
//!   "event_name": "pre_tool",
//!   "matcher": "show_analysis",
//!   "check_type": "length",
//!   "check_value": "title:50",
//!   "action": "deny",
//!   "message_template": "{field} is {actual} chars, max {max}"
//! }
//! ```

mod check;
mod engine;
mod model;

pub use check::{Check, Violation};
pub use engine::{HookEngine, HookOutcome};
pub use model::{Decision, Hook, HookPhase, Matcher};

pub type HookResult<T> = std::result::Result<T, HookError>;

/// Errors from compiling or running a hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook '{hook}': unknown check type '{check_type}'")]
    UnknownCheckType { hook: String, check_type: String },

    #[error("hook '{hook}': unknown action '{action}'")]
    UnknownAction { hook: String, action: String },

    #[error("hook '{hook}': invalid check value: {reason}")]
    InvalidCheckValue { hook: String, reason: String },

    #[error("hook '{hook}': tool arguments are not an object")]
    ArgumentsNotObject { hook: String },
}
