//! The turn pipeline for the BLV assistant.
//!
//! Each user turn runs once through the [`Orchestrator`]:
//!
//! 1. **Route** the message (intent classifier + routing table)
//! 2. **Assemble** the system prompt from the live knowledge store, split
//!    into a cacheable prefix and a volatile suffix
//! 3. **Stream** the completion and **demultiplex** it into reasoning,
//!    content and tool-call events
//! 4. **Gate** each tool call through the hook engine, then execute it;
//!    persistence goes through the deduplicator
//!
//! [`FlowAnalyzer`] is the separate, one-shot flow-mapping call over
//! captured HTTP traffic.

pub mod context;
pub mod event;
pub mod flow;
pub mod markers;
pub mod multiplexer;
pub mod orchestrator;

#[cfg(test)]
mod test_helpers;

pub use context::{AssembledContext, ContextAssembler, ContextSection};
pub use event::{TurnEvent, TurnStatus, TurnSummary};
pub use flow::FlowAnalyzer;
pub use multiplexer::{OutputEvent, OutputStream, StreamMultiplexer, consume};
pub use orchestrator::Orchestrator;
