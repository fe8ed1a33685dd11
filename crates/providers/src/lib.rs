//! Model backend implementations for BLV.
//!
//! All providers implement the `blv_core::Provider` trait. The Anthropic
//! provider is the production backend; `mock` provides scripted backends
//! for tests behind the `test-support` feature.

pub mod anthropic;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use sse::SseDecoder;
