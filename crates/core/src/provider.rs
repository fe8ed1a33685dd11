//! Provider trait: the abstraction over the model backend.
//!
//! A Provider sends one request and returns either a complete response or a
//! stream of [`BackendEvent`]s. The streaming form is the primary path; the
//! plain completion serves auxiliary calls (intent classification, flow
//! analysis).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use crate::error::ProviderError;
use crate::message::Message;
use crate::stream::{BackendEvent, UsageSummary};
use crate::tool::{ToolChoice, ToolDefinition};

/// One section of the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,

    /// Marks the end of a cacheable prefix. Backends that support prompt
    /// caching cache everything up to and including this block.
    #[serde(default)]
    pub cache: bool,
}

impl SystemBlock {
    pub fn cached(text: impl Into<String>) -> Self {
        Self { text: text.into(), cache: true }
    }

    pub fn volatile(text: impl Into<String>) -> Self {
        Self { text: text.into(), cache: false }
    }
}

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Concrete model id
    pub model: String,

    /// System prompt, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemBlock>,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Sampling temperature; `None` leaves it to the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    pub tool_choice: ToolChoice,

    /// Extended reasoning budget in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl ProviderRequest {
    /// A bare single-message request with no tools.
    pub fn simple(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            system: Vec::new(),
            messages: vec![Message::user(prompt)],
            temperature: None,
            max_tokens,
            tools: Vec::new(),
            tool_choice: ToolChoice::None,
            thinking_budget: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Concatenated system prompt text.
    pub fn system_text(&self) -> String {
        self.system
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text
    pub text: String,

    /// Token usage statistics
    #[serde(default)]
    pub usage: UsageSummary,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

pub type EventStream = mpsc::Receiver<Result<BackendEvent, ProviderError>>;

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Send a request and get the backend's block events.
    ///
    /// Default implementation calls `complete()` and replays the result as a
    /// single text block followed by its usage.
    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(4);
        let events = [
            BackendEvent::text_start(0),
            BackendEvent::text(0, response.text),
            BackendEvent::stop(0),
            BackendEvent::Usage(response.usage),
        ];
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
