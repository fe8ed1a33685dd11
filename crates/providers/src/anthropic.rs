//! The Anthropic Messages API backend.
//!
//! - Authenticates with `x-api-key` and pins `anthropic-version`
//! - System prompt as top-level blocks, with `cache_control` on the
//!   cache boundary
//! - Native tool use with forced or automatic tool choice
//! - Streaming via SSE, decoded into backend block events
//! - Extended thinking support

use async_trait::async_trait;
use blv_config::ProviderConfig;
use blv_core::error::ProviderError;
use blv_core::message::Message;
use blv_core::provider::{EventStream, Provider, ProviderRequest, ProviderResponse, SystemBlock};
use blv_core::stream::UsageSummary;
use blv_core::tool::{ToolChoice, ToolDefinition};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::sse::SseDecoder;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    api_version: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.into(),
            client: build_client(300),
        }
    }

    /// Create from the `[provider]` config section.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("ANTHROPIC_API_KEY is not set".into()))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            api_version: config.api_version.clone(),
            client: build_client(config.timeout_secs),
        })
    }

    /// Point at a proxy or a local test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// System blocks in API form. `cache_control` goes on blocks flagged
    /// as the end of a cacheable prefix.
    fn to_api_system(blocks: &[SystemBlock]) -> Vec<ApiSystemBlock> {
        blocks
            .iter()
            .filter(|b| !b.text.trim().is_empty())
            .map(|b| ApiSystemBlock {
                block_type: "text",
                text: b.text.clone(),
                cache_control: b.cache.then_some(CacheControl { kind: "ephemeral" }),
            })
            .collect()
    }

    /// Convert messages to Anthropic API format, skipping blank ones.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| !m.is_blank())
            .map(|m| AnthropicMessage {
                role: m.role.as_str().into(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    /// Build the JSON request body.
    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        let system = Self::to_api_system(&request.system);
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        let thinking = request.thinking_budget.filter(|b| *b > 0);
        match thinking {
            Some(budget) => {
                // Extended thinking rejects a caller-chosen temperature.
                body["thinking"] = serde_json::json!({
                    "type": "enabled",
                    "budget_tokens": budget
                });
            }
            None => {
                if let Some(temperature) = request.temperature {
                    body["temperature"] = serde_json::json!(temperature);
                }
            }
        }

        if request.tool_choice.allows_tools() && !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = match &request.tool_choice {
                ToolChoice::Tool(kind) => serde_json::json!({"type": "tool", "name": kind.name()}),
                _ => serde_json::json!({"type": "auto"}),
            };
        }

        body
    }

    async fn send(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(request, stream);

        debug!(
            provider = "anthropic",
            model = %request.model,
            stream,
            tools = request.tools.len(),
            thinking = request.thinking_budget.unwrap_or(0),
            "Sending request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(&body).send().await.map_err(map_send_error)?;
        check_status(response).await
    }

    /// Text blocks joined by newlines. Other block types are dropped.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let text = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        ProviderResponse {
            text,
            usage: UsageSummary {
                input_tokens: resp.usage.input_tokens,
                cache_read_tokens: resp.usage.cache_read_input_tokens,
                cache_creation_tokens: resp.usage.cache_creation_input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
            model: resp.model,
        }
    }
}

fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }
    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid Anthropic API key".into(),
        ));
    }
    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Anthropic API error");
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let response = self.send(&request, false).await?;

        let api_resp: AnthropicResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::ApiError {
                    status_code: 200,
                    message: format!("Failed to parse Anthropic response: {e}"),
                })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let response = self.send(&request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.feed(&bytes) {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped: the turn was cancelled.
                        return;
                    }
                }

                if decoder.is_finished() {
                    return;
                }
            }
            // Dropping `tx` without a usage event tells the consumer the
            // stream was truncated.
            debug!("Anthropic stream closed before message_stop");
        });

        Ok(rx)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiSystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {},
    #[serde(rename = "thinking")]
    Thinking {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
}
