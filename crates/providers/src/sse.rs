//! Anthropic SSE decoding into backend block events.
//!
//! The decoder is fed raw body bytes as they arrive over the wire and
//! returns the block events each completed `data:` line produces. Chunk
//! boundaries may fall anywhere, including inside a line or inside a
//! multi-byte character. A `data:` payload that is not valid JSON ends
//! the stream with [`ProviderError::MalformedEvent`].

use blv_core::error::ProviderError;
use blv_core::stream::{BackendEvent, BlockDelta, BlockKind, TextPayload, UsageSummary};
use serde_json::Value;
use tracing::{trace, warn};

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    usage: UsageSummary,
    finished: bool,
}

type Decoded = Result<BackendEvent, ProviderError>;

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk of the response body.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();

        // `\n` never occurs inside a UTF-8 sequence, so every complete line
        // is also a complete run of characters.
        while let Some(line_end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            if self.finished {
                continue;
            }

            let line = match std::str::from_utf8(&raw[..line_end]) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    self.fail(format!("invalid UTF-8 in SSE line: {e}"), &mut out);
                    continue;
                }
            };
            self.handle_line(line, &mut out);
        }

        out
    }

    fn fail(&mut self, message: String, out: &mut Vec<Decoded>) {
        warn!(error = %message, "Malformed Anthropic SSE frame, ending stream");
        self.finished = true;
        out.push(Err(ProviderError::MalformedEvent(message)));
    }

    fn handle_line(&mut self, line: &str, out: &mut Vec<Decoded>) {
        // Blank lines separate frames; `:` starts a comment; `event:` is
        // redundant with the `type` field of the data payload.
        if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
            return;
        }

        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }

        let event: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(data = %data, "Unparseable Anthropic SSE payload");
                self.fail(e.to_string(), out);
                return;
            }
        };

        self.handle_event(&event, out);
    }

    fn handle_event(&mut self, event: &Value, out: &mut Vec<Decoded>) {
        let index = event["index"].as_u64().unwrap_or(0) as usize;

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                self.usage.merge(parse_usage(&event["message"]["usage"]));
            }
            "content_block_start" => {
                let block = &event["content_block"];
                let kind = match block["type"].as_str().unwrap_or("") {
                    "text" => BlockKind::Text,
                    "thinking" | "redacted_thinking" => BlockKind::Reasoning,
                    "tool_use" => BlockKind::ToolUse,
                    other => {
                        trace!(block_type = %other, "Ignoring unknown content block type");
                        return;
                    }
                };

                out.push(Ok(BackendEvent::BlockStart {
                    index,
                    kind,
                    tool_name: block["name"].as_str().map(str::to_string),
                    tool_id: block["id"].as_str().map(str::to_string),
                }));

                // A text block may open with content already attached.
                if kind == BlockKind::Text {
                    if let Some(text) = text_of(&block["text"]).filter(|t| !t.is_empty()) {
                        out.push(Ok(BackendEvent::text(index, text)));
                    }
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                let mapped = match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => text_of(&delta["text"]).map(BlockDelta::Text),
                    "thinking_delta" => delta["thinking"]
                        .as_str()
                        .map(|t| BlockDelta::Reasoning(t.to_string())),
                    "input_json_delta" => delta["partial_json"]
                        .as_str()
                        .map(|p| BlockDelta::ToolArgFragment(p.to_string())),
                    _ => None,
                };
                if let Some(delta) = mapped {
                    out.push(Ok(BackendEvent::BlockDelta { index, delta }));
                }
            }
            "content_block_stop" => {
                out.push(Ok(BackendEvent::BlockStop { index }));
            }
            "message_delta" => {
                self.usage.merge(parse_usage(&event["usage"]));
            }
            "message_stop" => {
                self.finished = true;
                out.push(Ok(BackendEvent::Usage(self.usage)));
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                self.finished = true;
                out.push(Err(ProviderError::StreamInterrupted(message)));
            }
            _ => {}
        }
    }
}

fn text_of(value: &Value) -> Option<String> {
    serde_json::from_value::<TextPayload>(value.clone())
        .ok()
        .map(TextPayload::into_text)
}

fn parse_usage(value: &Value) -> UsageSummary {
    let field = |name: &str| value[name].as_u64().unwrap_or(0) as u32;
    UsageSummary {
        input_tokens: field("input_tokens"),
        cache_read_tokens: field("cache_read_input_tokens"),
        cache_creation_tokens: field("cache_creation_input_tokens"),
        output_tokens: field("output_tokens"),
    }
}
