//! The backend block-event protocol.
//!
//! A streamed completion arrives as block-lifecycle events: a block opens
//! with a type and an index, receives deltas, and closes. The sequence ends
//! with a single [`UsageSummary`]. Provider implementations translate their
//! wire format into these events; the agent's multiplexer consumes them.

use serde::{Deserialize, Serialize};

/// The type of an opened block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Reasoning,
    ToolUse,
}

/// Incremental payload for an open block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum BlockDelta {
    Text(String),
    Reasoning(String),
    /// A fragment of the tool's JSON arguments. Fragments are only valid
    /// JSON once concatenated in arrival order.
    ToolArgFragment(String),
}

/// Token accounting reported at the end of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub input_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
    pub output_tokens: u32,
}

impl UsageSummary {
    pub fn merge(&mut self, other: UsageSummary) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.cache_read_tokens = self.cache_read_tokens.max(other.cache_read_tokens);
        self.cache_creation_tokens = self.cache_creation_tokens.max(other.cache_creation_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
    }
}

/// One low-level event from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    BlockStart {
        index: usize,
        kind: BlockKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_id: Option<String>,
    },
    BlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    BlockStop {
        index: usize,
    },
    /// Terminal event.
    Usage(UsageSummary),
}

impl BackendEvent {
    pub fn text_start(index: usize) -> Self {
        BackendEvent::BlockStart {
            index,
            kind: BlockKind::Text,
            tool_name: None,
            tool_id: None,
        }
    }

    pub fn reasoning_start(index: usize) -> Self {
        BackendEvent::BlockStart {
            index,
            kind: BlockKind::Reasoning,
            tool_name: None,
            tool_id: None,
        }
    }

    pub fn tool_start(index: usize, name: impl Into<String>) -> Self {
        BackendEvent::BlockStart {
            index,
            kind: BlockKind::ToolUse,
            tool_name: Some(name.into()),
            tool_id: None,
        }
    }

    pub fn text(index: usize, text: impl Into<String>) -> Self {
        BackendEvent::BlockDelta {
            index,
            delta: BlockDelta::Text(text.into()),
        }
    }

    pub fn reasoning(index: usize, text: impl Into<String>) -> Self {
        BackendEvent::BlockDelta {
            index,
            delta: BlockDelta::Reasoning(text.into()),
        }
    }

    pub fn tool_args(index: usize, fragment: impl Into<String>) -> Self {
        BackendEvent::BlockDelta {
            index,
            delta: BlockDelta::ToolArgFragment(fragment.into()),
        }
    }

    pub fn stop(index: usize) -> Self {
        BackendEvent::BlockStop { index }
    }
}

/// Text content as a backend may carry it: a flat string, or a list of typed
/// sub-blocks whose text parts are concatenated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TextPayload {
    Flat(String),
    Blocks(Vec<TextSubBlock>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextSubBlock {
    #[serde(rename = "type", default)]
    pub block_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl TextPayload {
    pub fn into_text(self) -> String {
        match self {
            TextPayload::Flat(text) => text,
            TextPayload::Blocks(blocks) => blocks
                .into_iter()
                .filter(|b| b.block_type.as_deref().is_none_or(|t| t == "text"))
                .filter_map(|b| b.text)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_and_typed_payloads_yield_same_text() {
        let flat: TextPayload = serde_json::from_str(r#""hello world""#).unwrap();
        let typed: TextPayload = serde_json::from_str(
            r#"[{"type":"text","text":"hello "},{"type":"image"},{"type":"text","text":"world"}]"#,
        )
        .unwrap();
        assert_eq!(flat.into_text(), "hello world");
        assert_eq!(typed.into_text(), "hello world");
    }

    #[test]
    fn usage_merge_keeps_largest_counts() {
        let mut usage = UsageSummary {
            input_tokens: 120,
            cache_read_tokens: 80,
            ..Default::default()
        };
        usage.merge(UsageSummary {
            output_tokens: 42,
            ..Default::default()
        });
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.cache_read_tokens, 80);
        assert_eq!(usage.output_tokens, 42);
    }

    #[test]
    fn backend_event_serializes_with_type_tag() {
        let json = serde_json::to_value(BackendEvent::tool_args(2, "{\"a\"")).unwrap();
        assert_eq!(json["type"], "block_delta");
        assert_eq!(json["index"], 2);
        assert_eq!(json["delta"]["kind"], "tool_arg_fragment");
    }
}
