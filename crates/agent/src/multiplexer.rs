//! Demultiplexing the backend block-event stream.
//!
//! [`StreamMultiplexer`] is the synchronous state machine: it takes one
//! [`BackendEvent`] at a time and returns the [`OutputEvent`]s it produces.
//! [`OutputStream`] drives it from a provider channel as a `futures::Stream`.
//!
//! ```text
//! block_start(reasoning) ─► ReasoningStart
//! block_delta(reasoning) ─► ReasoningChunk
//! block_delta(text)      ─► ContentChunk
//! block_start(tool_use)  ─► ToolStart
//! block_delta(tool_arg)  ─► (appended to that block's buffer)
//! usage                  ─► ToolReady | ToolError per tool, then UsageFinal
//! transport error        ─► StreamError (pending tools discarded)
//! ```

use blv_core::error::ProviderError;
use blv_core::provider::EventStream;
use blv_core::stream::{BackendEvent, BlockDelta, BlockKind, UsageSummary};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::{debug, trace};

/// A typed event reconstructed from the backend stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    ReasoningStart,
    ReasoningChunk { text: String },
    ContentChunk { text: String },
    ToolStart { index: usize, name: String },
    /// The tool's accumulated arguments parsed as JSON.
    ToolReady { index: usize, name: String, args: Value },
    /// The tool's accumulated arguments did not parse. The invocation is discarded.
    ToolError { index: usize, name: String, reason: String },
    UsageFinal { usage: UsageSummary },
    /// Terminal transport failure. Content already emitted stays valid.
    StreamError { message: String },
}

impl OutputEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ReasoningStart => "reasoning_start",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ContentChunk { .. } => "content_chunk",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolReady { .. } => "tool_ready",
            Self::ToolError { .. } => "tool_error",
            Self::UsageFinal { .. } => "usage_final",
            Self::StreamError { .. } => "stream_error",
        }
    }
}

#[derive(Debug)]
struct PendingTool {
    name: String,
    args: String,
}

/// Per-stream state. Create one per backend call.
#[derive(Debug, Default)]
pub struct StreamMultiplexer {
    tools: BTreeMap<usize, PendingTool>,
    finished: bool,
}

impl StreamMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has been produced. Later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, event: BackendEvent) -> Vec<OutputEvent> {
        if self.finished {
            trace!(?event, "Event after end of stream ignored");
            return Vec::new();
        }

        match event {
            BackendEvent::BlockStart {
                index,
                kind,
                tool_name,
                ..
            } => match kind {
                BlockKind::Reasoning => vec![OutputEvent::ReasoningStart],
                BlockKind::Text => Vec::new(),
                BlockKind::ToolUse => match tool_name.filter(|n| !n.is_empty()) {
                    Some(name) => {
                        self.tools.insert(
                            index,
                            PendingTool {
                                name: name.clone(),
                                args: String::new(),
                            },
                        );
                        vec![OutputEvent::ToolStart { index, name }]
                    }
                    None => {
                        debug!(index, "Tool block without a name ignored");
                        Vec::new()
                    }
                },
            },
            BackendEvent::BlockDelta { index, delta } => match delta {
                BlockDelta::Text(text) if !text.is_empty() => {
                    vec![OutputEvent::ContentChunk { text }]
                }
                BlockDelta::Reasoning(text) if !text.is_empty() => {
                    vec![OutputEvent::ReasoningChunk { text }]
                }
                BlockDelta::ToolArgFragment(fragment) => {
                    match self.tools.get_mut(&index) {
                        Some(tool) => tool.args.push_str(&fragment),
                        None => trace!(index, "Argument fragment for unknown block dropped"),
                    }
                    Vec::new()
                }
                _ => Vec::new(),
            },
            BackendEvent::BlockStop { .. } => Vec::new(),
            BackendEvent::Usage(usage) => {
                let mut out = self.resolve_tools();
                out.push(OutputEvent::UsageFinal { usage });
                self.finished = true;
                out
            }
        }
    }

    /// A transport error: pending tools are discarded.
    pub fn fail(&mut self, error: &ProviderError) -> Vec<OutputEvent> {
        self.terminate(error.to_string())
    }

    /// The channel closed. Without a usage summary that is a transport failure.
    pub fn finish(&mut self) -> Vec<OutputEvent> {
        self.terminate("stream ended before the usage summary".to_string())
    }

    fn terminate(&mut self, message: String) -> Vec<OutputEvent> {
        if self.finished {
            return Vec::new();
        }
        if !self.tools.is_empty() {
            debug!(discarded = self.tools.len(), "Unfinished tool invocations discarded");
        }
        self.tools.clear();
        self.finished = true;
        vec![OutputEvent::StreamError { message }]
    }

    fn resolve_tools(&mut self) -> Vec<OutputEvent> {
        std::mem::take(&mut self.tools)
            .into_iter()
            .map(|(index, tool)| match parse_args(&tool.args) {
                Ok(args) => OutputEvent::ToolReady {
                    index,
                    name: tool.name,
                    args,
                },
                Err(e) => OutputEvent::ToolError {
                    index,
                    name: tool.name,
                    reason: e.to_string(),
                },
            })
            .collect()
    }
}

fn parse_args(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

/// Multiplexed view of a provider channel.
pub struct OutputStream {
    rx: EventStream,
    mux: StreamMultiplexer,
    pending: VecDeque<OutputEvent>,
}

/// Wrap a provider's event channel.
pub fn consume(rx: EventStream) -> OutputStream {
    OutputStream {
        rx,
        mux: StreamMultiplexer::new(),
        pending: VecDeque::new(),
    }
}

impl Stream for OutputStream {
    type Item = OutputEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.mux.is_finished() {
                return Poll::Ready(None);
            }
            let produced = match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(event)) => this.mux.push(event),
                Some(Err(error)) => this.mux.fail(&error),
                None => this.mux.finish(),
            };
            this.pending.extend(produced);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn usage() -> BackendEvent {
        BackendEvent::Usage(UsageSummary {
            input_tokens: 12,
            cache_read_tokens: 8,
            cache_creation_tokens: 0,
            output_tokens: 30,
        })
    }

    fn run(events: Vec<BackendEvent>) -> Vec<OutputEvent> {
        let mut mux = StreamMultiplexer::new();
        let mut out: Vec<_> = events.into_iter().flat_map(|e| mux.push(e)).collect();
        out.extend(mux.finish());
        out
    }

    #[test]
    fn arrival_order_is_preserved() {
        let out = run(vec![
            BackendEvent::reasoning_start(0),
            BackendEvent::reasoning(0, "think"),
            BackendEvent::stop(0),
            BackendEvent::text_start(1),
            BackendEvent::text(1, "Hello"),
            BackendEvent::text(1, " world"),
            BackendEvent::stop(1),
            BackendEvent::tool_start(2, "suggest_test"),
            BackendEvent::tool_args(2, r#"{"pattern":"x"}"#),
            BackendEvent::stop(2),
            usage(),
        ]);
        let types: Vec<_> = out.iter().map(OutputEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                "reasoning_start",
                "reasoning_chunk",
                "content_chunk",
                "content_chunk",
                "tool_start",
                "tool_ready",
                "usage_final"
            ]
        );
        assert_eq!(
            out[5],
            OutputEvent::ToolReady {
                index: 2,
                name: "suggest_test".into(),
                args: json!({"pattern": "x"}),
            }
        );
    }

    #[test]
    fn every_two_way_split_reconstructs_the_same_args() {
        let raw = r#"{"pattern":"PaRes réplay","steps":["a","b"],"worked":false,"n":12}"#;
        let whole: Value = serde_json::from_str(raw).unwrap();

        for (cut, _) in raw.char_indices().skip(1) {
            let (a, b) = raw.split_at(cut);
            let out = run(vec![
                BackendEvent::tool_start(0, "save_event"),
                BackendEvent::tool_args(0, a),
                BackendEvent::tool_args(0, b),
                BackendEvent::stop(0),
                usage(),
            ]);
            let ready = out
                .iter()
                .find_map(|e| match e {
                    OutputEvent::ToolReady { args, .. } => Some(args.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("no ToolReady for cut at {cut}"));
            assert_eq!(ready, whole, "cut at {cut}");
        }
    }

    #[test]
    fn malformed_args_surface_as_tool_error() {
        let out = run(vec![
            BackendEvent::tool_start(0, "save_event"),
            BackendEvent::tool_args(0, r#"{"pattern": "x""#),
            usage(),
        ]);
        match &out[1] {
            OutputEvent::ToolError { name, reason, .. } => {
                assert_eq!(name, "save_event");
                assert!(!reason.is_empty());
            }
            other => panic!("expected ToolError, got {other:?}"),
        }
        assert!(matches!(out[2], OutputEvent::UsageFinal { .. }));
    }

    #[test]
    fn tools_resolve_in_index_order_with_empty_args_as_object() {
        let out = run(vec![
            BackendEvent::tool_start(3, "ask_clarification"),
            BackendEvent::tool_start(1, "show_analysis"),
            BackendEvent::tool_args(3, r#"{"question":"which card?"}"#),
            usage(),
        ]);
        let ready: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                OutputEvent::ToolReady { index, args, .. } => Some((*index, args.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(ready, vec![(1, json!({})), (3, json!({"question": "which card?"}))]);
    }

    #[test]
    fn nameless_tool_blocks_are_ignored() {
        let out = run(vec![
            BackendEvent::BlockStart {
                index: 0,
                kind: BlockKind::ToolUse,
                tool_name: None,
                tool_id: None,
            },
            BackendEvent::tool_args(0, "{}"),
            usage(),
        ]);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], OutputEvent::UsageFinal { .. }));
    }

    #[test]
    fn closing_without_usage_discards_pending_tools() {
        let out = run(vec![
            BackendEvent::text_start(0),
            BackendEvent::text(0, "partial"),
            BackendEvent::tool_start(1, "save_event"),
            BackendEvent::tool_args(1, "{}"),
        ]);
        let types: Vec<_> = out.iter().map(OutputEvent::event_type).collect();
        assert_eq!(types, vec!["content_chunk", "tool_start", "stream_error"]);
    }

    #[test]
    fn events_after_usage_are_ignored() {
        let mut mux = StreamMultiplexer::new();
        assert_eq!(mux.push(usage()).len(), 1);
        assert!(mux.push(BackendEvent::text(0, "late")).is_empty());
        assert!(mux.finish().is_empty());
    }

    #[test]
    fn usage_final_serializes_with_tag() {
        let json = serde_json::to_string(&OutputEvent::UsageFinal {
            usage: UsageSummary::default(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"usage_final""#));
    }

    #[tokio::test]
    async fn transport_error_terminates_the_stream() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(Ok(BackendEvent::text(0, "kept"))).await.unwrap();
        tx.send(Ok(BackendEvent::tool_start(1, "save_event"))).await.unwrap();
        tx.send(Err(ProviderError::StreamInterrupted("connection reset".into())))
            .await
            .unwrap();
        tx.send(Ok(BackendEvent::text(0, "never seen"))).await.unwrap();

        let events: Vec<_> = consume(rx).collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], OutputEvent::ContentChunk { text: "kept".into() });
        match &events[2] {
            OutputEvent::StreamError { message } => assert!(message.contains("connection reset")),
            other => panic!("expected StreamError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_ends_after_usage_even_if_channel_stays_open() {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(Ok(BackendEvent::text(0, "hi"))).await.unwrap();
        tx.send(Ok(usage())).await.unwrap();

        let events: Vec<_> = consume(rx).collect().await;
        assert_eq!(events.len(), 2);
        drop(tx);
    }
}
