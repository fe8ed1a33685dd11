//! Scripted providers for tests.
//!
//! `ScriptedProvider` answers `complete()` from a queue of canned texts and
//! `stream()` from a queue of canned block-event scripts, recording every
//! request it receives.

use async_trait::async_trait;
use blv_core::error::ProviderError;
use blv_core::provider::{EventStream, Provider, ProviderRequest, ProviderResponse};
use blv_core::stream::{BackendEvent, UsageSummary};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with this text.
    Text(String),
    /// Fail the call.
    Fail(ProviderError),
    /// Stream these events, then close the channel.
    Events(Vec<Result<BackendEvent, ProviderError>>),
    /// Stream these events, then hang with the channel open.
    Stalled(Vec<BackendEvent>),
}

#[derive(Default)]
pub struct ScriptedProvider {
    completions: Mutex<VecDeque<Script>>,
    streams: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
    held: Mutex<Vec<tokio::sync::mpsc::Sender<Result<BackendEvent, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `complete()` reply.
    pub fn with_completion(self, text: &str) -> Self {
        self.push_completion(Script::Text(text.to_string()));
        self
    }

    /// Queue a failing `complete()`.
    pub fn with_completion_error(self, error: ProviderError) -> Self {
        self.push_completion(Script::Fail(error));
        self
    }

    /// Queue a `stream()` reply.
    pub fn with_stream(self, events: Vec<BackendEvent>) -> Self {
        self.push_stream(Script::Events(events.into_iter().map(Ok).collect()));
        self
    }

    /// Queue a `stream()` reply that may contain transport errors.
    pub fn with_raw_stream(self, events: Vec<Result<BackendEvent, ProviderError>>) -> Self {
        self.push_stream(Script::Events(events));
        self
    }

    /// Queue a `stream()` reply that never delivers its usage summary.
    pub fn with_stalled_stream(self, events: Vec<BackendEvent>) -> Self {
        self.push_stream(Script::Stalled(events));
        self
    }

    pub fn push_completion(&self, script: Script) {
        self.completions.lock().unwrap().push_back(script);
    }

    pub fn push_stream(&self, script: Script) {
        self.streams.lock().unwrap().push_back(script);
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        let script = self.completions.lock().unwrap().pop_front();
        match script {
            Some(Script::Text(text)) => Ok(ProviderResponse {
                text,
                usage: UsageSummary {
                    input_tokens: 10,
                    output_tokens: 1,
                    ..Default::default()
                },
                model,
            }),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Events(_) | Script::Stalled(_)) | None => Err(ProviderError::NotConfigured(
                "ScriptedProvider: no completion scripted".into(),
            )),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let script = self.streams.lock().unwrap().pop_front();
        let mut stall = false;
        let events = match script {
            Some(Script::Events(events)) => events,
            Some(Script::Stalled(events)) => {
                stall = true;
                events.into_iter().map(Ok).collect()
            }
            Some(Script::Fail(error)) => return Err(error),
            Some(Script::Text(text)) => vec![
                Ok(BackendEvent::text_start(0)),
                Ok(BackendEvent::text(0, text)),
                Ok(BackendEvent::stop(0)),
                Ok(BackendEvent::Usage(UsageSummary::default())),
            ],
            None => {
                return Err(ProviderError::NotConfigured(
                    "ScriptedProvider: no stream scripted".into(),
                ));
            }
        };

        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers the whole script.
            let _ = tx.try_send(event);
        }
        if stall {
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }
}

/// A usage summary with only output tokens set.
pub fn usage(output_tokens: u32) -> BackendEvent {
    BackendEvent::Usage(UsageSummary {
        input_tokens: 100,
        output_tokens,
        ..Default::default()
    })
}
