//! Shared fixtures for the turn-level integration tests.
#![allow(dead_code)]

use blv_agent::{Orchestrator, TurnEvent, TurnSummary};
use blv_config::{ContextLimits, ModelsConfig};
use blv_core::message::Session;
use blv_core::store::KnowledgeStore;
use blv_core::stream::BackendEvent;
use blv_providers::mock::{ScriptedProvider, usage};
use blv_router::{IntentClassifier, Router, RoutingPolicy};
use blv_store::InMemoryStore;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryStore>,
    pub orchestrator: Orchestrator,
    pub session: Session,
}

impl Harness {
    /// Routed orchestrator over an in-memory store.
    pub async fn routed(provider: ScriptedProvider) -> Self {
        let provider = Arc::new(provider);
        let router = Router::new(
            IntentClassifier::new(provider.clone(), "fast-model"),
            RoutingPolicy::new(ModelsConfig::default()),
        );
        Self::with_router(provider, router).await
    }

    /// Routing disabled: no classifier call.
    pub async fn unrouted(provider: ScriptedProvider) -> Self {
        let provider = Arc::new(provider);
        let router = Router::unrouted(RoutingPolicy::new(ModelsConfig::default()));
        Self::with_router(provider, router).await
    }

    async fn with_router(provider: Arc<ScriptedProvider>, router: Router) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation(Some("test")).await.unwrap();
        let orchestrator = Orchestrator::new(provider.clone(), store.clone(), router);
        Self {
            provider,
            store,
            orchestrator,
            session: Session::new(conversation.id),
        }
    }

    pub fn map(mut self, f: impl FnOnce(Orchestrator) -> Orchestrator) -> Self {
        self.orchestrator = f(self.orchestrator);
        self
    }

    pub fn limits() -> ContextLimits {
        ContextLimits::default()
    }

    pub async fn turn(&self, message: &str) -> (TurnSummary, Vec<TurnEvent>) {
        let (tx, mut rx) = mpsc::channel(512);
        let summary = self
            .orchestrator
            .process_turn(&self.session, message, &tx)
            .await
            .unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (summary, events)
    }

    /// The main (streamed) request of the most recent turn.
    pub fn last_request(&self) -> blv_core::provider::ProviderRequest {
        self.provider.requests().pop().unwrap()
    }
}

/// A stream with one text block and one tool call, args split in two.
pub fn text_and_tool(text: &str, tool: &str, args_a: &str, args_b: &str) -> Vec<BackendEvent> {
    vec![
        BackendEvent::text_start(0),
        BackendEvent::text(0, text),
        BackendEvent::stop(0),
        BackendEvent::tool_start(1, tool),
        BackendEvent::tool_args(1, args_a),
        BackendEvent::tool_args(1, args_b),
        BackendEvent::stop(1),
        usage(42),
    ]
}

pub fn text_only(text: &str) -> Vec<BackendEvent> {
    vec![
        BackendEvent::text_start(0),
        BackendEvent::text(0, text),
        BackendEvent::stop(0),
        usage(7),
    ]
}

pub fn event_types(events: &[TurnEvent]) -> Vec<&'static str> {
    events.iter().map(TurnEvent::event_type).collect()
}
