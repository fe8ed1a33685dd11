mod common;

use blv_agent::{TurnEvent, TurnStatus};
use blv_config::ModelsConfig;
use blv_core::error::ProviderError;
use blv_core::knowledge::{HookRecord, KnowledgeBody, NewFinding};
use blv_core::message::{Role, Session};
use blv_core::store::KnowledgeStore;
use blv_core::stream::BackendEvent;
use blv_core::tool::ToolChoice;
use blv_providers::mock::{ScriptedProvider, usage};
use blv_router::Intent;
use blv_store::Deduplicator;
use blv_tools::ToolOutcome;
use common::{Harness, event_types, text_and_tool, text_only};

const SAVE_ARGS: &str = r#"{"pattern":"PaRes replay","worked":false,"target":"shop","technique":"replay token","impact":"payment bypass"}"#;

fn tool_names(request: &blv_core::provider::ProviderRequest) -> Vec<String> {
    request.tools.iter().map(|t| t.name.clone()).collect()
}

#[tokio::test]
async fn save_turn_advertises_only_save_event_and_dedups() {
    let (a, b) = SAVE_ARGS.split_at(37);
    let h = Harness::routed(
        ScriptedProvider::new()
            .with_completion("SAVE")
            .with_completion("save")
            .with_stream(text_and_tool("Logged.", "save_event", a, b))
            .with_stream(text_and_tool("Logged again.", "save_event", a, b)),
    )
    .await;

    let (summary, events) = h.turn("Tried PaRes replay on shop, it was blocked").await;
    assert_eq!(summary.intent, Some(Intent::Save));
    assert_eq!(summary.saved(), 1);
    assert!(matches!(events[0], TurnEvent::Intent { intent: Intent::Save }));

    let request = h.last_request();
    assert_eq!(tool_names(&request), vec!["save_event"]);
    assert_eq!(request.tool_choice, ToolChoice::Auto);
    assert_eq!(request.temperature, Some(0.2));
    assert_eq!(request.max_tokens, 512);
    assert!(request.system[0].cache);
    assert!(request.system[0].text.starts_with("# ABSOLUTE RULE"));

    let (summary, _) = h.turn("Same test again, still blocked").await;
    assert_eq!(summary.saved(), 0);
    assert_eq!(summary.duplicates(), 1);
    assert_eq!(h.store.get_recent_events(10, false).await.unwrap().len(), 1);

    // The second turn's volatile suffix lists the stored event.
    let request = h.last_request();
    assert!(request.system[1].text.contains("🛡️ PaRes replay | shop"));
}

#[tokio::test]
async fn memory_turn_never_invokes_tools() {
    let h = Harness::routed(
        ScriptedProvider::new()
            .with_completion("MEMORY")
            .with_stream(text_and_tool(
                "You tested PaRes replay.",
                "save_event",
                r#"{"pattern":"x","#,
                r#""target":"y","technique":"t","impact":"i"}"#,
            )),
    )
    .await;

    let (summary, events) = h.turn("What did I test on shop?").await;

    let request = h.last_request();
    assert!(request.tools.is_empty());
    assert_eq!(request.tool_choice, ToolChoice::None);
    assert_eq!(request.model, ModelsConfig::default().fast);
    assert_eq!(summary.dropped, 1);
    assert!(summary.outcomes.is_empty());
    assert!(event_types(&events).contains(&"tool_dropped"));
    assert!(h.store.get_recent_events(10, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn idea_turn_forces_suggest_test() {
    let h = Harness::routed(
        ScriptedProvider::new()
            .with_completion("IDEA")
            .with_stream(text_and_tool(
                "",
                "suggest_test",
                r#"{"pattern":"IDOR","steps":["swap id"],"#,
                r#""expected":"other user's order"}"#,
            )),
    )
    .await;

    let (summary, _) = h.turn("Any idea for the order API?").await;
    let request = h.last_request();
    assert_eq!(tool_names(&request), vec!["suggest_test"]);
    assert_eq!(
        request.tool_choice,
        ToolChoice::Tool(blv_core::tool::ToolKind::SuggestTest)
    );
    assert!(matches!(summary.outcomes[0], ToolOutcome::Suggestion(_)));
    // Empty text is never written as an assistant message.
    assert_eq!(h.store.message_count(&h.session.conversation_id).await.unwrap(), 1);
}

#[tokio::test]
async fn classifier_failure_falls_back_to_chat() {
    let h = Harness::routed(
        ScriptedProvider::new()
            .with_completion_error(ProviderError::Timeout("slow".into()))
            .with_stream(text_only("Hello!")),
    )
    .await;

    let (summary, _) = h.turn("hi").await;
    assert_eq!(summary.intent, Some(Intent::Chat));
    assert_eq!(tool_names(&h.last_request()).len(), 4);
}

#[tokio::test]
async fn denied_hook_blocks_persistence() {
    let h = Harness::unrouted(ScriptedProvider::new().with_stream(text_and_tool(
        "Saving.",
        "save_event",
        r#"{"pattern":"#,
        r#""x"}"#,
    )))
    .await;
    h.store
        .add_hook(HookRecord::new(
            "save-complete",
            "pre_tool",
            "save_event",
            "required_fields",
            Some(r#"["pattern","target","technique","impact"]"#),
            "deny",
        ))
        .await
        .unwrap();

    let (summary, events) = h.turn("save it").await;

    assert_eq!(summary.denied, 1);
    assert!(summary.outcomes.is_empty());
    let denied = events
        .iter()
        .find_map(|e| match e {
            TurnEvent::HookDenied { hook, message, .. } => Some((hook.clone(), message.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(denied.0.as_deref(), Some("save-complete"));
    assert_eq!(denied.1, "Missing required fields: target, technique, impact");
    assert!(h.store.get_recent_events(10, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn warning_hook_proceeds_with_original_args() {
    let h = Harness::unrouted(ScriptedProvider::new().with_stream(text_and_tool(
        "",
        "show_analysis",
        r#"{"title":"A very long analysis title","#,
        r#""pattern":"price","hypothesis":"h","tests":["a"]}"#,
    )))
    .await;
    h.store
        .add_hook(HookRecord::new(
            "short-title",
            "pre_tool",
            "show_.*",
            "length",
            Some("title:10"),
            "warn",
        ))
        .await
        .unwrap();

    let (summary, events) = h.turn("analyse the cart").await;

    let types = event_types(&events);
    let warn_at = types.iter().position(|t| *t == "hook_warning").unwrap();
    let result_at = types.iter().position(|t| *t == "tool_result").unwrap();
    assert!(warn_at < result_at);
    match &summary.outcomes[0] {
        ToolOutcome::Analysis(args) => assert_eq!(args.title, "A very long analysis title"),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn token_ceiling_refuses_before_any_backend_call() {
    let h = Harness::routed(ScriptedProvider::new()).await;
    h.store
        .append_message(&h.session.conversation_id, Role::Assistant, "long", 200_000)
        .await
        .unwrap();

    let (summary, events) = h.turn("one more?").await;

    assert_eq!(summary.status, TurnStatus::TokenLimitReached);
    assert_eq!(event_types(&events), vec!["token_limit_reached"]);
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(h.store.message_count(&h.session.conversation_id).await.unwrap(), 1);
}

#[tokio::test]
async fn stream_error_keeps_partial_text_and_discards_tools() {
    let h = Harness::unrouted(ScriptedProvider::new().with_raw_stream(vec![
        Ok(BackendEvent::text_start(0)),
        Ok(BackendEvent::text(0, "Partial ans")),
        Ok(BackendEvent::tool_start(1, "save_event")),
        Ok(BackendEvent::tool_args(1, SAVE_ARGS)),
        Err(ProviderError::StreamInterrupted("connection reset".into())),
    ]))
    .await;

    let (summary, events) = h.turn("go").await;

    assert_eq!(summary.status, TurnStatus::StreamFailed);
    assert_eq!(summary.text, "Partial ans");
    assert!(summary.outcomes.is_empty());
    let types = event_types(&events);
    assert!(types.contains(&"stream_error"));
    assert!(!types.contains(&"tool_result"));
    assert_eq!(types.last(), Some(&"done"));

    let history = h
        .store
        .get_history(&h.session.conversation_id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Partial ans");
    assert_eq!(history[1].token_count, 2);
    assert!(h.store.get_recent_events(10, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn history_is_replayed_without_blank_messages() {
    let h = Harness::unrouted(
        ScriptedProvider::new()
            .with_stream(text_only("reply one"))
            .with_stream(text_only("reply two")),
    )
    .await;

    h.turn("first").await;
    h.store
        .append_message(&h.session.conversation_id, Role::Assistant, "   ", 0)
        .await
        .unwrap();
    h.turn("second").await;

    let contents: Vec<_> = h
        .last_request()
        .messages
        .iter()
        .map(|m| (m.role, m.content.clone()))
        .collect();
    assert_eq!(
        contents,
        vec![
            (Role::User, "first".to_string()),
            (Role::Assistant, "reply one".to_string()),
            (Role::User, "second".to_string()),
        ]
    );

    let history = h
        .store
        .get_history(&h.session.conversation_id, 10)
        .await
        .unwrap();
    assert_eq!(history.last().unwrap().token_count, 7);
}

#[tokio::test]
async fn sessions_do_not_share_history() {
    let h = Harness::unrouted(
        ScriptedProvider::new()
            .with_stream(text_only("a"))
            .with_stream(text_only("b")),
    )
    .await;
    let other = h.store.create_conversation(Some("other")).await.unwrap();
    let other = Session::new(other.id);

    h.turn("in the first conversation").await;

    let (tx, _rx) = tokio::sync::mpsc::channel(64);
    h.orchestrator
        .process_turn(&other, "in the second", &tx)
        .await
        .unwrap();

    assert_eq!(h.last_request().messages.len(), 1);
    assert_eq!(h.store.message_count(&other.conversation_id).await.unwrap(), 2);
}

#[tokio::test]
async fn events_follow_arrival_order() {
    let h = Harness::unrouted(ScriptedProvider::new().with_stream(vec![
        BackendEvent::reasoning_start(0),
        BackendEvent::reasoning(0, "which card?"),
        BackendEvent::stop(0),
        BackendEvent::text_start(1),
        BackendEvent::text(1, "One question first."),
        BackendEvent::stop(1),
        BackendEvent::tool_start(2, "ask_clarification"),
        BackendEvent::tool_args(2, r#"{"question":"Which card did you use?"}"#),
        BackendEvent::stop(2),
        usage(10),
    ]))
    .await;

    let (summary, events) = h.turn("it failed").await;

    assert_eq!(
        event_types(&events),
        vec![
            "reasoning_start",
            "reasoning",
            "content",
            "tool_start",
            "usage",
            "tool_result",
            "done"
        ]
    );
    assert_eq!(summary.reasoning, "which card?");
    assert_eq!(summary.outcomes[0].render(), "❓ Which card did you use?");
}

#[tokio::test]
async fn malformed_and_unknown_tools_are_reported() {
    let h = Harness::unrouted(ScriptedProvider::new().with_stream(vec![
        BackendEvent::tool_start(0, "save_event"),
        BackendEvent::tool_args(0, r#"{"pattern": "#),
        BackendEvent::tool_start(1, "shell"),
        BackendEvent::tool_args(1, r#"{"cmd":"ls"}"#),
        usage(5),
    ]))
    .await;

    let (summary, events) = h.turn("do it").await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.dropped, 1);
    let types = event_types(&events);
    assert!(types.contains(&"tool_args_invalid"));
    assert!(types.contains(&"tool_dropped"));
    assert!(h.store.get_recent_events(10, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn full_context_scenario() {
    let h = Harness::unrouted(ScriptedProvider::new().with_stream(text_only("ok"))).await;
    for (name, priority) in [("coupon", 1), ("3ds", 9), ("cart", 5)] {
        h.store
            .add_entry(
                name,
                priority,
                KnowledgeBody::Trigger {
                    pattern: name.into(),
                    response: format!("test {name}"),
                    category: None,
                },
            )
            .await
            .unwrap();
    }
    let dedup = Deduplicator::new(h.store.clone());
    for i in 0..20 {
        dedup
            .record_finding(NewFinding {
                pattern: format!("pattern {i}"),
                target: "shop".into(),
                worked: true,
                ..Default::default()
            })
            .await
            .unwrap();
    }

    h.turn("hello").await;
    let request = h.last_request();

    let prefix = &request.system[0];
    assert!(prefix.cache);
    assert!(!prefix.text.contains("BEHAVIOURAL RULES"));
    let triggers: Vec<_> = prefix.text.lines().filter(|l| l.contains(" → ")).collect();
    assert_eq!(
        triggers,
        vec!["- 3ds → test 3ds", "- cart → test cart", "- coupon → test coupon"]
    );

    let suffix = &request.system[1];
    assert!(!suffix.cache);
    let memory_lines = suffix.text.lines().filter(|l| l.starts_with("- 💥")).count();
    assert_eq!(memory_lines, Harness::limits().memory_events);
}

#[tokio::test]
async fn legacy_markers_go_through_the_same_gate() {
    let marker = "Noted. [FINDING: IDOR | api.shop | swap order id | data leak | vuln]";
    let h = Harness::unrouted(
        ScriptedProvider::new()
            .with_stream(text_only(marker))
            .with_stream(text_only(marker)),
    )
    .await
    .map(|o| o.with_legacy_markers(true));

    let (summary, _) = h.turn("logged?").await;
    assert_eq!(summary.saved(), 1);
    let stored = h.store.get_recent_events(10, false).await.unwrap();
    assert_eq!(stored[0].pattern, "IDOR");
    assert!(stored[0].worked);

    let (summary, _) = h.turn("again").await;
    assert_eq!(summary.duplicates(), 1);
}

#[tokio::test]
async fn legacy_markers_are_ignored_when_disabled() {
    let h = Harness::unrouted(
        ScriptedProvider::new().with_stream(text_only("[FINDING: IDOR | api.shop]")),
    )
    .await;

    let (summary, _) = h.turn("logged?").await;
    assert!(summary.outcomes.is_empty());
    assert!(h.store.get_recent_events(10, false).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_turn_never_runs_a_pending_tool() {
    let (a, b) = SAVE_ARGS.split_at(37);
    let h = Harness::unrouted(ScriptedProvider::new().with_stalled_stream(vec![
        BackendEvent::text_start(0),
        BackendEvent::text(0, "Saving now"),
        BackendEvent::stop(0),
        BackendEvent::tool_start(1, "save_event"),
        BackendEvent::tool_args(1, a),
        BackendEvent::tool_args(1, b),
        BackendEvent::stop(1),
    ]))
    .await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let turn = h.orchestrator.process_turn(&h.session, "save it", &tx);
    let cancelled = tokio::time::timeout(std::time::Duration::from_secs(30), turn).await;
    assert!(cancelled.is_err());
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let types = event_types(&events);
    assert_eq!(types, vec!["content", "tool_start"]);

    assert!(h.store.get_recent_events(10, false).await.unwrap().is_empty());
    // Only the user message was written before the stream opened.
    assert_eq!(h.store.message_count(&h.session.conversation_id).await.unwrap(), 1);
}
