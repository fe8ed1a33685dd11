//! `blv chat`: interactive or single-message chat mode.

use blv_agent::{Orchestrator, TurnEvent, TurnStatus, TurnSummary};
use blv_core::message::Session;
use blv_core::store::KnowledgeStore;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub async fn run(message: Option<String>, conversation: Option<String>) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let provider = super::provider(&config)?;
    let store = super::open_store(&config).await?;

    let conversation = match conversation {
        Some(name) => store.get_or_create_conversation(&name).await?,
        None => store.create_conversation(None).await?,
    };
    let session =
        Session::new(conversation.id.clone()).with_history_limit(config.conversation.history_limit);
    let orchestrator = Orchestrator::from_config(provider, store.clone(), &config);

    if let Some(msg) = message {
        turn(&orchestrator, &session, &msg).await?;
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          blv: BLV assistant, chat mode        ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Conversation: {}", conversation.name);
    println!("  Model:        {}", config.models.standard);
    println!(
        "  Routing:      {}",
        if orchestrator.router().is_enabled() { "on" } else { "off" }
    );
    println!(
        "  History:      {} messages",
        store.message_count(&conversation.id).await?
    );
    println!();
    println!("  Type 'exit' or Ctrl+C to quit. Ctrl+C during a reply cancels it.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        if let Err(e) = turn(&orchestrator, &session, line).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Run one turn, rendering events as they arrive. Ctrl-C cancels the turn.
async fn turn(orchestrator: &Orchestrator, session: &Session, message: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(64);

    let process = async move {
        let tx = tx;
        orchestrator.process_turn(session, message, &tx).await
    };
    let display = async {
        while let Some(event) = rx.recv().await {
            render(&event);
        }
    };

    tokio::select! {
        (summary, ()) = async { tokio::join!(process, display) } => {
            report(&summary?);
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            eprintln!("  [Cancelled]");
        }
    }
    Ok(())
}

fn render(event: &TurnEvent) {
    match event {
        TurnEvent::Intent { intent } => eprintln!("  [{intent}]"),
        TurnEvent::TokenLimitReached { used, limit } => {
            eprintln!("  Conversation is full ({used}/{limit} tokens). Start a new one.");
        }
        TurnEvent::ReasoningStart => eprintln!("  💭 thinking..."),
        TurnEvent::Reasoning { .. } => {}
        TurnEvent::Content { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        TurnEvent::ToolStart { .. } | TurnEvent::Usage { .. } | TurnEvent::Done { .. } => {}
        TurnEvent::ToolArgsInvalid { name, reason } => {
            eprintln!("\n  [{name}] invalid arguments: {reason}");
        }
        TurnEvent::ToolDropped { name, reason } => eprintln!("\n  [{name}] ignored: {reason}"),
        TurnEvent::HookWarning { message, .. } => eprintln!("\n  ⚠️  {message}"),
        TurnEvent::HookDenied { message, .. } => eprintln!("\n  ⛔ {message}"),
        TurnEvent::ToolResult { output, .. } => {
            println!();
            for line in output.lines() {
                println!("  {line}");
            }
        }
        TurnEvent::ToolFailed { tool, reason } => eprintln!("\n  [{tool}] failed: {reason}"),
        TurnEvent::StreamError { message } => eprintln!("\n  [Stream error] {message}"),
    }
}

fn report(summary: &TurnSummary) {
    if summary.status == TurnStatus::TokenLimitReached {
        return;
    }
    println!();
    if let Some(usage) = summary.usage {
        tracing::debug!(
            input = usage.input_tokens,
            cached = usage.cache_read_tokens,
            output = usage.output_tokens,
            "Turn usage"
        );
    }
}
