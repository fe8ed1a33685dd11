//! `blv hooks check`: evaluate the stored pre-tool hooks without running anything.

use anyhow::Context;
use blv_hooks::{Decision, HookEngine, HookPhase};

pub async fn check(tool: &str, raw_args: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;
    let args: serde_json::Value =
        serde_json::from_str(raw_args).context("--args must be valid JSON")?;

    let phase = HookPhase::PreTool;
    let engine = HookEngine::load(store.as_ref(), &phase).await?;
    let outcome = engine.evaluate(&phase, tool, args);

    println!("  Hooks loaded: {}", engine.len());
    let icon = match outcome.decision {
        Decision::Allow => "✅",
        Decision::Warn => "⚠️ ",
        Decision::Deny => "❌",
    };
    println!("  {icon} {}", outcome.decision.as_str().to_uppercase());
    if let Some(hook) = &outcome.hook {
        println!("  Hook:    {hook}");
    }
    if let Some(message) = &outcome.message {
        println!("  Message: {message}");
    }
    Ok(())
}
