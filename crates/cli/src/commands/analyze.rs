//! `blv analyze`: one deep flow-mapping call over every captured request.

use anyhow::Context;
use blv_agent::FlowAnalyzer;
use blv_core::store::KnowledgeStore;
use blv_router::RoutingPolicy;
use std::path::PathBuf;

pub async fn run(existing: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let total = store.count_requests().await?;
    if total == 0 {
        println!("  No captured requests to analyse.");
        return Ok(());
    }
    let requests = store.get_requests(total).await?;

    let existing = match existing {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Cannot read {}", path.display()))?;
            Some(serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", path.display()))?)
        }
        None => None,
    };

    let analyzer = FlowAnalyzer::new(super::provider(&config)?, &RoutingPolicy::from_config(&config));
    eprintln!("  Analysing {total} requests...");
    let map = analyzer.analyze(&requests, existing.as_ref()).await;

    println!("{}", serde_json::to_string_pretty(&map)?);
    if map.get("error").is_some() {
        anyhow::bail!("Flow analysis did not return a map");
    }
    Ok(())
}
