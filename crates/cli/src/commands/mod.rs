pub mod analyze;
pub mod chat;
pub mod hooks;

use anyhow::Context;
use blv_config::AppConfig;
use blv_core::provider::Provider;
use blv_core::store::KnowledgeStore;
use blv_providers::AnthropicProvider;
use blv_store::SqliteStore;
use std::sync::Arc;

pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}

pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn KnowledgeStore>> {
    let path = config.database_path();
    let store = SqliteStore::open_file(&path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn provider(config: &AppConfig) -> anyhow::Result<Arc<dyn Provider>> {
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set ANTHROPIC_API_KEY, or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        anyhow::bail!("No API key found. See above for setup instructions.");
    }
    let provider = AnthropicProvider::from_config(&config.provider)?;
    Ok(Arc::new(provider))
}
