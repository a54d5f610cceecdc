//! Wiring a session from configuration.

use anyhow::{bail, Context, Result};
use secretary_runtime::memory::{MemoryStore, SharedMemory};
use secretary_runtime::providers::{ModelEndpoint, OllamaEndpoint, OpenAICompatibleEndpoint};
use secretary_runtime::{
    load_session_config, ProviderConfig, SessionConfig, SessionDriver, TurnSummarizer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const MODEL_ENV: &str = "SECRETARY_MODEL";
pub const ENDPOINT_ENV: &str = "SECRETARY_ENDPOINT";

/// Load the config file if given, else defaults, then apply overrides.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => load_session_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    apply_overrides(
        &mut config,
        std::env::var(MODEL_ENV).ok(),
        std::env::var(ENDPOINT_ENV).ok(),
    );
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Apply `SECRETARY_MODEL` / `SECRETARY_ENDPOINT` style overrides.
pub fn apply_overrides(config: &mut SessionConfig, model: Option<String>, endpoint: Option<String>) {
    if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
        config.model = model;
    }
    if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
        config.provider.set_base_url(endpoint);
    }
}

pub fn build_endpoint(provider: &ProviderConfig) -> Result<Arc<dyn ModelEndpoint>> {
    match provider {
        ProviderConfig::Ollama { base_url } => Ok(Arc::new(OllamaEndpoint::new(base_url.as_str()))),
        ProviderConfig::OpenaiCompatible {
            base_url,
            api_key_env,
        } => {
            let api_key = match api_key_env {
                Some(var) => match std::env::var(var) {
                    Ok(key) if !key.trim().is_empty() => Some(key),
                    _ => bail!("API key variable {} is not set", var),
                },
                None => None,
            };
            Ok(Arc::new(OpenAICompatibleEndpoint::new(base_url.as_str(), api_key)))
        }
    }
}

/// Open memory, register tools, and assemble the driver.
pub async fn build_session(config: &SessionConfig) -> Result<SessionDriver> {
    let endpoint = build_endpoint(&config.provider)?;

    let tools = secretary_runtime::tools::builtin_registry(
        &config.workspace_root,
        Duration::from_secs(config.tool_timeout_secs),
    )
    .with_context(|| format!("Failed to set up tools in {}", config.workspace_root.display()))?;

    let memory = Arc::new(SharedMemory::open(MemoryStore::new(&config.memory_path)).await);
    info!(
        "Memory loaded from {} ({} entries)",
        config.memory_path.display(),
        memory.snapshot().len()
    );

    let summarizer = Arc::new(TurnSummarizer::new(
        endpoint.clone(),
        config.summary_model.clone(),
        memory.clone(),
        Duration::from_secs(config.endpoint_timeout_secs),
    ));

    let driver = SessionDriver::new(config, endpoint, Arc::new(tools), memory)?
        .with_summarizer(summarizer);
    Ok(driver)
}
