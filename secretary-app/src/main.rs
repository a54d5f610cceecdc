use anyhow::Result;
use secretary_app::{bootstrap, repl::Repl};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never interleave with replies on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = bootstrap::load_config(config_path.as_deref())?;

    tracing::info!(
        "Using model {} at {} (summaries: {})",
        config.model,
        config.provider.base_url(),
        config.summary_model
    );

    let driver = bootstrap::build_session(&config).await?;
    Repl::new(driver).run().await
}
