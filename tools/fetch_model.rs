//! Model Fetcher
//!
//! Downloads the configured artifact from the remote hub into the model
//! directory and regenerates the portable graph from it.

use anyhow::{bail, Result};
use credit_scoring_service::{
    config::AppConfig,
    lifecycle::ModelManager,
    remote::HubClient,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    credit_scoring_service::init_tracing(&config.logging.level, &config.logging.format)?;

    // Optional positional overrides: <repo_id> [filename]
    let mut args = std::env::args().skip(1);
    let repo_id = match args.next().or_else(|| config.remote.repo_id.clone()) {
        Some(repo_id) => repo_id,
        None => bail!("HF_REPO_ID is not configured (pass it as the first argument)"),
    };
    let filename = args.next().unwrap_or_else(|| config.remote.filename.clone());

    let store = Arc::new(HubClient::from_config(&config.remote));
    let manager = Arc::new(ModelManager::new(config.model.clone(), store));

    let backend = manager
        .reload(&repo_id, &filename, config.remote.token.as_deref())
        .await?;

    info!(
        repo_id = %repo_id,
        filename = %filename,
        backend = %backend.kind(),
        model_dir = %config.model.model_dir.display(),
        "Model fetched and verified"
    );
    Ok(())
}
