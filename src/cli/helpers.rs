//! Shared helper functions for CLI commands
//!
//! Configuration loading, database path resolution and pipeline wiring.

use anyhow::Context;
use nutrimind_core::{config::default_db_path, LibsqlStorage, Pipeline, PipelineConfig, UserId};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Load layered configuration; `--db-path` overrides the file and env
pub fn load_config(config_path: Option<&Path>, db_path: Option<String>) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path.or_else(|| std::env::var("NUTRIMIND_DB_PATH").ok()) {
        config.storage.db_path = Some(db_path);
    }
    Ok(config)
}

/// Get the database path from config or the XDG default
pub fn get_db_path(config: &PipelineConfig) -> String {
    config
        .storage
        .db_path
        .clone()
        .unwrap_or_else(|| default_db_path().to_string_lossy().to_string())
}

/// Open the database and wire a pipeline over it
pub async fn open_pipeline(config: PipelineConfig) -> anyhow::Result<Arc<Pipeline>> {
    let db_path = get_db_path(&config);
    debug!("Using database: {}", db_path);

    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let storage = Arc::new(
        LibsqlStorage::new_local(&db_path)
            .await
            .context("Failed to initialize storage")?,
    );
    Ok(Arc::new(Pipeline::new(config, storage)))
}

pub fn parse_user(user: &str) -> anyhow::Result<UserId> {
    UserId::from_string(user).with_context(|| format!("Invalid user id '{}'", user))
}
