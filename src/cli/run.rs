use crate::api::{ApiError, HttpLogApi, LogApi};
use crate::assembler::build_formatter;
use crate::catalog::{validate_instance, CatalogError};
use crate::clock::SystemClock;
use crate::config::{default_config_yaml, Config, ConfigError, CursorStoreKind};
use crate::cursor::{CursorStore, FileCursorStore};
use crate::engine::{download_all, EngineContext, EngineError, Outcome, Streamer};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("log API error: {0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("invalid formatter pattern: {0}")]
    Formatter(#[from] regex::Error),
}

/// Which entry operation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Tail the newest file until cancelled.
    Stream,
    /// Download every matching file and exit.
    Download,
}

/// Run against the HTTP log gateway configured in `config.api`.
pub async fn run(config: Config, mode: Mode, cancel: CancellationToken) -> Result<Outcome, RunError> {
    info!(base_url = %config.api.base_url, "Connecting to log API");
    let api: Arc<dyn LogApi> = Arc::new(HttpLogApi::new(&config.api)?);
    run_with_api(config, mode, api, cancel).await
}

/// Validate the instance, build the engine collaborators and run `mode`.
pub async fn run_with_api(
    config: Config,
    mode: Mode,
    api: Arc<dyn LogApi>,
    cancel: CancellationToken,
) -> Result<Outcome, RunError> {
    let instance = validate_instance(api.as_ref(), config.instance.as_deref()).await?;
    info!(instance = %instance, db_type = ?config.db_type, "Instance validated");

    let store: Option<Arc<dyn CursorStore>> = match config.cursor_store.kind {
        CursorStoreKind::None => None,
        CursorStoreKind::File => {
            info!(dir = %config.cursor_store.dir.display(), "Persisting cursor to file store");
            Some(Arc::new(FileCursorStore::new(config.cursor_store.dir.clone())))
        }
    };

    let formatter = build_formatter(&config)?;
    let ctx = EngineContext::new(
        &config,
        instance,
        api,
        store,
        formatter,
        Arc::new(SystemClock),
        cancel,
    );

    let outcome = match mode {
        Mode::Stream => Streamer::new(ctx).run().await?,
        Mode::Download => {
            info!(dir = %config.download_dir.display(), "Downloading log files");
            download_all(&ctx).await?
        }
    };

    info!(?outcome, "Run finished");
    Ok(outcome)
}

/// Print the default config as YAML.
pub fn write_default_config() -> Result<(), RunError> {
    print!("{}", default_config_yaml()?);
    Ok(())
}
