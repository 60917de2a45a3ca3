//! The tailing engine: live stream loop, resume backfill and downloads.

pub mod decide;
pub mod fetch;
pub mod resume;
pub mod stream;

use crate::api::{ApiError, LogApi};
use crate::assembler::Formatter;
use crate::catalog::{CatalogError, LogCatalog};
use crate::clock::Clock;
use crate::config::types::{RotationConfig, TimingConfig};
use crate::config::{Config, DbType};
use crate::cursor::{CursorStore, CursorStoreError};
use crate::marker::MarkerError;
use crate::sink::{SinkError, SinkFactory};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use decide::decide_next_marker;
pub use fetch::{FetchError, FetchWindow, Fetcher};
pub use resume::{
    plan_gap_backfill, plan_previous_files, run_backfills, run_downloads, BackfillTask, DownloadJob,
};
pub use stream::{download_all, Streamer};

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Stopped by the cancellation token.
    Aborted,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Cursor(#[from] CursorStoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("backfill task panicked or was cancelled: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Everything the engine needs, built once at startup.
#[derive(Clone)]
pub struct EngineContext {
    pub instance: String,
    pub db_type: DbType,
    pub catalog: LogCatalog,
    pub fetcher: Fetcher,
    pub store: Option<Arc<dyn CursorStore>>,
    pub sinks: SinkFactory,
    pub formatter: Arc<dyn Formatter>,
    pub clock: Arc<dyn Clock>,
    pub timing: TimingConfig,
    pub rotation: RotationConfig,
    pub cancel: CancellationToken,
}

impl EngineContext {
    pub fn new(
        config: &Config,
        instance: impl Into<String>,
        api: Arc<dyn LogApi>,
        store: Option<Arc<dyn CursorStore>>,
        formatter: Arc<dyn Formatter>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let instance = instance.into();
        let catalog = LogCatalog::new(api.clone(), instance.clone(), config.log_file_prefix());
        let fetcher = Fetcher::new(
            api,
            instance.clone(),
            config.num_lines,
            config.timing.rate_limit_backoff,
            cancel.clone(),
        );
        let sinks = SinkFactory::new(
            config.output,
            config.download_dir.clone(),
            instance.clone(),
            clock.clone(),
        );

        Self {
            instance,
            db_type: config.db_type,
            catalog,
            fetcher,
            store,
            sinks,
            formatter,
            clock,
            timing: config.timing.clone(),
            rotation: config.rotation.clone(),
            cancel,
        }
    }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
