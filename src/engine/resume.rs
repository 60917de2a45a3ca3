//! Catching up on what was written while the tail was not running.

use super::fetch::{FetchError, FetchWindow};
use super::{EngineContext, EngineError, Outcome};
use crate::catalog::LogFileRef;
use crate::cursor::StreamCursor;
use crate::marker::Marker;
use crate::sink::{Sink, SinkFactory};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

/// One download scheduled by a resume pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillTask {
    pub file: LogFileRef,
    pub window: FetchWindow,
    /// Appended to the file output path to keep backfills apart from the live tail.
    pub suffix: String,
}

/// Full downloads of every file older than the newest one.
///
/// A file whose trailing suffix is the persisted marker's segment is the
/// rotated copy of the segment the cursor was in, so its download starts at
/// the persisted marker. Every other file starts at the beginning.
pub fn plan_previous_files(persisted: &StreamCursor, older: &[LogFileRef]) -> Vec<BackfillTask> {
    older
        .iter()
        .map(|file| match file.matches_marker(&persisted.marker) {
            Some(offset) => BackfillTask {
                file: file.clone(),
                window: FetchWindow::from_start(persisted.marker.clone()),
                suffix: format!(".{}", offset),
            },
            None => BackfillTask {
                file: file.clone(),
                window: FetchWindow::from_start(Marker::end_of_segment()),
                suffix: String::new(),
            },
        })
        .collect()
}

/// Bounded download of the live file covering the gap between the persisted
/// cursor and the first chunk the live tail received.
///
/// The window ends where that chunk starts (`observed offset - chunk_len`). It
/// starts at the persisted offset when the segment is unchanged, otherwise at
/// the start of the file. Nothing is planned when the two files were last
/// written `max_gap` or more apart, when the observed marker has no offset, or
/// when the window is empty.
pub fn plan_gap_backfill(
    persisted: &StreamCursor,
    current: &LogFileRef,
    observed: &Marker,
    chunk_len: u64,
    max_gap: Duration,
) -> Option<BackfillTask> {
    let gap_ms = current
        .last_written_epoch_ms
        .saturating_sub(persisted.log_file.last_written_epoch_ms);
    let max_gap_ms = i64::try_from(max_gap.as_millis()).unwrap_or(i64::MAX);
    if gap_ms >= max_gap_ms {
        tracing::info!(
            persisted_file = %persisted.log_file.name,
            current_file = %current.name,
            gap_ms,
            "Persisted cursor is too old, skipping gap backfill"
        );
        return None;
    }

    let observed_position = match observed.position() {
        Ok(position) => position,
        Err(e) => {
            tracing::warn!(marker = %observed, error = %e, "Cannot locate live position, skipping gap backfill");
            return None;
        }
    };
    let end = observed_position.offset.saturating_sub(chunk_len);

    let (start, start_offset) = match persisted.marker.position() {
        Ok(p) if p.segment == observed_position.segment => (persisted.marker.clone(), p.offset),
        _ => (Marker::end_of_segment(), 0),
    };

    if end <= start_offset {
        tracing::debug!(start = start_offset, end, "No gap to backfill");
        return None;
    }

    Some(BackfillTask {
        file: current.clone(),
        window: FetchWindow::bounded(start, end),
        suffix: format!(".{}.{}-{}", observed_position.segment, start_offset, end),
    })
}

/// One file download with its own destination.
pub struct DownloadJob {
    pub file: LogFileRef,
    pub window: FetchWindow,
    pub sink: Arc<dyn Sink>,
}

impl DownloadJob {
    /// Pair `file` with `sink`, recording where the sink writes on disk.
    pub fn new(file: LogFileRef, window: FetchWindow, sink: Arc<dyn Sink>) -> Self {
        let file = match sink.local_path() {
            Some(path) => file.with_local_path(path),
            None => file,
        };
        Self { file, window, sink }
    }

    pub fn backfill(sinks: &SinkFactory, task: BackfillTask) -> Self {
        let sink = sinks.backfill(&task.file, &task.suffix);
        Self::new(task.file, task.window, sink)
    }
}

/// Run every backfill task concurrently and wait for all of them.
pub async fn run_backfills(ctx: &EngineContext, tasks: Vec<BackfillTask>) -> Result<Outcome, EngineError> {
    if tasks.is_empty() {
        return Ok(Outcome::Completed);
    }
    tracing::info!(count = tasks.len(), "Starting backfill downloads");

    let jobs = tasks
        .into_iter()
        .map(|task| DownloadJob::backfill(&ctx.sinks, task))
        .collect();
    run_downloads(ctx, jobs).await
}

/// Spawn one task per job and join them all.
///
/// The first error is returned only after every task has finished; any
/// aborted task makes the whole pass aborted.
pub async fn run_downloads(ctx: &EngineContext, jobs: Vec<DownloadJob>) -> Result<Outcome, EngineError> {
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let fetcher = ctx.fetcher.clone();
            let formatter = ctx.formatter.clone();
            tokio::spawn(async move {
                let outcome = fetcher
                    .download(&job.file, &job.window, job.sink.as_ref(), formatter.as_ref())
                    .await?;
                job.sink.close().await?;
                if outcome == Outcome::Completed {
                    tracing::info!(
                        file = %job.file.name,
                        local_path = job.file.local_path.as_deref().unwrap_or("-"),
                        "Download complete"
                    );
                }
                Ok::<_, FetchError>(outcome)
            })
        })
        .collect();

    let mut outcome = Outcome::Completed;
    let mut first_error: Option<EngineError> = None;

    for joined in join_all(handles).await {
        let result = match joined {
            Ok(result) => result.map_err(EngineError::from),
            Err(e) => Err(EngineError::from(e)),
        };
        match result {
            Ok(Outcome::Aborted) => outcome = Outcome::Aborted,
            Ok(Outcome::Completed) => {}
            Err(e) => {
                tracing::error!(error = %e, "Download failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}
