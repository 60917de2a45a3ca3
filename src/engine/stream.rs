use super::decide::decide_next_marker;
use super::fetch::{emit, FetchWindow};
use super::resume::{plan_gap_backfill, plan_previous_files, run_backfills, run_downloads, DownloadJob};
use super::{sleep_or_cancel, EngineContext, EngineError, Outcome};
use crate::api::{ApiError, ErrorKind, LogPortion};
use crate::catalog::{LogFileRef, Resolution};
use crate::cursor::{load_cursor, save_cursor, StreamCursor};
use crate::marker::Marker;

enum State {
    /// Choosing the file to tail.
    Resolving,
    Tailing(StreamCursor),
    /// A newer file appeared while the current one was idle.
    Rotated {
        cursor: StreamCursor,
        newer: LogFileRef,
    },
    Aborting,
}

/// Long-running tail of the newest matching log file.
pub struct Streamer {
    ctx: EngineContext,
}

impl Streamer {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Run until cancelled (`Ok(Outcome::Aborted)`) or a fatal error.
    pub async fn run(&self) -> Result<Outcome, EngineError> {
        let persisted = match &self.ctx.store {
            Some(store) => load_cursor(store.as_ref(), &self.ctx.instance).await?,
            None => None,
        };
        let since = persisted.as_ref().map(|c| c.log_file.last_written_epoch_ms);
        let mut resume = persisted.clone();

        let mut state = State::Resolving;
        loop {
            if self.ctx.cancel.is_cancelled() {
                state = State::Aborting;
            }

            state = match state {
                State::Resolving => self.resolve_start(persisted.as_ref(), since).await?,
                State::Tailing(cursor) => self.tail_once(cursor, &mut resume, since).await?,
                State::Rotated { mut cursor, newer } => {
                    tracing::info!(old_file = %cursor.log_file.name, new_file = %newer.name, "Found newer file");
                    cursor.log_file = newer;
                    cursor.marker = Marker::end_of_segment();
                    self.persist(&cursor).await?;
                    State::Tailing(cursor)
                }
                State::Aborting => {
                    tracing::info!(instance = %self.ctx.instance, "Stream aborted");
                    return Ok(Outcome::Aborted);
                }
            };
        }
    }

    async fn resolve_start(
        &self,
        persisted: Option<&StreamCursor>,
        since: Option<i64>,
    ) -> Result<State, EngineError> {
        let Some(resolution) = self.resolve(since).await? else {
            return Ok(State::Aborting);
        };

        if let Some(persisted) = persisted {
            let tasks = plan_previous_files(persisted, &resolution.older);
            if run_backfills(&self.ctx, tasks).await? == Outcome::Aborted {
                return Ok(State::Aborting);
            }
        }

        tracing::info!(file = %resolution.latest.name, "Tailing log file");
        Ok(State::Tailing(StreamCursor::new(resolution.latest, Marker::unset())))
    }

    async fn tail_once(
        &self,
        mut cursor: StreamCursor,
        resume: &mut Option<StreamCursor>,
        since: Option<i64>,
    ) -> Result<State, EngineError> {
        let fetched = self
            .ctx
            .fetcher
            .fetch_recent(&cursor.log_file.name, &cursor.marker)
            .await;
        let portion = match fetched {
            Ok(Some(portion)) => portion,
            Ok(None) => return Ok(State::Aborting),
            Err(e) => return self.recover(cursor, e).await,
        };

        if portion.data().is_empty() {
            if self.ctx.db_type.rotates_by_name() {
                let Some(resolution) = self.resolve(since).await? else {
                    return Ok(State::Aborting);
                };
                if resolution.latest.name != cursor.log_file.name {
                    return Ok(State::Rotated {
                        cursor,
                        newer: resolution.latest,
                    });
                }
            }
            if !sleep_or_cancel(&self.ctx.cancel, self.ctx.timing.poll_interval).await {
                return Ok(State::Aborting);
            }
        }

        let next = decide_next_marker(
            &cursor.marker,
            Some(&portion),
            self.ctx.clock.now(),
            self.ctx.rotation.settle_minutes,
        );
        if next != cursor.marker {
            tracing::info!(
                prev_marker = %cursor.marker,
                new_marker = %next,
                file = %cursor.log_file.name,
                "Got new marker"
            );
        }

        if next.is_end_of_segment() {
            let Some(resolution) = self.resolve(since).await? else {
                return Ok(State::Aborting);
            };
            cursor.log_file = resolution.latest;
        }

        // The gap can only be located once the live marker carries an offset.
        if next.position().is_ok() {
            if let Some(persisted) = resume.take() {
                if self.gap_backfill(&persisted, &cursor, &next, &portion).await? == Outcome::Aborted {
                    return Ok(State::Aborting);
                }
            }
        }

        cursor.marker = next;
        // An unset marker would overwrite the stored position with nothing.
        if !cursor.marker.is_unset() {
            self.persist(&cursor).await?;
        }

        let sink = self.ctx.sinks.live(&cursor.log_file, live_segment(&cursor.marker));
        let written = emit(self.ctx.formatter.as_ref(), sink.as_ref(), portion.data()).await?;
        tracing::debug!(file = %cursor.log_file.name, bytes = portion.data().len(), records = written, "Fetched");

        Ok(State::Tailing(cursor))
    }

    async fn gap_backfill(
        &self,
        persisted: &StreamCursor,
        cursor: &StreamCursor,
        observed: &Marker,
        portion: &LogPortion,
    ) -> Result<Outcome, EngineError> {
        let task = plan_gap_backfill(
            persisted,
            &cursor.log_file,
            observed,
            portion.data().len() as u64,
            self.ctx.rotation.max_backfill_gap,
        );
        match task {
            Some(task) => run_backfills(&self.ctx, vec![task]).await,
            None => Ok(Outcome::Completed),
        }
    }

    /// Absorb the retryable error kinds; anything else ends the run.
    async fn recover(&self, mut cursor: StreamCursor, error: ApiError) -> Result<State, EngineError> {
        let timing = &self.ctx.timing;
        let slept = match error.kind() {
            ErrorKind::RateLimited => {
                tracing::warn!(
                    delay_secs = timing.rate_limit_backoff.as_secs(),
                    "Rate limit hit, backing off"
                );
                sleep_or_cancel(&self.ctx.cancel, timing.rate_limit_backoff).await
            }
            ErrorKind::BinaryContent => {
                let skip = self.ctx.rotation.binary_skip_bytes;
                tracing::warn!(marker = %cursor.marker, skip_bytes = skip, "Binary data at marker, skipping ahead");
                cursor.marker = cursor.marker.add(skip)?;
                self.persist(&cursor).await?;
                true
            }
            ErrorKind::FileNotFound => {
                tracing::warn!(
                    error = %error,
                    delay_secs = timing.not_found_retry.as_secs(),
                    "Log file does not appear to exist (rotation ongoing?), waiting and retrying"
                );
                sleep_or_cancel(&self.ctx.cancel, timing.not_found_retry).await
            }
            ErrorKind::Other => return Err(error.into()),
        };

        Ok(if slept {
            State::Tailing(cursor)
        } else {
            State::Aborting
        })
    }

    /// Catalog refresh raced against cancellation; `None` when cancelled.
    async fn resolve(&self, since: Option<i64>) -> Result<Option<Resolution>, EngineError> {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => Ok(None),
            result = self.ctx.catalog.resolve(since) => Ok(Some(result?)),
        }
    }

    async fn persist(&self, cursor: &StreamCursor) -> Result<(), EngineError> {
        if let Some(store) = &self.ctx.store {
            save_cursor(store.as_ref(), &self.ctx.instance, cursor).await?;
        }
        Ok(())
    }
}

/// Live file output is split by the marker's segment component.
fn live_segment(marker: &Marker) -> Option<&str> {
    if marker.is_unset() {
        return None;
    }
    marker.as_str().split(':').next()
}

/// Download every matching file in full, concurrently, each to its own file
/// under the download directory.
pub async fn download_all(ctx: &EngineContext) -> Result<Outcome, EngineError> {
    let files = tokio::select! {
        _ = ctx.cancel.cancelled() => return Ok(Outcome::Aborted),
        result = ctx.catalog.matching(None) => result?,
    };
    tracing::info!(count = files.len(), prefix = %ctx.catalog.prefix(), "Downloading log files");

    let jobs = files
        .into_iter()
        .map(|file| {
            let sink = ctx.sinks.download(&file);
            DownloadJob::new(file, FetchWindow::from_start(Marker::end_of_segment()), sink)
        })
        .collect();
    run_downloads(ctx, jobs).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_segment() {
        assert_eq!(live_segment(&Marker::unset()), None);
        assert_eq!(live_segment(&Marker::end_of_segment()), Some("0"));
        assert_eq!(live_segment(&Marker::from("12:4096")), Some("12"));
    }
}
