use super::{sleep_or_cancel, Outcome};
use crate::api::{ApiError, ErrorKind, LogApi, LogPortion, PortionRequest};
use crate::assembler::Formatter;
use crate::catalog::LogFileRef;
use crate::marker::{Marker, MarkerError};
use crate::sink::{Sink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {file}: {source}")]
    Api {
        file: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Where a download starts and, optionally, the file offset it must stop at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: Marker,
    /// Exclusive end offset. Bytes at or past it were already seen by the live tail.
    pub end_offset: Option<u64>,
}

impl FetchWindow {
    /// From `start` until the server reports no more data.
    pub fn from_start(start: Marker) -> Self {
        Self {
            start,
            end_offset: None,
        }
    }

    pub fn bounded(start: Marker, end_offset: u64) -> Self {
        Self {
            start,
            end_offset: Some(end_offset),
        }
    }

    /// Number of bytes the window covers, if bounded.
    pub fn byte_limit(&self) -> Result<Option<u64>, MarkerError> {
        match self.end_offset {
            Some(end) => Ok(Some(end.saturating_sub(self.start.start_offset()?))),
            None => Ok(None),
        }
    }
}

/// Issues portion requests for one instance.
#[derive(Clone)]
pub struct Fetcher {
    api: Arc<dyn LogApi>,
    instance: String,
    num_lines: u64,
    rate_limit_backoff: Duration,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(
        api: Arc<dyn LogApi>,
        instance: impl Into<String>,
        num_lines: u64,
        rate_limit_backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            instance: instance.into(),
            num_lines,
            rate_limit_backoff,
            cancel,
        }
    }

    /// One live-tail request from `marker`. An unset marker asks for the most
    /// recent line only. `Ok(None)` means the token was cancelled first.
    pub async fn fetch_recent(
        &self,
        file_name: &str,
        marker: &Marker,
    ) -> Result<Option<LogPortion>, ApiError> {
        let request = PortionRequest {
            instance: &self.instance,
            file_name,
            marker: (!marker.is_unset()).then_some(marker),
            max_lines: Some(if marker.is_unset() { 1 } else { self.num_lines }),
        };
        self.request(&request).await
    }

    async fn request(&self, request: &PortionRequest<'_>) -> Result<Option<LogPortion>, ApiError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(None),
            result = self.api.fetch_portion(request) => result.map(Some),
        }
    }

    /// Page through `file` following the reported markers.
    ///
    /// Unbounded windows are written page by page. Bounded windows are
    /// accumulated, cut to exactly the window length and written once; if the
    /// server runs out of data first, whatever arrived is written.
    pub async fn download(
        &self,
        file: &LogFileRef,
        window: &FetchWindow,
        sink: &dyn Sink,
        formatter: &dyn Formatter,
    ) -> Result<Outcome, FetchError> {
        let limit = window.byte_limit()?;
        if limit == Some(0) {
            tracing::debug!(file = %file.name, "Empty download window, nothing to fetch");
            return Ok(Outcome::Completed);
        }

        tracing::info!(
            file = %file.name,
            start = %window.start,
            end = ?window.end_offset,
            destination = %sink.describe(),
            "Downloading log file"
        );

        let mut marker = window.start.clone();
        let mut buffered = String::new();
        let mut pages = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Aborted);
            }

            let request = PortionRequest {
                instance: &self.instance,
                file_name: &file.name,
                marker: (!marker.is_unset()).then_some(&marker),
                max_lines: None,
            };

            let portion = match self.request(&request).await {
                Ok(Some(portion)) => portion,
                Ok(None) => return Ok(Outcome::Aborted),
                Err(e) if e.kind() == ErrorKind::RateLimited => {
                    tracing::warn!(
                        file = %file.name,
                        delay_secs = self.rate_limit_backoff.as_secs(),
                        "Rate limit hit during download, backing off"
                    );
                    if !sleep_or_cancel(&self.cancel, self.rate_limit_backoff).await {
                        return Ok(Outcome::Aborted);
                    }
                    continue;
                }
                Err(source) => {
                    return Err(FetchError::Api {
                        file: file.name.clone(),
                        source,
                    })
                }
            };
            pages += 1;

            match limit {
                Some(limit) => {
                    buffered.push_str(portion.data());
                    if buffered.len() as u64 >= limit {
                        truncate_at_boundary(&mut buffered, usize::try_from(limit).unwrap_or(usize::MAX));
                        break;
                    }
                }
                None => {
                    emit(formatter, sink, portion.data()).await?;
                }
            }

            if !portion.additional_data_pending {
                break;
            }
            match portion.marker {
                Some(next) => marker = next,
                None => break,
            }
        }

        if let Some(limit) = limit {
            if (buffered.len() as u64) < limit {
                tracing::debug!(
                    file = %file.name,
                    received = buffered.len(),
                    expected = limit,
                    "Server ended before window end, writing partial window"
                );
            }
            emit(formatter, sink, &buffered).await?;
        }

        tracing::info!(file = %file.name, pages, "Download complete");
        Ok(Outcome::Completed)
    }
}

/// Format `blob` and write every non-empty piece. Returns the number of pieces written.
pub async fn emit(formatter: &dyn Formatter, sink: &dyn Sink, blob: &str) -> Result<usize, SinkError> {
    let pieces: Vec<String> = formatter.format(blob).filter(|p| !p.is_empty()).collect();
    for piece in &pieces {
        sink.write(piece).await?;
    }
    Ok(pieces.len())
}

/// Cut to at most `len` bytes without splitting a UTF-8 sequence.
fn truncate_at_boundary(buf: &mut String, len: usize) {
    if len >= buf.len() {
        return;
    }
    let mut end = len;
    while !buf.is_char_boundary(end) {
        end -= 1;
    }
    buf.truncate(end);
}
