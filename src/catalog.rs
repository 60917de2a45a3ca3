use crate::api::{ApiError, LogApi, RemoteLogFile};
use crate::marker::Marker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("log API error: {0}")]
    Api(#[from] ApiError),

    #[error("no log file with prefix '{prefix}' found. Available log files:\n{}", format_list(.available))]
    NoMatchingFiles { prefix: String, available: Vec<String> },

    #[error("the list of instances returned by the log API is empty; check the endpoint and credentials")]
    NoInstances,

    #[error("no instance identifier specified. Available instances:\n{}\nSpecify one with --identifier", format_list(.available))]
    NoInstanceSpecified { available: Vec<String> },

    #[error("instance identifier '{instance}' not found in list of instances:\n{}", format_list(.available))]
    InstanceNotFound { instance: String, available: Vec<String> },
}

fn format_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("\t{}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A remote log file as seen by the latest catalog refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileRef {
    pub name: String,
    pub size_bytes: i64,
    pub last_written_epoch_ms: i64,
    pub last_written_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

impl LogFileRef {
    pub fn from_remote(remote: RemoteLogFile) -> Self {
        let last_written_time =
            DateTime::from_timestamp_millis(remote.last_written_epoch_ms).unwrap_or_default();

        Self {
            name: remote.name,
            size_bytes: remote.size_bytes,
            last_written_epoch_ms: remote.last_written_epoch_ms,
            last_written_time,
            local_path: None,
        }
    }

    /// Last dot-separated component of the file name, e.g. `5` for
    /// `slowquery/mysql-slowquery.log.5`.
    pub fn trailing_suffix(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// If this file's trailing suffix names the marker's segment, return the
    /// marker's offset: the file is the rotated copy of that segment.
    pub fn matches_marker(&self, marker: &Marker) -> Option<u64> {
        let position = marker.position().ok()?;
        (position.segment == self.trailing_suffix()).then_some(position.offset)
    }

    /// Attach the local path a download of this file writes to.
    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }
}

impl fmt::Display for LogFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<35} (date: {}, size: {})",
            self.name, self.last_written_time, self.size_bytes
        )
    }
}

/// Newest matching file plus every older match, oldest first.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub latest: LogFileRef,
    pub older: Vec<LogFileRef>,
}

/// Lists and ranks the remote log files of one instance.
#[derive(Clone)]
pub struct LogCatalog {
    api: Arc<dyn LogApi>,
    instance: String,
    prefix: String,
}

impl LogCatalog {
    pub fn new(api: Arc<dyn LogApi>, instance: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            api,
            instance: instance.into(),
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Every file of the instance, following continuation tokens to the end.
    pub async fn list_all(&self, since_epoch_ms: Option<i64>) -> Result<Vec<LogFileRef>, CatalogError> {
        let mut files = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .api
                .list_log_files(&self.instance, since_epoch_ms, token.as_deref())
                .await?;

            files.extend(page.files.into_iter().map(LogFileRef::from_remote));

            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        tracing::debug!(instance = %self.instance, count = files.len(), "Listed log files");
        Ok(files)
    }

    /// Files whose name starts with the configured prefix, e.g. `slow.log`,
    /// `slow.log.1`, `slow.log.2`. Fails when nothing matches.
    pub async fn matching(&self, since_epoch_ms: Option<i64>) -> Result<Vec<LogFileRef>, CatalogError> {
        let all = self.list_all(since_epoch_ms).await?;
        filter_by_prefix(all, &self.prefix)
    }

    /// Matching files ranked by recency.
    pub async fn resolve(&self, since_epoch_ms: Option<i64>) -> Result<Resolution, CatalogError> {
        let files = self.matching(since_epoch_ms).await?;
        rank(files).ok_or_else(|| CatalogError::NoMatchingFiles {
            prefix: self.prefix.clone(),
            available: Vec::new(),
        })
    }
}

fn filter_by_prefix(files: Vec<LogFileRef>, prefix: &str) -> Result<Vec<LogFileRef>, CatalogError> {
    let available: Vec<String> = files.iter().map(|f| f.to_string()).collect();
    let matching: Vec<LogFileRef> = files
        .into_iter()
        .filter(|f| f.name.starts_with(prefix))
        .collect();

    if matching.is_empty() {
        return Err(CatalogError::NoMatchingFiles {
            prefix: prefix.to_string(),
            available,
        });
    }

    Ok(matching)
}

/// Sort by `last_written_epoch_ms` (stable) and split off the newest.
pub fn rank(mut files: Vec<LogFileRef>) -> Option<Resolution> {
    files.sort_by_key(|f| f.last_written_epoch_ms);
    let latest = files.pop()?;
    Some(Resolution {
        latest,
        older: files,
    })
}

/// Check that `instance` names one of the instances the API can see.
pub async fn validate_instance(api: &dyn LogApi, instance: Option<&str>) -> Result<String, CatalogError> {
    let available = api.list_instances().await?;

    if available.is_empty() {
        return Err(CatalogError::NoInstances);
    }

    match instance {
        Some(id) if available.iter().any(|a| a == id) => Ok(id.to_string()),
        Some(id) => Err(CatalogError::InstanceNotFound {
            instance: id.to_string(),
            available,
        }),
        None => Err(CatalogError::NoInstanceSpecified { available }),
    }
}
