pub mod http;

use crate::marker::Marker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpLogApi;

/// How the engine reacts to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Throttled by the API; back off and retry the same request.
    RateLimited,
    /// The requested range holds data the API cannot return as text.
    BinaryContent,
    /// The file vanished, usually mid-rotation.
    FileNotFound,
    Other,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("binary content: {0}")]
    BinaryContent(String),

    #[error("log file not found: {0}")]
    FileNotFound(String),

    #[error("log API returned {code}: {message}")]
    Service { code: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    /// Classify a service error code and message into the matching variant.
    ///
    /// Codes follow the managed-database API: `Throttling`,
    /// `DBLogFileNotFoundFault`, and `InvalidParameterValue` with a
    /// binary-data message.
    pub fn from_service(code: &str, message: &str) -> Self {
        let detail = format!("{}: {}", code, message);
        match code {
            "Throttling" | "ThrottlingException" | "TooManyRequests" => ApiError::RateLimited(detail),
            "DBLogFileNotFoundFault" | "LogFileNotFound" => ApiError::FileNotFound(detail),
            "InvalidParameterValue" if message.contains("binary data") => {
                ApiError::BinaryContent(detail)
            }
            _ => ApiError::Service {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::RateLimited(_) => ErrorKind::RateLimited,
            ApiError::BinaryContent(_) => ErrorKind::BinaryContent,
            ApiError::FileNotFound(_) => ErrorKind::FileNotFound,
            ApiError::Service { .. } | ApiError::Http(_) => ErrorKind::Other,
        }
    }
}

/// One entry of a remote file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLogFile {
    pub name: String,
    pub size_bytes: i64,
    pub last_written_epoch_ms: i64,
}

/// One page of a file listing; `next_token` continues the listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilePage {
    pub files: Vec<RemoteLogFile>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Request for a portion of one log file.
///
/// A request without a marker returns the single most recent line.
#[derive(Debug, Clone)]
pub struct PortionRequest<'a> {
    pub instance: &'a str,
    pub file_name: &'a str,
    pub marker: Option<&'a Marker>,
    pub max_lines: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPortion {
    #[serde(default)]
    pub marker: Option<Marker>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub additional_data_pending: bool,
}

impl LogPortion {
    pub fn data(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }
}

/// Transport to the remote log API.
#[async_trait]
pub trait LogApi: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<String>, ApiError>;

    async fn list_log_files(
        &self,
        instance: &str,
        since_epoch_ms: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<LogFilePage, ApiError>;

    async fn fetch_portion(&self, request: &PortionRequest<'_>) -> Result<LogPortion, ApiError>;
}
