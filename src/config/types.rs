use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub instance: Option<String>,
    pub db_type: DbType,
    /// Log file name prefix; defaults per database type when unset.
    pub log_file: Option<String>,
    pub num_lines: u64,
    pub output: OutputTarget,
    pub download_dir: PathBuf,
    pub formatter: bool,
    pub scrub_query: bool,
    pub log_level: String,
    pub api: ApiConfig,
    pub cursor_store: CursorStoreConfig,
    pub timing: TimingConfig,
    pub rotation: RotationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: None,
            db_type: DbType::MySql,
            log_file: None,
            num_lines: 10000,
            output: OutputTarget::Stdout,
            download_dir: PathBuf::from("./"),
            formatter: false,
            scrub_query: false,
            log_level: "warn".to_string(),
            api: ApiConfig::default(),
            cursor_store: CursorStoreConfig::default(),
            timing: TimingConfig::default(),
            rotation: RotationConfig::default(),
        }
    }
}

impl Config {
    /// Configured prefix, or the database type's default log file.
    pub fn log_file_prefix(&self) -> &str {
        self.log_file
            .as_deref()
            .unwrap_or_else(|| self.db_type.default_log_file())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbType {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgresql", alias = "postgres")]
    PostgreSql,
}

impl DbType {
    pub fn default_log_file(self) -> &'static str {
        match self {
            DbType::MySql => "slowquery/mysql-slowquery.log",
            DbType::PostgreSql => "error/postgresql.log",
        }
    }

    /// Whether the newest log rotates to a new, date-suffixed name.
    ///
    /// PostgreSQL writes `error/postgresql.log.YYYY-MM-DD-HH`; the MySQL slow
    /// log is always `slowquery/mysql-slowquery.log`.
    pub fn rotates_by_name(self) -> bool {
        matches!(self, DbType::PostgreSql)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mysql" => Some(DbType::MySql),
            "postgresql" | "postgres" => Some(DbType::PostgreSql),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    Stdout,
    File,
}

impl OutputTarget {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stdout" => Some(OutputTarget::Stdout),
            "file" => Some(OutputTarget::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorStoreConfig {
    pub kind: CursorStoreKind,
    pub dir: PathBuf,
}

impl Default for CursorStoreConfig {
    fn default() -> Self {
        Self {
            kind: CursorStoreKind::None,
            dir: PathBuf::from("~/.local/state/dblogtail"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStoreKind {
    None,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(with = "humantime_serde")]
    pub rate_limit_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub not_found_retry: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rate_limit_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            not_found_retry: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Assumptions about the backing service's hourly rotation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// An empty end-of-segment reply is only trusted after this many minutes
    /// past the hour; rotation runs inside that window.
    pub settle_minutes: u32,
    /// Resume backfill is skipped when the previous and current files were
    /// last written further apart than this.
    #[serde(with = "humantime_serde")]
    pub max_backfill_gap: Duration,
    /// Bytes skipped when a range cannot be returned as text.
    pub binary_skip_bytes: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            settle_minutes: 5,
            max_backfill_gap: Duration::from_secs(3600),
            binary_skip_bytes: 1000,
        }
    }
}
