//! Scripted in-memory log API and helpers shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dblogtail::api::{ApiError, LogApi, LogFilePage, LogPortion, PortionRequest, RemoteLogFile};
use dblogtail::assembler::Passthrough;
use dblogtail::clock::FixedClock;
use dblogtail::config::{Config, OutputTarget};
use dblogtail::cursor::CursorStore;
use dblogtail::engine::EngineContext;
use dblogtail::marker::Marker;
use dblogtail::sink::{Sink, SinkError};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const INSTANCE: &str = "db-1";

/// One recorded `fetch_portion` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortionCall {
    pub file: String,
    pub marker: Option<String>,
    pub max_lines: Option<u64>,
}

struct Step {
    result: Result<LogPortion, ApiError>,
    reveal: Option<RemoteLogFile>,
}

/// Answers portion requests from per-file scripts, in order.
///
/// When a file's script runs dry the shared token is cancelled and the call
/// never returns, so a streaming run ends with `Outcome::Aborted`.
pub struct ScriptedApi {
    instances: Vec<String>,
    files: Mutex<Vec<RemoteLogFile>>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<PortionCall>>,
    listings: Mutex<Vec<Option<i64>>>,
    cancel: CancellationToken,
}

impl ScriptedApi {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            instances: vec![INSTANCE.to_string()],
            files: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            listings: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn with_instances(mut self, instances: &[&str]) -> Self {
        self.instances = instances.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_file(self, name: &str, last_written: i64) -> Self {
        self.files.lock().unwrap().push(remote(name, last_written));
        self
    }

    pub fn respond(self, file: &str, result: Result<LogPortion, ApiError>) -> Self {
        self.push(file, Step { result, reveal: None })
    }

    /// Respond, then make `new_file` appear in later listings.
    pub fn respond_then_reveal(self, file: &str, portion: LogPortion, new_file: RemoteLogFile) -> Self {
        self.push(
            file,
            Step {
                result: Ok(portion),
                reveal: Some(new_file),
            },
        )
    }

    fn push(self, file: &str, step: Step) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(file.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<PortionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, file: &str) -> Vec<PortionCall> {
        self.calls().into_iter().filter(|c| c.file == file).collect()
    }

    pub fn listings(&self) -> Vec<Option<i64>> {
        self.listings.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogApi for ScriptedApi {
    async fn list_instances(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.instances.clone())
    }

    /// One file per page so every listing exercises continuation tokens.
    async fn list_log_files(
        &self,
        _instance: &str,
        since_epoch_ms: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<LogFilePage, ApiError> {
        if page_token.is_none() {
            self.listings.lock().unwrap().push(since_epoch_ms);
        }

        let files: Vec<RemoteLogFile> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|f| since_epoch_ms.map_or(true, |since| f.last_written_epoch_ms >= since))
            .cloned()
            .collect();

        let index: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let next_token = (index + 1 < files.len()).then(|| (index + 1).to_string());
        Ok(LogFilePage {
            files: files.into_iter().skip(index).take(1).collect(),
            next_token,
        })
    }

    async fn fetch_portion(&self, request: &PortionRequest<'_>) -> Result<LogPortion, ApiError> {
        self.calls.lock().unwrap().push(PortionCall {
            file: request.file_name.to_string(),
            marker: request.marker.map(|m| m.as_str().to_string()),
            max_lines: request.max_lines,
        });

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(request.file_name)
            .and_then(|queue| queue.pop_front());

        match step {
            Some(step) => {
                if let Some(file) = step.reveal {
                    self.files.lock().unwrap().push(file);
                }
                step.result
            }
            None => {
                self.cancel.cancel();
                std::future::pending().await
            }
        }
    }
}

/// Collects everything written to it.
#[derive(Default)]
pub struct MemorySink {
    writes: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn contents(&self) -> String {
        self.writes.lock().unwrap().concat()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, blob: &str) -> Result<(), SinkError> {
        self.writes.lock().unwrap().push(blob.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

pub fn remote(name: &str, last_written: i64) -> RemoteLogFile {
    RemoteLogFile {
        name: name.to_string(),
        size_bytes: 0,
        last_written_epoch_ms: last_written,
    }
}

pub fn portion(marker: &str, data: &str, pending: bool) -> LogPortion {
    LogPortion {
        marker: Some(Marker::from(marker)),
        data: Some(data.to_string()),
        additional_data_pending: pending,
    }
}

/// Config with file output under `dir`, log prefix `db/log` and fast timings.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.instance = Some(INSTANCE.to_string());
    config.log_file = Some("db/log".to_string());
    config.output = OutputTarget::File;
    config.download_dir = dir.to_path_buf();
    config.timing.rate_limit_backoff = Duration::from_millis(10);
    config.timing.poll_interval = Duration::from_millis(10);
    config.timing.not_found_retry = Duration::from_millis(10);
    config
}

/// 2024-03-07 10:30 UTC, outside the rotation settle window.
pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 3, 7, 10, 30, 0).unwrap()))
}

/// Directory the file sinks write to for `kind` under the fixed clock.
pub fn output_dir(root: &Path, kind: &str) -> std::path::PathBuf {
    root.join(kind).join(INSTANCE).join("03-07-2024")
}

pub fn context(
    config: &Config,
    api: Arc<ScriptedApi>,
    store: Option<Arc<dyn CursorStore>>,
    cancel: CancellationToken,
) -> EngineContext {
    EngineContext::new(
        config,
        INSTANCE,
        api,
        store,
        Arc::new(Passthrough),
        fixed_clock(),
        cancel,
    )
}
