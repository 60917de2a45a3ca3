use crate::catalog::LogFileRef;
use crate::clock::Clock;
use crate::config::types::OutputTarget;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only destination for records and raw blobs.
///
/// Implementations must tolerate concurrent writers: backfill tasks and the
/// live loop may share a destination.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, blob: &str) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Human-readable destination for log lines.
    fn describe(&self) -> String;

    /// File on local disk this sink appends to, if any.
    fn local_path(&self) -> Option<String> {
        None
    }
}

/// Writes to one shared stream. The lock is held for a whole blob, so
/// concurrent writers never interleave inside a write.
pub struct StreamSink {
    name: String,
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StreamSink {
    pub fn new(name: impl Into<String>, out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            name: name.into(),
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new("stdout", tokio::io::stdout())
    }
}

#[async_trait]
impl Sink for StreamSink {
    async fn write(&self, blob: &str) -> Result<(), SinkError> {
        let mut out = self.out.lock().await;
        let result = async {
            out.write_all(blob.as_bytes()).await?;
            out.flush().await
        }
        .await;

        result.map_err(|source| SinkError::Io {
            path: self.name.clone(),
            source,
        })
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Opens, appends and closes the target file on every write, so concurrent
/// writers interleave whole blobs.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write(&self, blob: &str) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        file.write_all(blob.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn local_path(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}

/// Chooses the destination for each stream of output.
///
/// File output is laid out as
/// `<dir>/<first path component>/<instance>/<MM-DD-YYYY>/<rest of name><suffix>`.
#[derive(Clone)]
pub struct SinkFactory {
    target: OutputTarget,
    dir: PathBuf,
    instance: String,
    clock: Arc<dyn Clock>,
    stdout: Arc<StreamSink>,
}

impl SinkFactory {
    pub fn new(
        target: OutputTarget,
        dir: impl Into<PathBuf>,
        instance: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            target,
            dir: dir.into(),
            instance: instance.into(),
            clock,
            stdout: Arc::new(StreamSink::stdout()),
        }
    }

    /// Path for `file` under the dated per-instance layout.
    pub fn layout_path(&self, file: &LogFileRef, suffix: &str) -> PathBuf {
        let (kind, rest) = file.name.split_once('/').unwrap_or(("", file.name.as_str()));
        let date = self.clock.now().format("%m-%d-%Y").to_string();

        let mut path = self.dir.clone();
        if !kind.is_empty() {
            path.push(kind);
        }
        path.push(&self.instance);
        path.push(date);
        path.push(format!("{}{}", rest, suffix));
        path
    }

    /// Sink for live tailing; file output is split per marker segment.
    pub fn live(&self, file: &LogFileRef, segment: Option<&str>) -> Arc<dyn Sink> {
        let suffix = segment.map(|s| format!(".{}", s)).unwrap_or_default();
        self.for_target(file, &suffix)
    }

    /// Sink for a backfill of `file`, distinguished by `suffix`.
    pub fn backfill(&self, file: &LogFileRef, suffix: &str) -> Arc<dyn Sink> {
        self.for_target(file, suffix)
    }

    /// Sink for download mode: always a file named after the log file's
    /// basename directly under the download directory.
    pub fn download(&self, file: &LogFileRef) -> Arc<dyn Sink> {
        let base = Path::new(&file.name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| file.name.clone().into());
        Arc::new(FileSink::new(self.dir.join(base)))
    }

    fn for_target(&self, file: &LogFileRef, suffix: &str) -> Arc<dyn Sink> {
        match self.target {
            OutputTarget::Stdout => self.stdout.clone() as Arc<dyn Sink>,
            OutputTarget::File => Arc::new(FileSink::new(self.layout_path(file, suffix))),
        }
    }
}
