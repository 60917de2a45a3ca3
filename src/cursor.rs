use crate::catalog::LogFileRef;
use crate::marker::Marker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("cursor store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cursor store error: {0}")]
    Generic(String),
}

/// Where the tail currently is: one file and a marker inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCursor {
    pub log_file: LogFileRef,
    pub marker: Marker,
}

impl StreamCursor {
    pub fn new(log_file: LogFileRef, marker: Marker) -> Self {
        Self { log_file, marker }
    }

    pub fn to_json(&self) -> Result<String, CursorStoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, CursorStoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Single-slot key-value store for the serialized cursor, keyed by instance.
/// Writes are whole-value overwrites.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn read(&self, instance: &str) -> Result<Option<String>, CursorStoreError>;
    async fn write(&self, instance: &str, serialized: &str) -> Result<(), CursorStoreError>;
}

/// Load and decode the persisted cursor. An empty slot is `None`; a slot that
/// does not decode is logged and ignored so a corrupt entry cannot wedge
/// startup.
pub async fn load_cursor(
    store: &dyn CursorStore,
    instance: &str,
) -> Result<Option<StreamCursor>, CursorStoreError> {
    let Some(raw) = store.read(instance).await? else {
        tracing::info!(instance = %instance, "No persisted cursor found");
        return Ok(None);
    };

    if raw.trim().is_empty() {
        return Ok(None);
    }

    match StreamCursor::from_json(&raw) {
        Ok(cursor) => {
            tracing::info!(
                instance = %instance,
                file = %cursor.log_file.name,
                marker = %cursor.marker,
                "Loaded persisted cursor"
            );
            Ok(Some(cursor))
        }
        Err(e) => {
            tracing::warn!(instance = %instance, error = %e, "Ignoring undecodable persisted cursor");
            Ok(None)
        }
    }
}

pub async fn save_cursor(
    store: &dyn CursorStore,
    instance: &str,
    cursor: &StreamCursor,
) -> Result<(), CursorStoreError> {
    store.write(instance, &cursor.to_json()?).await?;
    tracing::debug!(instance = %instance, marker = %cursor.marker, "Cursor persisted");
    Ok(())
}

/// One JSON file per instance under a directory. Writes go to a temporary
/// sibling and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, instance: &str) -> PathBuf {
        let safe: String = instance
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.cursor.json", safe))
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn read(&self, instance: &str) -> Result<Option<String>, CursorStoreError> {
        match tokio::fs::read_to_string(self.path_for(instance)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, instance: &str, serialized: &str) -> Result<(), CursorStoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(instance);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(instance: &str, serialized: impl Into<String>) -> Self {
        let store = Self::default();
        if let Ok(mut slots) = store.slots.lock() {
            slots.insert(instance.to_string(), serialized.into());
        }
        store
    }

    pub fn get(&self, instance: &str) -> Option<String> {
        self.slots.lock().ok()?.get(instance).cloned()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn read(&self, instance: &str) -> Result<Option<String>, CursorStoreError> {
        let slots = self
            .slots
            .lock()
            .map_err(|e| CursorStoreError::Generic(e.to_string()))?;
        Ok(slots.get(instance).cloned())
    }

    async fn write(&self, instance: &str, serialized: &str) -> Result<(), CursorStoreError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| CursorStoreError::Generic(e.to_string()))?;
        slots.insert(instance.to_string(), serialized.to_string());
        Ok(())
    }
}
