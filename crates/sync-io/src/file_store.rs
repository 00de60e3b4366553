//! Local JSON file [`WatermarkStore`] — the no-Redis fallback (§6,
//! `WATERMARK_BACKEND=file`). Mirrors a flat `{key: value}` document on
//! disk; an absent or empty file reads back as no watermarks at all,
//! and a malformed file is logged and treated the same way rather than
//! failing startup.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::PathBuf;
use sync_core::{Result, SyncError, WatermarkStore};
use tokio::sync::Mutex;
use tracing::warn;

pub struct FileWatermarkStore {
    path: PathBuf,
    // Guards read-modify-write of the whole file so concurrent
    // pipelines sharing one store never interleave a read and a write.
    guard: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Map<String, Value> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if !contents.trim().is_empty() => {
                match serde_json::from_str::<Value>(&contents) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => {
                        warn!(path = %self.path.display(), "watermark file is not a JSON object; ignoring");
                        Map::new()
                    }
                    Err(err) => {
                        warn!(path = %self.path.display(), error = %err, "watermark file is malformed JSON; ignoring");
                        Map::new()
                    }
                }
            }
            _ => Map::new(),
        }
    }

    async fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        let contents = serde_json::to_string_pretty(map)
            .map_err(|e| SyncError::Watermark(anyhow::Error::from(e)))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::Watermark(anyhow::Error::from(e)))?;
            }
        }
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| SyncError::Watermark(anyhow::Error::from(e)))?;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard.lock().await;
        let map = self.read_all().await;
        Ok(map.get(key).and_then(Value::as_str).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.guard.lock().await;
        let mut map = self.read_all().await;
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&map).await
    }
}
