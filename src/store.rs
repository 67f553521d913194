//! Narrow key-value storage behind which all inter-run state lives: scrape
//! cache, fetcher response caches, the event store, and health history.
//! Reads and writes are synchronous; only network calls suspend.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Envelope wrapping every stored value with its write timestamp, which is
/// what TTL checks read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub stored_at: DateTime<Utc>,
    pub value: Value,
}

pub trait KvStore: Send + Sync {
    /// Fetch a value regardless of age.
    fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Overwrite a value unconditionally.
    fn put(&self, key: &str, value: Value) -> Result<()>;

    fn keys(&self) -> Result<Vec<String>>;

    /// Fetch a value only if it is younger than `ttl`.
    fn get_fresh(&self, key: &str, ttl: Duration) -> Result<Option<Value>> {
        match self.get(key)? {
            Some(entry) if Utc::now() - entry.stored_at < ttl => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }
}

/// One JSON file per key inside a directory. Keys are sanitized to stay
/// within the directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // A corrupt entry is treated as absent rather than fatal.
                debug!("discarding unreadable store entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let entry = StoredEntry {
            stored_at: Utc::now(),
            value,
        };
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&entry)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Typed convenience over the untyped store.
pub fn get_typed<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(entry) => Ok(serde_json::from_value(entry.value).ok()),
        None => Ok(None),
    }
}

pub fn put_typed<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    store.put(key, serde_json::to_value(value)?)
}

/// Advisory lock making overlapping pipeline runs fail fast. The lock file
/// is created exclusively and removed on drop.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join("pipeline.lock");
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(PipelineError::RunLocked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
