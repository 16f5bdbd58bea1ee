//! Persisted report snapshots
//!
//! A disk-backed [`ReadThroughCache`]: each key is one JSON file holding the
//! value and its expiry. Reads take a shared lock, writes go through a temp
//! file and rename under an exclusive lock.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use directories::BaseDirs;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::services::cache::{expiry, Clock, Lookup, ReadThroughCache, SystemClock};
use crate::types::{CacheWarning, Result, RoutestatError};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile<V> {
    key: String,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    value: V,
}

/// Disk snapshot store keyed by string
pub struct SnapshotStore<C: Clock = SystemClock> {
    dir: PathBuf,
    clock: C,
}

impl SnapshotStore<SystemClock> {
    /// Store under `~/.routestat/snapshots`
    pub fn new() -> Result<Self> {
        Self::in_home("snapshots")
    }

    /// Store under `~/.routestat/<name>`
    pub fn in_home(name: &str) -> Result<Self> {
        let base_dirs = BaseDirs::new()
            .ok_or_else(|| RoutestatError::Cache("Cannot determine home directory".into()))?;
        let dir = base_dirs.home_dir().join(".routestat").join(name);
        fs::create_dir_all(&dir)?;
        Ok(Self::with_dir(dir, SystemClock))
    }
}

impl<C: Clock> SnapshotStore<C> {
    pub fn with_dir(dir: PathBuf, clock: C) -> Self {
        Self { dir, clock }
    }

    /// File for a key; characters outside `[A-Za-z0-9_-]` become `_`
    pub fn snapshot_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    pub fn clear(&self, key: &str) -> Result<()> {
        let path = self.snapshot_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Read a snapshot, reporting why an existing file could not be used
    pub fn load<V: DeserializeOwned>(&self, key: &str) -> (Lookup<V>, Option<CacheWarning>) {
        let path = self.snapshot_path(key);
        if !path.exists() {
            return (Lookup::Miss, None);
        }

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                return (
                    Lookup::Miss,
                    Some(CacheWarning::LoadFailed(format!(
                        "Failed to open snapshot: {}",
                        e
                    ))),
                );
            }
        };

        if let Err(e) = file.lock_shared() {
            return (
                Lookup::Miss,
                Some(CacheWarning::LoadFailed(format!(
                    "Failed to acquire read lock: {}",
                    e
                ))),
            );
        }

        let mut content = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut content);
        let _ = file.unlock();
        if let Err(e) = read {
            return (
                Lookup::Miss,
                Some(CacheWarning::LoadFailed(format!(
                    "Failed to read snapshot: {}",
                    e
                ))),
            );
        }

        let snapshot: SnapshotFile<V> = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                return (
                    Lookup::Miss,
                    Some(CacheWarning::Corrupted(format!(
                        "Corrupted snapshot file: {}",
                        e
                    ))),
                );
            }
        };

        // Sanitized names can collide; the stored key is authoritative
        if snapshot.key != key {
            return (Lookup::Miss, None);
        }

        if snapshot.expires_at > self.clock.now() {
            (Lookup::Hit(snapshot.value), None)
        } else {
            (Lookup::Stale(snapshot.value), None)
        }
    }

    /// Save using atomic write (temp file + rename) with exclusive lock.
    fn save<V: Serialize>(&self, key: &str, value: &V, ttl: Duration) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let now = self.clock.now();
        let snapshot = SnapshotFile {
            key: key.to_string(),
            stored_at: now,
            expires_at: expiry(now, ttl),
            value,
        };

        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| RoutestatError::Cache(format!("Serialization failed: {}", e)))?;

        let path = self.snapshot_path(key);
        let temp_path = path.with_extension("json.tmp");

        {
            let mut file = File::create(&temp_path)
                .map_err(|e| RoutestatError::Cache(format!("Failed to create temp file: {}", e)))?;
            file.write_all(content.as_bytes())
                .map_err(|e| RoutestatError::Cache(format!("Failed to write temp file: {}", e)))?;
            file.sync_all()
                .map_err(|e| RoutestatError::Cache(format!("Failed to sync temp file: {}", e)))?;
        }

        let target = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        target
            .lock_exclusive()
            .map_err(|e| RoutestatError::Cache(format!("Failed to acquire write lock: {}", e)))?;

        fs::rename(&temp_path, &path)
            .map_err(|e| RoutestatError::Cache(format!("Failed to rename temp file: {}", e)))?;

        let _ = target.unlock();
        Ok(())
    }
}

impl<V, C> ReadThroughCache<String, V> for SnapshotStore<C>
where
    V: Serialize + DeserializeOwned,
    C: Clock,
{
    fn get(&self, key: &String) -> Lookup<V> {
        let (lookup, warning) = self.load(key);
        if let Some(warning) = warning {
            warn!(key = %key, "snapshot unusable: {:?}", warning);
        }
        lookup
    }

    fn put(&mut self, key: String, value: V, ttl: Duration) -> Result<()> {
        self.save(&key, &value, ttl)
    }
}
