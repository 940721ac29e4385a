//! Write-ahead log based crash recovery.
//!
//! Maintains one WAL file per open document. If the app crashes, unsaved
//! work can be recovered on next startup. WAL files live at
//! `.midlight/recovery/<safe-key>.wal` and are written atomically
//! (temp file, then rename) so a reader never observes a half-written WAL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use xxhash_rust::xxh64::xxh64;

use crate::error::Result;
use crate::traits::{FileSystem, TimeProvider};
use crate::util::safe_key;

const WAL_VERSION: u32 = 1;

/// A function that produces the editor's current content on demand.
/// Invoked synchronously on each timer tick.
pub type ContentProducer = Arc<dyn Fn() -> String + Send + Sync>;

/// WAL file format stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalFile {
    version: u32,
    file_key: String,
    content: String,
    timestamp: DateTime<Utc>,
    workspace_root: String,
}

/// One recoverable file surfaced by `check_for_recovery`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryEntry {
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(rename = "walContent")]
    pub wal_content: String,
    #[serde(rename = "walTime")]
    pub wal_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct FileState {
    last_content_hash: u64,
}

struct WalTask {
    cancel: Arc<Notify>,
    handle: JoinHandle<()>,
}

pub struct RecoveryManager {
    workspace_root: PathBuf,
    recovery_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    time: Arc<dyn TimeProvider>,
    file_states: Arc<Mutex<HashMap<String, FileState>>>,
    tasks: Mutex<HashMap<String, WalTask>>,
}

impl RecoveryManager {
    pub fn new(workspace_root: PathBuf, fs: Arc<dyn FileSystem>, time: Arc<dyn TimeProvider>) -> Self {
        let recovery_dir = workspace_root.join(".midlight").join("recovery");
        Self {
            workspace_root,
            recovery_dir,
            fs,
            time,
            file_states: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.fs.create_dir_all(&self.recovery_dir).await?;
        tracing::debug!("recovery manager initialized at {:?}", self.recovery_dir);
        Ok(())
    }

    /// Register a periodic task that polls `get_content` every `interval`
    /// and writes a WAL whenever the content has changed. Replaces any
    /// existing task for the same key.
    pub async fn start_wal(&self, file_key: &str, interval: Duration, get_content: ContentProducer) {
        self.stop_wal(file_key).await;

        let cancel = Arc::new(Notify::new());
        let task_cancel = cancel.clone();
        let file_key = file_key.to_string();

        // Each task re-enters through `write_if_changed`, so it shares the
        // exact same skip-if-unchanged logic as a manual `write_wal` call.
        let manager = SharedInner {
            recovery_dir: self.recovery_dir.clone(),
            workspace_root: self.workspace_root.clone(),
            fs: self.fs.clone(),
            time: self.time.clone(),
            file_states: self.file_states.clone(),
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = task_cancel.notified() => break,
                    _ = ticker.tick() => {
                        let content = get_content();
                        if let Err(e) = manager.write_if_changed_standalone(&file_key, &content).await {
                            tracing::warn!("wal tick failed for {}: {}", file_key, e);
                        }
                    }
                }
            }
        });

        self.tasks
            .lock()
            .unwrap()
            .insert(file_key.to_string(), WalTask { cancel, handle });
    }

    /// Immediate synchronous write, bypassing the change-detection skip.
    pub async fn update_wal_now(&self, file_key: &str, content: &str) -> Result<()> {
        self.write_wal_file(file_key, content).await?;
        self.record_hash(file_key, content);
        Ok(())
    }

    /// Stop the periodic task for `file_key`, if any. After this returns,
    /// no further write for that key will occur from the timer.
    pub async fn stop_wal(&self, file_key: &str) {
        let task = self.tasks.lock().unwrap().remove(file_key);
        if let Some(task) = task {
            task.cancel.notify_one();
            let _ = task.handle.await;
        }
    }

    pub async fn stop_all_wal(&self) {
        let keys: Vec<String> = self.tasks.lock().unwrap().keys().cloned().collect();
        for key in keys {
            self.stop_wal(&key).await;
        }
    }

    /// Write a WAL for `file_key` if `content` differs from the last
    /// content written for that key. Returns whether a write happened.
    pub async fn write_wal(&self, file_key: &str, content: &str) -> Result<bool> {
        let content_hash = xxh64(content.as_bytes(), 0);

        {
            let states = self.file_states.lock().unwrap();
            if let Some(state) = states.get(file_key) {
                if state.last_content_hash == content_hash {
                    tracing::debug!("wal skipped for {} (unchanged)", file_key);
                    return Ok(false);
                }
            }
        }

        self.write_wal_file(file_key, content).await?;
        self.record_hash(file_key, content);
        Ok(true)
    }

    /// Remove the WAL for `file_key`, if present. Called after a
    /// successful save. Absence of a WAL file is not an error.
    pub async fn clear_wal(&self, file_key: &str) -> Result<()> {
        self.file_states.lock().unwrap().remove(file_key);

        let wal_path = self.wal_path(file_key);
        if self.fs.exists(&wal_path).await {
            self.fs.remove_file(&wal_path).await?;
            tracing::debug!("wal cleared for {}", file_key);
        }
        Ok(())
    }

    pub async fn has_recovery(&self, file_key: &str) -> bool {
        self.fs.exists(&self.wal_path(file_key)).await
    }

    pub async fn recovery_content(&self, file_key: &str) -> Result<Option<String>> {
        let wal_path = self.wal_path(file_key);
        if !self.fs.exists(&wal_path).await {
            return Ok(None);
        }
        let wal = self.read_wal_file(&wal_path).await?;
        Ok(Some(wal.content))
    }

    /// The timestamp recorded in the WAL for `file_key`, if one exists.
    pub async fn recovery_time(&self, file_key: &str) -> Result<Option<DateTime<Utc>>> {
        let wal_path = self.wal_path(file_key);
        if !self.fs.exists(&wal_path).await {
            return Ok(None);
        }
        let wal = self.read_wal_file(&wal_path).await?;
        Ok(Some(wal.timestamp))
    }

    /// Returns the WAL content without deleting it. The caller must save
    /// successfully first and only then call `clear_wal`.
    pub async fn apply_recovery(&self, file_key: &str) -> Result<Option<String>> {
        self.recovery_content(file_key).await
    }

    pub async fn discard_recovery(&self, file_key: &str) -> Result<()> {
        self.clear_wal(file_key).await
    }

    pub async fn discard_all_recovery(&self) -> Result<()> {
        if !self.fs.exists(&self.recovery_dir).await {
            return Ok(());
        }

        for path in self.fs.read_dir(&self.recovery_dir).await? {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.ends_with(".wal") || name.ends_with(".wal.tmp") {
                if let Err(e) = self.fs.remove_file(&path).await {
                    tracing::warn!("failed to remove recovery file {:?}: {}", path, e);
                }
            }
        }

        self.file_states.lock().unwrap().clear();
        tracing::info!("all recovery files discarded");
        Ok(())
    }

    pub async fn has_unique_recovery(&self, file_key: &str, current_content: &str) -> Result<bool> {
        Ok(self
            .recovery_content(file_key)
            .await?
            .map(|c| c != current_content)
            .unwrap_or(false))
    }

    /// Scan the recovery directory for every outstanding WAL.
    pub async fn check_for_recovery(&self) -> Result<Vec<RecoveryEntry>> {
        let mut recoverable = Vec::new();

        if !self.fs.exists(&self.recovery_dir).await {
            return Ok(recoverable);
        }

        for path in self.fs.read_dir(&self.recovery_dir).await? {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !name.ends_with(".wal") {
                continue;
            }

            match self.read_wal_file(&path).await {
                Ok(wal) => {
                    tracing::info!("found recovery file for {}", wal.file_key);
                    recoverable.push(RecoveryEntry {
                        file_key: wal.file_key,
                        wal_content: wal.content,
                        wal_time: wal.timestamp,
                    });
                }
                Err(e) => tracing::warn!("failed to read recovery file {:?}: {}", path, e),
            }
        }

        Ok(recoverable)
    }

    fn wal_path(&self, file_key: &str) -> PathBuf {
        self.recovery_dir.join(format!("{}.wal", safe_key(file_key)))
    }

    fn record_hash(&self, file_key: &str, content: &str) {
        let content_hash = xxh64(content.as_bytes(), 0);
        self.file_states.lock().unwrap().insert(
            file_key.to_string(),
            FileState {
                last_content_hash: content_hash,
            },
        );
    }

    async fn write_wal_file(&self, file_key: &str, content: &str) -> Result<()> {
        let wal = WalFile {
            version: WAL_VERSION,
            file_key: file_key.to_string(),
            content: content.to_string(),
            timestamp: self.time.now_utc(),
            workspace_root: self.workspace_root.to_string_lossy().to_string(),
        };

        let wal_path = self.wal_path(file_key);
        let wal_json = serde_json::to_string_pretty(&wal)?;

        let temp_path = wal_path.with_extension("wal.tmp");
        self.fs.write(&temp_path, &wal_json).await?;
        self.fs.rename(&temp_path, &wal_path).await?;

        tracing::debug!("wal written for {}", file_key);
        Ok(())
    }

    async fn read_wal_file(&self, path: &PathBuf) -> Result<WalFile> {
        let content = self.fs.read_to_string(path).await?;
        let wal: WalFile = serde_json::from_str(&content)?;

        if wal.version > WAL_VERSION {
            tracing::warn!(
                "wal file version {} is newer than supported version {}",
                wal.version,
                WAL_VERSION
            );
        }

        Ok(wal)
    }
}

/// Cheaply cloneable subset of `RecoveryManager` state needed by a spawned
/// timer task, so the task doesn't have to hold a `&RecoveryManager`.
struct SharedInner {
    recovery_dir: PathBuf,
    workspace_root: PathBuf,
    fs: Arc<dyn FileSystem>,
    time: Arc<dyn TimeProvider>,
    file_states: Arc<Mutex<HashMap<String, FileState>>>,
}

impl SharedInner {
    /// Shares the same skip-if-unchanged logic as `RecoveryManager::write_wal`:
    /// a tick whose content hash matches the last write for this key is a no-op.
    async fn write_if_changed_standalone(&self, file_key: &str, content: &str) -> Result<()> {
        let content_hash = xxh64(content.as_bytes(), 0);

        {
            let states = self.file_states.lock().unwrap();
            if let Some(state) = states.get(file_key) {
                if state.last_content_hash == content_hash {
                    return Ok(());
                }
            }
        }

        let wal = WalFile {
            version: WAL_VERSION,
            file_key: file_key.to_string(),
            content: content.to_string(),
            timestamp: self.time.now_utc(),
            workspace_root: self.workspace_root.to_string_lossy().to_string(),
        };

        let wal_path = self.recovery_dir.join(format!("{}.wal", safe_key(file_key)));
        let wal_json = serde_json::to_string_pretty(&wal)?;

        let temp_path = wal_path.with_extension("wal.tmp");
        self.fs.write(&temp_path, &wal_json).await?;
        self.fs.rename(&temp_path, &wal_path).await?;

        self.file_states
            .lock()
            .unwrap()
            .insert(file_key.to_string(), FileState { last_content_hash: content_hash });

        Ok(())
    }
}
