//! Checkpoint manager: automatic, time/change-gated version history plus
//! named bookmarks, for a single workspace.
//!
//! Each tracked file gets one history file at
//! `.midlight/checkpoints/<safe-key>.json`, a parent-linked chain (not a
//! DAG) of checkpoints. Blob content lives in the `ObjectStore`; the
//! history only records hashes.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{MidlightError, Result};
use crate::store::ObjectStore;
use crate::traits::{FileSystem, TimeProvider};
use crate::util::{safe_key, KeyedLocks};

/// What caused a checkpoint to be (considered for) creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Interval,
    FileOpen,
    FileClose,
    Bookmark,
    Restore,
    DraftApply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    Auto,
    Bookmark,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointStats {
    pub words: usize,
    pub chars: usize,
    #[serde(rename = "changeSize")]
    pub change_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: String,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    #[serde(rename = "sidecarHash")]
    pub sidecar_hash: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: CheckpointKind,
    pub label: Option<String>,
    pub stats: CheckpointStats,
    pub trigger: CheckpointTrigger,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointHistory {
    #[serde(rename = "fileKey")]
    file_key: String,
    #[serde(rename = "headId")]
    head_id: Option<String>,
    checkpoints: Vec<Checkpoint>,
}

impl CheckpointHistory {
    fn new(file_key: &str) -> Self {
        Self {
            file_key: file_key.to_string(),
            head_id: None,
            checkpoints: Vec::new(),
        }
    }

    fn find(&self, id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == id)
    }

    fn head(&self) -> Option<&Checkpoint> {
        self.head_id.as_ref().and_then(|id| self.find(id))
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub checkpoint_interval_ms: i64,
    pub min_change_chars: usize,
    pub max_checkpoints_per_file: usize,
    pub retention_days: i64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            checkpoint_interval_ms: 5 * 60 * 1000,
            min_change_chars: 50,
            max_checkpoints_per_file: 50,
            retention_days: 7,
        }
    }
}

struct LastWrite {
    time: chrono::DateTime<chrono::Utc>,
    content_hash: String,
}

pub struct ComparedCheckpoints {
    pub content_a: String,
    pub content_b: String,
    pub sidecar_a: String,
    pub sidecar_b: String,
}

pub struct CheckpointManager {
    checkpoints_dir: PathBuf,
    object_store: Arc<ObjectStore>,
    fs: Arc<dyn FileSystem>,
    time: Arc<dyn TimeProvider>,
    config: Mutex<CheckpointConfig>,
    last: Mutex<HashMap<String, LastWrite>>,
    locks: KeyedLocks,
}

impl CheckpointManager {
    pub fn new(
        workspace_root: &std::path::Path,
        object_store: Arc<ObjectStore>,
        fs: Arc<dyn FileSystem>,
        time: Arc<dyn TimeProvider>,
        config: CheckpointConfig,
    ) -> Self {
        Self {
            checkpoints_dir: workspace_root.join(".midlight").join("checkpoints"),
            object_store,
            fs,
            time,
            config: Mutex::new(config),
            last: Mutex::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.fs.create_dir_all(&self.checkpoints_dir).await?;
        Ok(())
    }

    pub fn update_config(&self, config: CheckpointConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn clear_tracking(&self) {
        self.last.lock().unwrap().clear();
    }

    /// Gated checkpoint creation. Returns `None` if the gate decided to
    /// skip this call.
    pub async fn maybe_create(
        &self,
        file_key: &str,
        markdown: &str,
        sidecar: &str,
        trigger: CheckpointTrigger,
        label: Option<String>,
    ) -> Result<Option<Checkpoint>> {
        let config = self.config.lock().unwrap().clone();

        if !config.enabled && trigger != CheckpointTrigger::Bookmark {
            return Ok(None);
        }

        let content_hash = self.object_store.hash(markdown);
        let sidecar_hash = self.object_store.hash(sidecar);

        let now = self.time.now_utc();
        let last_snapshot = {
            let guard = self.last.lock().unwrap();
            guard.get(file_key).map(|l| (l.time, l.content_hash.clone()))
        };

        if let Some((_, last_hash)) = &last_snapshot {
            if last_hash == &content_hash && trigger != CheckpointTrigger::Bookmark {
                return Ok(None);
            }
        }

        let gated_triggers = !matches!(
            trigger,
            CheckpointTrigger::Bookmark | CheckpointTrigger::FileOpen
        );

        if gated_triggers {
            if let Some((last_time, _)) = &last_snapshot {
                let elapsed_ms = (now - *last_time).num_milliseconds();
                if elapsed_ms < config.checkpoint_interval_ms {
                    return Ok(None);
                }
            }
        }

        if gated_triggers {
            if let Some((_, last_hash)) = &last_snapshot {
                if let Ok(last_content) = self.object_store.read(last_hash).await {
                    let delta = (markdown.chars().count() as i64 - last_content.chars().count() as i64).unsigned_abs() as usize;
                    if delta < config.min_change_chars {
                        return Ok(None);
                    }
                }
            }
        }

        let checkpoint = self
            .force_create(file_key, markdown, sidecar, trigger, label)
            .await?;

        self.last.lock().unwrap().insert(
            file_key.to_string(),
            LastWrite {
                time: now,
                content_hash,
            },
        );

        Ok(Some(checkpoint))
    }

    /// Unconditional checkpoint creation.
    pub async fn force_create(
        &self,
        file_key: &str,
        markdown: &str,
        sidecar: &str,
        trigger: CheckpointTrigger,
        label: Option<String>,
    ) -> Result<Checkpoint> {
        let _guard = self.locks.lock(file_key).await;

        let content_hash = self.object_store.write(markdown).await?;
        let sidecar_hash = self.object_store.write(sidecar).await?;

        let mut history = self.load_history(file_key).await?;

        let words = markdown.split_whitespace().count();
        let chars = markdown.chars().count();
        let change_size = match history.head() {
            Some(parent) => (chars as i64 - parent.stats.chars as i64).unsigned_abs() as usize,
            None => chars,
        };

        let kind = if trigger == CheckpointTrigger::Bookmark {
            CheckpointKind::Bookmark
        } else {
            CheckpointKind::Auto
        };

        let checkpoint = Checkpoint {
            id: format!("cp-{}", crate::util::random_base36(6)),
            content_hash,
            sidecar_hash,
            timestamp: self.time.now_utc(),
            parent_id: history.head_id.clone(),
            kind,
            label,
            stats: CheckpointStats {
                words,
                chars,
                change_size,
            },
            trigger,
        };

        history.head_id = Some(checkpoint.id.clone());
        history.checkpoints.push(checkpoint.clone());

        let config = self.config.lock().unwrap().clone();
        self.apply_retention(&mut history, &config);

        self.save_history(file_key, &history).await?;

        Ok(checkpoint)
    }

    /// Newest-first list of checkpoints for `file_key`.
    pub async fn list(&self, file_key: &str) -> Result<Vec<Checkpoint>> {
        let history = self.load_history(file_key).await?;
        let mut checkpoints = history.checkpoints;
        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(checkpoints)
    }

    pub async fn head_id(&self, file_key: &str) -> Result<Option<String>> {
        Ok(self.load_history(file_key).await?.head_id)
    }

    pub async fn content(&self, file_key: &str, id: &str) -> Result<Option<(String, String)>> {
        let history = self.load_history(file_key).await?;
        let checkpoint = match history.find(id) {
            Some(c) => c,
            None => return Ok(None),
        };

        let markdown = self.object_store.read(&checkpoint.content_hash).await?;
        let sidecar = self.object_store.read(&checkpoint.sidecar_hash).await?;
        Ok(Some((markdown, sidecar)))
    }

    /// Read the target checkpoint, then append a new checkpoint recording
    /// the restore as a new head.
    pub async fn restore(&self, file_key: &str, id: &str) -> Result<Option<(String, String)>> {
        let (markdown, sidecar) = match self.content(file_key, id).await? {
            Some(v) => v,
            None => return Ok(None),
        };

        let history = self.load_history(file_key).await?;
        let source = history.find(id).expect("checkpoint just read above");
        let source_label = source
            .label
            .clone()
            .unwrap_or_else(|| source.timestamp.to_rfc3339());

        self.force_create(
            file_key,
            &markdown,
            &sidecar,
            CheckpointTrigger::Restore,
            Some(format!("Restored from: {source_label}")),
        )
        .await?;

        Ok(Some((markdown, sidecar)))
    }

    /// Turn an auto-checkpoint into a bookmark.
    pub async fn label(&self, file_key: &str, id: &str, label: String) -> Result<bool> {
        let _guard = self.locks.lock(file_key).await;
        let mut history = self.load_history(file_key).await?;
        let found = match history.checkpoints.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.kind = CheckpointKind::Bookmark;
                c.label = Some(label);
                true
            }
            None => false,
        };
        if found {
            self.save_history(file_key, &history).await?;
        }
        Ok(found)
    }

    pub async fn unlabel(&self, file_key: &str, id: &str) -> Result<bool> {
        let _guard = self.locks.lock(file_key).await;
        let mut history = self.load_history(file_key).await?;
        let found = match history.checkpoints.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.kind = CheckpointKind::Auto;
                c.label = None;
                true
            }
            None => false,
        };
        if found {
            self.save_history(file_key, &history).await?;
        }
        Ok(found)
    }

    /// Delete a checkpoint, re-parenting its child to its parent. If the
    /// deleted node was head, the new head becomes the newest remaining
    /// checkpoint by timestamp.
    pub async fn delete(&self, file_key: &str, id: &str) -> Result<bool> {
        let _guard = self.locks.lock(file_key).await;
        let mut history = self.load_history(file_key).await?;

        let target = match history.find(id).cloned() {
            Some(c) => c,
            None => return Ok(false),
        };

        for checkpoint in history.checkpoints.iter_mut() {
            if checkpoint.parent_id.as_deref() == Some(id) {
                checkpoint.parent_id = target.parent_id.clone();
            }
        }

        history.checkpoints.retain(|c| c.id != id);

        if history.head_id.as_deref() == Some(id) {
            history.head_id = history
                .checkpoints
                .iter()
                .max_by_key(|c| c.timestamp)
                .map(|c| c.id.clone());
        }

        self.save_history(file_key, &history).await?;
        Ok(true)
    }

    pub async fn compare(&self, file_key: &str, a: &str, b: &str) -> Result<Option<ComparedCheckpoints>> {
        let history = self.load_history(file_key).await?;
        let (ca, cb) = match (history.find(a), history.find(b)) {
            (Some(ca), Some(cb)) => (ca.clone(), cb.clone()),
            _ => return Ok(None),
        };

        let content_a = self.object_store.read(&ca.content_hash).await?;
        let content_b = self.object_store.read(&cb.content_hash).await?;
        let sidecar_a = self.object_store.read(&ca.sidecar_hash).await?;
        let sidecar_b = self.object_store.read(&cb.sidecar_hash).await?;

        Ok(Some(ComparedCheckpoints {
            content_a,
            content_b,
            sidecar_a,
            sidecar_b,
        }))
    }

    /// Union of every `content_hash` and `sidecar_hash` across every
    /// history file in this workspace. Used by GC to build the live set.
    pub async fn all_referenced_hashes(&self) -> Result<HashSet<String>> {
        let mut hashes = HashSet::new();

        if !self.fs.exists(&self.checkpoints_dir).await {
            return Ok(hashes);
        }

        for path in self.fs.read_dir(&self.checkpoints_dir).await? {
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let raw = self.fs.read_to_string(&path).await?;
            if let Ok(history) = serde_json::from_str::<CheckpointHistory>(&raw) {
                for checkpoint in &history.checkpoints {
                    hashes.insert(checkpoint.content_hash.clone());
                    hashes.insert(checkpoint.sidecar_hash.clone());
                }
            }
        }

        Ok(hashes)
    }

    fn apply_retention(&self, history: &mut CheckpointHistory, config: &CheckpointConfig) {
        let cutoff = self.time.now_utc() - chrono::Duration::days(config.retention_days);

        history.checkpoints.retain(|c| {
            c.kind == CheckpointKind::Bookmark || c.timestamp >= cutoff
        });

        let mut auto_indices: Vec<usize> = history
            .checkpoints
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == CheckpointKind::Auto)
            .map(|(i, _)| i)
            .collect();

        if auto_indices.len() > config.max_checkpoints_per_file {
            auto_indices.sort_by_key(|&i| history.checkpoints[i].timestamp);
            let excess = auto_indices.len() - config.max_checkpoints_per_file;
            let to_remove: HashSet<String> = auto_indices[..excess]
                .iter()
                .map(|&i| history.checkpoints[i].id.clone())
                .collect();
            history.checkpoints.retain(|c| !to_remove.contains(&c.id));
        }

        if let Some(head_id) = &history.head_id {
            if history.find(head_id).is_none() {
                history.head_id = history
                    .checkpoints
                    .iter()
                    .max_by_key(|c| c.timestamp)
                    .map(|c| c.id.clone());
            }
        }
    }

    fn history_path(&self, file_key: &str) -> PathBuf {
        self.checkpoints_dir.join(format!("{}.json", safe_key(file_key)))
    }

    async fn load_history(&self, file_key: &str) -> Result<CheckpointHistory> {
        let path = self.history_path(file_key);
        if !self.fs.exists(&path).await {
            return Ok(CheckpointHistory::new(file_key));
        }
        let raw = self.fs.read_to_string(&path).await?;
        serde_json::from_str(&raw)
            .map_err(|e| MidlightError::InvalidFormat(format!("checkpoint history for {file_key}: {e}")))
    }

    async fn save_history(&self, file_key: &str, history: &CheckpointHistory) -> Result<()> {
        let path = self.history_path(file_key);
        let raw = serde_json::to_string_pretty(history)?;
        self.fs.write(&path, &raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MockFileSystem, MockTimeProvider};
    use std::time::Duration;

    fn setup() -> (CheckpointManager, Arc<MockTimeProvider>) {
        let fs: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let time = Arc::new(MockTimeProvider::from_timestamp(1_700_000_000));
        let object_store = Arc::new(ObjectStore::new(std::path::Path::new("/ws"), fs.clone()));
        let manager = CheckpointManager::new(
            std::path::Path::new("/ws"),
            object_store,
            fs,
            time.clone(),
            CheckpointConfig::default(),
        );
        (manager, time)
    }

    #[tokio::test]
    async fn first_checkpoint_always_created() {
        let (manager, _time) = setup();
        manager.init().await.unwrap();

        let cp = manager
            .maybe_create("note.md", "hello world", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        assert!(cp.is_some());
        assert_eq!(manager.list("note.md").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unchanged_content_is_skipped() {
        let (manager, time) = setup();
        manager.init().await.unwrap();

        manager
            .maybe_create("note.md", "hello world", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        time.advance(Duration::from_secs(600));

        let cp = manager
            .maybe_create("note.md", "hello world", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        assert!(cp.is_none());
    }

    #[tokio::test]
    async fn too_soon_is_skipped_even_with_big_change() {
        let (manager, _time) = setup();
        manager.init().await.unwrap();

        manager
            .maybe_create("note.md", "hello world", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        let big_change = "x".repeat(500);
        let cp = manager
            .maybe_create("note.md", &big_change, "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        assert!(cp.is_none(), "interval gate should block even a large change");
    }

    #[tokio::test]
    async fn small_change_after_interval_is_skipped() {
        let (manager, time) = setup();
        manager.init().await.unwrap();

        manager
            .maybe_create("note.md", "hello world", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        time.advance(Duration::from_secs(600));

        let cp = manager
            .maybe_create("note.md", "hello world!!", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        assert!(cp.is_none(), "change under min_change_chars should be skipped");
    }

    #[tokio::test]
    async fn bookmark_trigger_bypasses_all_gates() {
        let (manager, _time) = setup();
        manager.init().await.unwrap();

        manager
            .maybe_create("note.md", "hello world", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        let cp = manager
            .maybe_create(
                "note.md",
                "hello world",
                "{}",
                CheckpointTrigger::Bookmark,
                Some("v1".into()),
            )
            .await
            .unwrap();

        assert!(cp.is_some());
        assert_eq!(cp.unwrap().kind, CheckpointKind::Bookmark);
    }

    #[tokio::test]
    async fn restore_appends_new_checkpoint_with_label() {
        let (manager, time) = setup();
        manager.init().await.unwrap();

        let first = manager
            .maybe_create("note.md", "version one", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap()
            .unwrap();

        time.advance(Duration::from_secs(600));
        manager
            .maybe_create(
                "note.md",
                &"version two is a lot longer than version one".repeat(3),
                "{}",
                CheckpointTrigger::Interval,
                None,
            )
            .await
            .unwrap();

        let restored = manager.restore("note.md", &first.id).await.unwrap().unwrap();
        assert_eq!(restored.0, "version one");

        let list = manager.list("note.md").await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].trigger, CheckpointTrigger::Restore);
        assert!(list[0].label.as_deref().unwrap().starts_with("Restored from:"));
    }

    #[tokio::test]
    async fn delete_reparents_child_to_grandparent() {
        let (manager, time) = setup();
        manager.init().await.unwrap();

        let cp1 = manager
            .maybe_create("note.md", "v1", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap()
            .unwrap();

        time.advance(Duration::from_secs(600));
        let cp2 = manager
            .force_create("note.md", "v2 is longer text here", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        time.advance(Duration::from_secs(600));
        let cp3 = manager
            .force_create("note.md", "v3 is even longer text than before", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        assert_eq!(cp3.parent_id.as_deref(), Some(cp2.id.as_str()));

        manager.delete("note.md", &cp2.id).await.unwrap();

        let list = manager.list("note.md").await.unwrap();
        let reparented = list.iter().find(|c| c.id == cp3.id).unwrap();
        assert_eq!(reparented.parent_id.as_deref(), Some(cp1.id.as_str()));
    }

    #[tokio::test]
    async fn label_and_unlabel_round_trip() {
        let (manager, _time) = setup();
        manager.init().await.unwrap();

        let cp = manager
            .maybe_create("note.md", "hello", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap()
            .unwrap();

        assert!(manager.label("note.md", &cp.id, "my bookmark".into()).await.unwrap());
        let list = manager.list("note.md").await.unwrap();
        assert_eq!(list[0].kind, CheckpointKind::Bookmark);

        assert!(manager.unlabel("note.md", &cp.id).await.unwrap());
        let list = manager.list("note.md").await.unwrap();
        assert_eq!(list[0].kind, CheckpointKind::Auto);
    }

    #[tokio::test]
    async fn retention_never_removes_bookmarks() {
        let (manager, time) = setup();
        manager.init().await.unwrap();
        manager.update_config(CheckpointConfig {
            retention_days: 1,
            ..CheckpointConfig::default()
        });

        manager
            .maybe_create(
                "note.md",
                "bookmarked content",
                "{}",
                CheckpointTrigger::Bookmark,
                Some("keep me".into()),
            )
            .await
            .unwrap();

        time.advance(Duration::from_secs(3 * 24 * 3600));

        manager
            .maybe_create("note.md", "new content after retention window", "{}", CheckpointTrigger::FileOpen, None)
            .await
            .unwrap();

        let list = manager.list("note.md").await.unwrap();
        assert!(list.iter().any(|c| c.kind == CheckpointKind::Bookmark));
    }

    #[tokio::test]
    async fn retention_caps_auto_checkpoints_keeping_newest() {
        let (manager, time) = setup();
        manager.init().await.unwrap();
        manager.update_config(CheckpointConfig {
            max_checkpoints_per_file: 3,
            checkpoint_interval_ms: 0,
            min_change_chars: 0,
            ..CheckpointConfig::default()
        });

        for i in 0..5 {
            time.advance(Duration::from_secs(1));
            manager
                .force_create(
                    "note.md",
                    &format!("content version {i}"),
                    "{}",
                    CheckpointTrigger::Interval,
                    None,
                )
                .await
                .unwrap();
        }

        let list = manager.list("note.md").await.unwrap();
        assert_eq!(list.len(), 3);
        assert!(list[0].content_hash != list[2].content_hash);
    }

    #[tokio::test]
    async fn concurrent_force_create_on_same_key_does_not_lose_an_update() {
        let (manager, _time) = setup();
        manager.init().await.unwrap();

        let (a, b) = tokio::join!(
            manager.force_create("note.md", "version a", "{}", CheckpointTrigger::Interval, None),
            manager.force_create("note.md", "version b", "{}", CheckpointTrigger::Interval, None),
        );
        a.unwrap();
        b.unwrap();

        let list = manager.list("note.md").await.unwrap();
        assert_eq!(list.len(), 2, "both concurrent writers' checkpoints must survive");
    }

    #[tokio::test]
    async fn all_referenced_hashes_covers_every_history() {
        let (manager, _time) = setup();
        manager.init().await.unwrap();

        manager
            .maybe_create("a.md", "content a", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();
        manager
            .maybe_create("b.md", "content b", "{}", CheckpointTrigger::Interval, None)
            .await
            .unwrap();

        let hashes = manager.all_referenced_hashes().await.unwrap();
        assert_eq!(hashes.len(), 4); // 2 content hashes + 2 sidecar hashes
    }
}
