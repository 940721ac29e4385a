//! Workspace Coordinator: the single entry point for document operations
//! against one workspace root. Owns every subcomponent, resolves file
//! keys to on-disk paths, and orchestrates garbage collection across
//! their live sets.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointManager, CheckpointTrigger};
use crate::document::{self, Document, Sidecar};
use crate::draft::DraftManager;
use crate::error::{MidlightError, Result};
use crate::recovery::RecoveryManager;
use crate::store::{ImageStore, ObjectStore};
use crate::traits::{FileSystem, TimeProvider};
use crate::util::safe_key;
use crate::workspace::config::{self, WorkspaceConfig};

/// What triggered a `save`, mapped onto a `CheckpointTrigger` for the
/// gated `maybe_create` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Auto,
    Manual,
    Close,
}

pub struct LoadedDocument {
    pub document: Document,
    pub markdown: String,
    pub sidecar: Sidecar,
    pub has_recovery: bool,
    pub recovery_time: Option<DateTime<Utc>>,
}

pub struct SaveResult {
    pub success: bool,
    pub checkpoint_created: Option<Checkpoint>,
    pub error: Option<String>,
}

pub struct GcResult {
    pub objects_freed: u64,
    pub images_freed: u64,
}

pub struct WorkspaceCoordinator {
    workspace_root: PathBuf,
    fs: Arc<dyn FileSystem>,
    time: Arc<dyn TimeProvider>,
    object_store: Arc<ObjectStore>,
    image_store: Arc<ImageStore>,
    checkpoint_manager: Arc<CheckpointManager>,
    draft_manager: Arc<DraftManager>,
    recovery_manager: Arc<RecoveryManager>,
    config: Mutex<WorkspaceConfig>,
    initialized: Mutex<bool>,
}

impl WorkspaceCoordinator {
    pub fn new(workspace_root: &Path, fs: Arc<dyn FileSystem>, time: Arc<dyn TimeProvider>) -> Self {
        let object_store = Arc::new(ObjectStore::new(workspace_root, fs.clone()));
        let image_store = Arc::new(ImageStore::new(workspace_root, fs.clone()));
        let checkpoint_manager = Arc::new(CheckpointManager::new(
            workspace_root,
            object_store.clone(),
            fs.clone(),
            time.clone(),
            CheckpointConfig::default(),
        ));
        let draft_manager = Arc::new(DraftManager::new(
            workspace_root,
            object_store.clone(),
            fs.clone(),
            time.clone(),
        ));
        let recovery_manager = Arc::new(RecoveryManager::new(
            workspace_root.to_path_buf(),
            fs.clone(),
            time.clone(),
        ));

        Self {
            workspace_root: workspace_root.to_path_buf(),
            fs,
            time,
            object_store,
            image_store,
            checkpoint_manager,
            draft_manager,
            recovery_manager,
            config: Mutex::new(WorkspaceConfig::default()),
            initialized: Mutex::new(false),
        }
    }

    /// Create the `.midlight/` subtree, load or write the default config,
    /// and initialize every subcomponent.
    pub async fn init(&self) -> Result<()> {
        let midlight_dir = self.workspace_root.join(".midlight");
        for sub in ["objects", "images", "checkpoints", "drafts", "recovery", "sidecars", "trash"] {
            self.fs.create_dir_all(&midlight_dir.join(sub)).await?;
        }

        let config = config::load_or_init(&self.workspace_root, &self.fs).await?;
        self.checkpoint_manager.update_config(CheckpointConfig {
            enabled: config.versioning.enabled,
            checkpoint_interval_ms: config.versioning.checkpoint_interval_ms,
            min_change_chars: config.versioning.min_change_chars,
            max_checkpoints_per_file: config.versioning.max_checkpoints_per_file,
            retention_days: config.versioning.retention_days,
        });
        *self.config.lock().unwrap() = config;

        self.object_store.init().await?;
        self.image_store.init().await?;
        self.checkpoint_manager.init().await?;
        self.draft_manager.init().await?;
        self.recovery_manager.init().await?;

        *self.initialized.lock().unwrap() = true;
        tracing::info!("workspace initialized at {}", self.workspace_root.display());
        Ok(())
    }

    pub fn object_store(&self) -> &Arc<ObjectStore> {
        &self.object_store
    }

    pub fn image_store(&self) -> &Arc<ImageStore> {
        &self.image_store
    }

    pub fn checkpoint_manager(&self) -> &Arc<CheckpointManager> {
        &self.checkpoint_manager
    }

    pub fn draft_manager(&self) -> &Arc<DraftManager> {
        &self.draft_manager
    }

    pub fn recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery_manager
    }

    fn check_initialized(&self) -> Result<()> {
        if *self.initialized.lock().unwrap() {
            Ok(())
        } else {
            Err(MidlightError::NotInitialized(
                "workspace coordinator has not been init()ed".into(),
            ))
        }
    }

    /// Read the Markdown and Sidecar for `file_key` (empty/default if
    /// absent), deserialize, and report outstanding recovery state.
    pub async fn load(&self, file_key: &str) -> Result<LoadedDocument> {
        self.check_initialized()?;
        let markdown = self.read_markdown(file_key).await?;
        let sidecar = self.read_sidecar(file_key).await?;
        let document = document::deserialize(&markdown, &sidecar, &self.image_store).await?;

        let has_recovery = self.recovery_manager.has_recovery(file_key).await;
        let recovery_time = self.recovery_manager.recovery_time(file_key).await?;

        Ok(LoadedDocument {
            document,
            markdown,
            sidecar,
            has_recovery,
            recovery_time,
        })
    }

    /// The deserialized WAL content for `file_key`. The WAL is left in
    /// place until the subsequent successful `save`.
    pub async fn load_from_recovery(&self, file_key: &str) -> Result<Option<LoadedDocument>> {
        self.check_initialized()?;
        let markdown = match self.recovery_manager.apply_recovery(file_key).await? {
            Some(m) => m,
            None => return Ok(None),
        };
        let sidecar = self.read_sidecar(file_key).await?;
        let document = document::deserialize(&markdown, &sidecar, &self.image_store).await?;

        Ok(Some(LoadedDocument {
            document,
            markdown,
            sidecar,
            has_recovery: true,
            recovery_time: self.recovery_manager.recovery_time(file_key).await?,
        }))
    }

    pub async fn discard_recovery(&self, file_key: &str) -> Result<LoadedDocument> {
        self.check_initialized()?;
        self.recovery_manager.discard_recovery(file_key).await?;
        self.load(file_key).await
    }

    /// Serialize and persist `document` as the content of `file_key`.
    ///
    /// 1. Load the existing Sidecar, to preserve user-owned `meta`.
    /// 2. Serialize; write the Markdown file; write the Sidecar file.
    /// 3. Clear the WAL.
    /// 4. `maybe_create` a checkpoint (`file_close` if `trigger == Close`
    ///    else `interval`).
    pub async fn save(&self, file_key: &str, document: &Document, trigger: SaveTrigger) -> Result<SaveResult> {
        if let Err(e) = self.check_initialized() {
            return Ok(SaveResult {
                success: false,
                checkpoint_created: None,
                error: Some(e.to_string()),
            });
        }
        match self.try_save(file_key, document, trigger).await {
            Ok(checkpoint_created) => Ok(SaveResult {
                success: true,
                checkpoint_created,
                error: None,
            }),
            Err(e) => Ok(SaveResult {
                success: false,
                checkpoint_created: None,
                error: Some(e.to_string()),
            }),
        }
    }

    async fn try_save(
        &self,
        file_key: &str,
        document: &Document,
        trigger: SaveTrigger,
    ) -> Result<Option<Checkpoint>> {
        let previous_sidecar = self.read_sidecar(file_key).await.ok();

        let (markdown, mut sidecar) =
            document::serialize(document, &self.image_store, self.time.now_utc()).await?;
        sidecar = crate::document::serializer::merge_preserving_user_meta(sidecar, previous_sidecar.as_ref());

        let file_path = self.workspace_root.join(file_key);
        if let Some(parent) = file_path.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        self.write_atomic(&file_path, &markdown).await?;

        let sidecar_json = serde_json::to_string_pretty(&sidecar)?;
        self.write_atomic(&self.sidecar_path(file_key), &sidecar_json).await?;

        self.recovery_manager.clear_wal(file_key).await?;

        let checkpoint_trigger = if trigger == SaveTrigger::Close {
            CheckpointTrigger::FileClose
        } else {
            CheckpointTrigger::Interval
        };

        self.checkpoint_manager
            .maybe_create(file_key, &markdown, &sidecar_json, checkpoint_trigger, None)
            .await
    }

    /// Apply a draft to its source document: write the draft head's
    /// content as the main document and record a checkpoint with trigger
    /// `draft_apply`.
    pub async fn apply_draft(&self, file_key: &str, draft_id: &str) -> Result<SaveResult> {
        self.check_initialized()?;
        let (markdown, sidecar_json) = self.draft_manager.apply(file_key, draft_id).await?;

        let file_path = self.workspace_root.join(file_key);
        if let Some(parent) = file_path.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        self.write_atomic(&file_path, &markdown).await?;
        self.write_atomic(&self.sidecar_path(file_key), &sidecar_json).await?;
        self.recovery_manager.clear_wal(file_key).await?;

        let checkpoint = self
            .checkpoint_manager
            .maybe_create(file_key, &markdown, &sidecar_json, CheckpointTrigger::DraftApply, None)
            .await?;

        Ok(SaveResult {
            success: true,
            checkpoint_created: checkpoint,
            error: None,
        })
    }

    /// `live_blobs = checkpoints.all_referenced_hashes() ∪
    /// drafts.all_referenced_hashes()`; `live_images = ⋃ sidecar.images
    /// across every sidecar`. WALs, history files, and sidecars
    /// themselves are never touched by GC.
    pub async fn run_gc(&self) -> Result<GcResult> {
        self.check_initialized()?;
        let mut live_blobs: HashSet<String> = self.checkpoint_manager.all_referenced_hashes().await?;
        live_blobs.extend(self.draft_manager.all_referenced_hashes().await?);

        let live_images = self.collect_live_image_refs().await?;

        let objects_freed = self.object_store.gc(&live_blobs).await?;
        let images_freed = self.image_store.gc(&live_images).await?;

        Ok(GcResult {
            objects_freed,
            images_freed,
        })
    }

    pub async fn update_versioning_config(&self, versioning: crate::workspace::config::VersioningConfig) -> Result<()> {
        self.check_initialized()?;
        let mut config = self.config.lock().unwrap().clone();
        config.versioning = versioning.clone();
        config::save(&self.workspace_root, &self.fs, &config).await?;
        *self.config.lock().unwrap() = config;

        self.checkpoint_manager.update_config(CheckpointConfig {
            enabled: versioning.enabled,
            checkpoint_interval_ms: versioning.checkpoint_interval_ms,
            min_change_chars: versioning.min_change_chars,
            max_checkpoints_per_file: versioning.max_checkpoints_per_file,
            retention_days: versioning.retention_days,
        });
        Ok(())
    }

    async fn collect_live_image_refs(&self) -> Result<HashSet<String>> {
        let mut refs = HashSet::new();
        let sidecars_dir = self.workspace_root.join(".midlight").join("sidecars");

        if !self.fs.exists(&sidecars_dir).await {
            return Ok(refs);
        }

        for path in self.fs.read_dir(&sidecars_dir).await? {
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let Ok(raw) = self.fs.read_to_string(&path).await else {
                continue;
            };
            if let Ok(sidecar) = serde_json::from_str::<Sidecar>(&raw) {
                refs.extend(sidecar.images.keys().cloned());
            }
        }

        Ok(refs)
    }

    async fn read_markdown(&self, file_key: &str) -> Result<String> {
        let path = self.workspace_root.join(file_key);
        if !self.fs.exists(&path).await {
            return Ok(String::new());
        }
        Ok(self.fs.read_to_string(&path).await?)
    }

    async fn read_sidecar(&self, file_key: &str) -> Result<Sidecar> {
        let path = self.sidecar_path(file_key);
        if !self.fs.exists(&path).await {
            return Ok(Sidecar::empty_default(self.time.now_utc()));
        }
        let raw = self.fs.read_to_string(&path).await?;
        let sidecar: Sidecar =
            serde_json::from_str(&raw).unwrap_or_else(|_| Sidecar::empty_default(self.time.now_utc()));

        if sidecar.version > crate::document::sidecar::SIDECAR_VERSION {
            tracing::warn!(
                "sidecar for {} is version {}, newer than supported version {}",
                file_key,
                sidecar.version,
                crate::document::sidecar::SIDECAR_VERSION
            );
        }

        Ok(sidecar)
    }

    fn sidecar_path(&self, file_key: &str) -> PathBuf {
        self.workspace_root
            .join(".midlight")
            .join("sidecars")
            .join(format!("{}.json", safe_key(file_key)))
    }

    /// Write `content` to `path` via temp-file-then-rename, so a reader
    /// (or a crash mid-write) never observes a truncated file at `path`.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        let mut temp_name = path.as_os_str().to_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        self.fs.write(&temp_path, content).await?;
        self.fs.rename(&temp_path, path).await?;
        Ok(())
    }
}

/// One coordinator per workspace root, keyed by absolute path.
pub struct WorkspaceRegistry {
    coordinators: Mutex<HashMap<String, Arc<WorkspaceCoordinator>>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self {
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, workspace_root: &str) -> Option<Arc<WorkspaceCoordinator>> {
        self.coordinators.lock().unwrap().get(workspace_root).cloned()
    }

    /// Idempotent factory: returns the existing coordinator for this root
    /// if one was already created, otherwise builds and initializes one.
    pub async fn get_or_create(
        &self,
        workspace_root: &str,
        fs: Arc<dyn FileSystem>,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Arc<WorkspaceCoordinator>> {
        if let Some(existing) = self.get(workspace_root) {
            return Ok(existing);
        }

        let coordinator = Arc::new(WorkspaceCoordinator::new(Path::new(workspace_root), fs, time));
        coordinator.init().await?;

        self.coordinators
            .lock()
            .unwrap()
            .insert(workspace_root.to_string(), coordinator.clone());
        Ok(coordinator)
    }

    pub fn remove(&self, workspace_root: &str) {
        self.coordinators.lock().unwrap().remove(workspace_root);
    }
}

impl Default for WorkspaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Block, BlockKind, Inline};
    use crate::traits::{MockFileSystem, MockTimeProvider};

    fn coordinator() -> WorkspaceCoordinator {
        let fs: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let time: Arc<dyn TimeProvider> = Arc::new(MockTimeProvider::from_timestamp(1_700_000_000));
        WorkspaceCoordinator::new(Path::new("/ws"), fs, time)
    }

    fn simple_doc(text: &str) -> Document {
        Document {
            blocks: vec![Block {
                id: None,
                align: None,
                kind: BlockKind::Paragraph {
                    inline: vec![Inline::plain(text)],
                },
            }],
        }
    }

    #[tokio::test]
    async fn init_creates_subtree_and_default_config() {
        let coordinator = coordinator();
        coordinator.init().await.unwrap();

        assert!(coordinator.fs.exists(&coordinator.workspace_root.join(".midlight/objects")).await);
        assert!(coordinator.fs.exists(&coordinator.workspace_root.join(".midlight/config.json")).await);
        assert!(*coordinator.initialized.lock().unwrap());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_document() {
        let coordinator = coordinator();
        coordinator.init().await.unwrap();

        let doc = simple_doc("hello world");
        let result = coordinator.save("note.md", &doc, SaveTrigger::Manual).await.unwrap();
        assert!(result.success);
        assert!(result.checkpoint_created.is_some());

        let loaded = coordinator.load("note.md").await.unwrap();
        assert!(!loaded.has_recovery);
        if let BlockKind::Paragraph { inline } = &loaded.document.blocks[0].kind {
            assert_eq!(inline[0].text, "hello world");
        } else {
            panic!("expected paragraph");
        }
    }

    #[tokio::test]
    async fn save_clears_existing_wal() {
        let coordinator = coordinator();
        coordinator.init().await.unwrap();

        coordinator
            .recovery_manager
            .write_wal("note.md", "unsaved draft")
            .await
            .unwrap();
        assert!(coordinator.recovery_manager.has_recovery("note.md").await);

        coordinator
            .save("note.md", &simple_doc("saved"), SaveTrigger::Manual)
            .await
            .unwrap();

        assert!(!coordinator.recovery_manager.has_recovery("note.md").await);
    }

    #[tokio::test]
    async fn load_absent_document_returns_empty() {
        let coordinator = coordinator();
        coordinator.init().await.unwrap();

        let loaded = coordinator.load("missing.md").await.unwrap();
        assert!(loaded.document.is_empty());
    }

    #[tokio::test]
    async fn run_gc_keeps_referenced_blobs() {
        let coordinator = coordinator();
        coordinator.init().await.unwrap();

        coordinator
            .save("note.md", &simple_doc("kept content"), SaveTrigger::Manual)
            .await
            .unwrap();

        let result = coordinator.run_gc().await.unwrap();
        assert_eq!(result.objects_freed, 0);

        let loaded = coordinator.load("note.md").await.unwrap();
        if let BlockKind::Paragraph { inline } = &loaded.document.blocks[0].kind {
            assert_eq!(inline[0].text, "kept content");
        } else {
            panic!("expected paragraph");
        }
    }

    #[tokio::test]
    async fn registry_returns_same_coordinator_for_same_root() {
        let registry = WorkspaceRegistry::new();
        let fs: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let time: Arc<dyn TimeProvider> = Arc::new(MockTimeProvider::new());

        let a = registry.get_or_create("/ws", fs.clone(), time.clone()).await.unwrap();
        let b = registry.get_or_create("/ws", fs, time).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn methods_reject_calls_before_init() {
        let coordinator = coordinator();

        assert!(matches!(
            coordinator.load("note.md").await,
            Err(MidlightError::NotInitialized(_))
        ));
        assert!(matches!(
            coordinator.run_gc().await,
            Err(MidlightError::NotInitialized(_))
        ));

        let doc = simple_doc("hello world");
        let result = coordinator.save("note.md", &doc, SaveTrigger::Manual).await.unwrap();
        assert!(!result.success);
        assert!(result.checkpoint_created.is_none());
        assert!(result.error.unwrap().contains("not been init"));
    }
}
