//! Draft manager: per-document branches with their own independent
//! checkpoint chain, grounded on the same history/retention shape as the
//! Checkpoint Manager but capped at a fixed chain length and stored one
//! file per draft under `.midlight/drafts/<safe-key>/<draft-id>.json`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::checkpoint::{Checkpoint, CheckpointKind, CheckpointStats, CheckpointTrigger};
use crate::error::{MidlightError, Result};
use crate::store::ObjectStore;
use crate::traits::{FileSystem, TimeProvider};
use crate::util::{random_base36, safe_key, KeyedLocks};

const MAX_DRAFT_CHECKPOINTS: usize = 20;
const DRAFT_VERSION: u32 = 1;

/// On-disk envelope for a draft file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DraftFile {
    version: u32,
    draft: Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Active,
    Merged,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: String,
    pub name: String,
    #[serde(rename = "fileKey")]
    pub file_key: String,
    #[serde(rename = "sourceCheckpointId")]
    pub source_checkpoint_id: Option<String>,
    #[serde(rename = "headId")]
    pub head_id: Option<String>,
    pub checkpoints: Vec<Checkpoint>,
    pub created: chrono::DateTime<chrono::Utc>,
    pub modified: chrono::DateTime<chrono::Utc>,
    pub status: DraftStatus,
}

impl Draft {
    fn find(&self, id: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == id)
    }

    fn head(&self) -> Option<&Checkpoint> {
        self.head_id.as_ref().and_then(|id| self.find(id))
    }
}

pub struct DraftManager {
    drafts_dir: PathBuf,
    object_store: Arc<ObjectStore>,
    fs: Arc<dyn FileSystem>,
    time: Arc<dyn TimeProvider>,
    locks: KeyedLocks,
}

impl DraftManager {
    pub fn new(
        workspace_root: &std::path::Path,
        object_store: Arc<ObjectStore>,
        fs: Arc<dyn FileSystem>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            drafts_dir: workspace_root.join(".midlight").join("drafts"),
            object_store,
            fs,
            time,
            locks: KeyedLocks::new(),
        }
    }

    fn lock_key(file_key: &str, draft_id: &str) -> String {
        format!("{file_key}\u{0}{draft_id}")
    }

    pub async fn init(&self) -> Result<()> {
        self.fs.create_dir_all(&self.drafts_dir).await?;
        Ok(())
    }

    /// Create a new draft rooted at a snapshot of `source_markdown` /
    /// `source_sidecar`. `source_checkpoint_id` is recorded but never
    /// dereferenced after creation.
    pub async fn create(
        &self,
        file_key: &str,
        name: &str,
        source_checkpoint_id: Option<String>,
        source_markdown: &str,
        source_sidecar: &str,
    ) -> Result<Draft> {
        let now = self.time.now_utc();
        let content_hash = self.object_store.write(source_markdown).await?;
        let sidecar_hash = self.object_store.write(source_sidecar).await?;

        let words = source_markdown.split_whitespace().count();
        let chars = source_markdown.chars().count();

        let root_checkpoint = Checkpoint {
            id: format!("dcp-{}", random_base36(6)),
            content_hash,
            sidecar_hash,
            timestamp: now,
            parent_id: None,
            kind: CheckpointKind::Auto,
            label: None,
            stats: CheckpointStats {
                words,
                chars,
                change_size: chars,
            },
            trigger: CheckpointTrigger::Interval,
        };

        let draft = Draft {
            id: format!("draft-{}", random_base36(8)),
            name: name.to_string(),
            file_key: file_key.to_string(),
            source_checkpoint_id,
            head_id: Some(root_checkpoint.id.clone()),
            checkpoints: vec![root_checkpoint],
            created: now,
            modified: now,
            status: DraftStatus::Active,
        };

        self.save(&draft).await?;
        Ok(draft)
    }

    /// Save new content to a draft's chain. Returns `None` if the new
    /// content hashes equal the current head's `content_hash`.
    pub async fn save_draft_content(
        &self,
        file_key: &str,
        draft_id: &str,
        markdown: &str,
        sidecar: &str,
    ) -> Result<Option<Checkpoint>> {
        let _guard = self.locks.lock(&Self::lock_key(file_key, draft_id)).await;
        let mut draft = self.load(file_key, draft_id).await?;

        let content_hash = self.object_store.hash(markdown);
        if let Some(head) = draft.head() {
            if head.content_hash == content_hash {
                return Ok(None);
            }
        }

        let content_hash = self.object_store.write(markdown).await?;
        let sidecar_hash = self.object_store.write(sidecar).await?;

        let words = markdown.split_whitespace().count();
        let chars = markdown.chars().count();
        let change_size = match draft.head() {
            Some(parent) => (chars as i64 - parent.stats.chars as i64).unsigned_abs() as usize,
            None => chars,
        };

        let checkpoint = Checkpoint {
            id: format!("dcp-{}", random_base36(6)),
            content_hash,
            sidecar_hash,
            timestamp: self.time.now_utc(),
            parent_id: draft.head_id.clone(),
            kind: CheckpointKind::Auto,
            label: None,
            stats: CheckpointStats {
                words,
                chars,
                change_size,
            },
            trigger: CheckpointTrigger::Interval,
        };

        draft.head_id = Some(checkpoint.id.clone());
        draft.checkpoints.push(checkpoint.clone());
        draft.modified = self.time.now_utc();

        if draft.checkpoints.len() > MAX_DRAFT_CHECKPOINTS {
            let excess = draft.checkpoints.len() - MAX_DRAFT_CHECKPOINTS;
            draft
                .checkpoints
                .sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            draft.checkpoints.drain(0..excess);
        }

        self.save(&draft).await?;
        Ok(Some(checkpoint))
    }

    pub async fn get(&self, file_key: &str, draft_id: &str) -> Result<Option<Draft>> {
        let path = self.draft_path(file_key, draft_id);
        if !self.fs.exists(&path).await {
            return Ok(None);
        }
        Ok(Some(self.load(file_key, draft_id).await?))
    }

    pub async fn list(&self, file_key: &str) -> Result<Vec<Draft>> {
        let dir = self.drafts_dir.join(safe_key(file_key));
        let mut drafts = Vec::new();

        if !self.fs.exists(&dir).await {
            return Ok(drafts);
        }

        for path in self.fs.read_dir(&dir).await? {
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let raw = self.fs.read_to_string(&path).await?;
            if let Ok(file) = serde_json::from_str::<DraftFile>(&raw) {
                drafts.push(file.draft);
            }
        }

        drafts.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(drafts)
    }

    /// Returns the draft's head content and transitions it to `merged`.
    /// The Workspace Coordinator is responsible for writing the content
    /// back to the main document and recording a main-line checkpoint.
    pub async fn apply(&self, file_key: &str, draft_id: &str) -> Result<(String, String)> {
        let _guard = self.locks.lock(&Self::lock_key(file_key, draft_id)).await;
        let mut draft = self.load(file_key, draft_id).await?;
        let head = draft
            .head()
            .cloned()
            .ok_or_else(|| MidlightError::Precondition(format!("draft {draft_id} has no head")))?;

        let markdown = self.object_store.read(&head.content_hash).await?;
        let sidecar = self.object_store.read(&head.sidecar_hash).await?;

        draft.status = DraftStatus::Merged;
        draft.modified = self.time.now_utc();
        self.save(&draft).await?;

        Ok((markdown, sidecar))
    }

    pub async fn discard(&self, file_key: &str, draft_id: &str) -> Result<()> {
        let _guard = self.locks.lock(&Self::lock_key(file_key, draft_id)).await;
        let mut draft = self.load(file_key, draft_id).await?;
        draft.status = DraftStatus::Archived;
        draft.modified = self.time.now_utc();
        self.save(&draft).await
    }

    /// Permanently unlinks the draft file.
    pub async fn delete(&self, file_key: &str, draft_id: &str) -> Result<()> {
        let path = self.draft_path(file_key, draft_id);
        if self.fs.exists(&path).await {
            self.fs.remove_file(&path).await?;
        }
        Ok(())
    }

    /// Union of every content/sidecar hash referenced by any draft in the
    /// workspace, for the global GC live set.
    pub async fn all_referenced_hashes(&self) -> Result<HashSet<String>> {
        let mut hashes = HashSet::new();

        if !self.fs.exists(&self.drafts_dir).await {
            return Ok(hashes);
        }

        for file_dir in self.fs.read_dir(&self.drafts_dir).await? {
            if !self.fs.is_dir(&file_dir).await {
                continue;
            }
            for path in self.fs.read_dir(&file_dir).await? {
                if !path.extension().is_some_and(|e| e == "json") {
                    continue;
                }
                let raw = self.fs.read_to_string(&path).await?;
                if let Ok(file) = serde_json::from_str::<DraftFile>(&raw) {
                    let draft = file.draft;
                    for checkpoint in &draft.checkpoints {
                        hashes.insert(checkpoint.content_hash.clone());
                        hashes.insert(checkpoint.sidecar_hash.clone());
                    }
                }
            }
        }

        Ok(hashes)
    }

    fn draft_path(&self, file_key: &str, draft_id: &str) -> PathBuf {
        self.drafts_dir
            .join(safe_key(file_key))
            .join(format!("{draft_id}.json"))
    }

    async fn load(&self, file_key: &str, draft_id: &str) -> Result<Draft> {
        let path = self.draft_path(file_key, draft_id);
        if !self.fs.exists(&path).await {
            return Err(MidlightError::NotFound(format!("draft {draft_id}")));
        }
        let raw = self.fs.read_to_string(&path).await?;
        let file: DraftFile = serde_json::from_str(&raw)
            .map_err(|e| MidlightError::InvalidFormat(format!("draft {draft_id}: {e}")))?;

        if file.version > DRAFT_VERSION {
            tracing::warn!(
                "draft {} is version {}, newer than supported version {}",
                draft_id,
                file.version,
                DRAFT_VERSION
            );
        }

        Ok(file.draft)
    }

    async fn save(&self, draft: &Draft) -> Result<()> {
        let dir = self.drafts_dir.join(safe_key(&draft.file_key));
        self.fs.create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", draft.id));
        let file = DraftFile {
            version: DRAFT_VERSION,
            draft: draft.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        self.fs.write(&path, &raw).await?;
        Ok(())
    }
}
