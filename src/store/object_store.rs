//! Content-addressable object store using SHA-256 hashes.
//!
//! Objects are stored uncompressed in a git-like directory structure:
//! `.midlight/objects/XX/XXXXXX...` (first 2 hex chars as subdirectory).
//! Every filename is the object's own hash, so writes are write-once and
//! no locking is required.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MidlightError, Result};
use crate::traits::FileSystem;

pub struct ObjectStore {
    objects_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl ObjectStore {
    pub fn new(workspace_root: &Path, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            objects_dir: workspace_root.join(".midlight").join("objects"),
            fs,
        }
    }

    /// Ensure the objects directory exists.
    pub async fn init(&self) -> Result<()> {
        self.fs.create_dir_all(&self.objects_dir).await?;
        Ok(())
    }

    /// SHA-256 hash of UTF-8 text content.
    pub fn hash(&self, content: &str) -> String {
        self.hash_bytes(content.as_bytes())
    }

    /// SHA-256 hash of raw bytes.
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Store content and return its hash. Idempotent: if an object with
    /// this hash already exists, the existing file is not rewritten.
    pub async fn write(&self, content: &str) -> Result<String> {
        self.write_bytes(content.as_bytes()).await
    }

    /// Store raw bytes and return the hash, same dedup semantics as `write`.
    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<String> {
        let hash = self.hash_bytes(bytes);
        let object_path = self.get_object_path(&hash);

        if self.fs.exists(&object_path).await {
            return Ok(hash);
        }

        if let Some(parent) = object_path.parent() {
            self.fs.create_dir_all(parent).await?;
        }

        self.fs.write_bytes(&object_path, bytes).await?;

        tracing::debug!("stored object {} ({} bytes)", &hash[..8], bytes.len());

        Ok(hash)
    }

    /// Read content by hash as UTF-8 text.
    pub async fn read(&self, hash: &str) -> Result<String> {
        let bytes = self.read_bytes(hash).await?;
        String::from_utf8(bytes)
            .map_err(|e| MidlightError::InvalidFormat(format!("object {hash} is not valid UTF-8: {e}")))
    }

    /// Read raw bytes by hash.
    pub async fn read_bytes(&self, hash: &str) -> Result<Vec<u8>> {
        let object_path = self.get_object_path(hash);

        if !self.fs.exists(&object_path).await {
            return Err(MidlightError::NotFound(format!("object {hash}")));
        }

        Ok(self.fs.read(&object_path).await?)
    }

    pub async fn exists(&self, hash: &str) -> bool {
        self.fs.exists(&self.get_object_path(hash)).await
    }

    /// Git-like layout: first 2 hex chars become a subdirectory.
    fn get_object_path(&self, hash: &str) -> PathBuf {
        if hash.len() < 2 {
            return self.objects_dir.join(hash);
        }
        self.objects_dir.join(&hash[..2]).join(&hash[2..])
    }

    /// List every hash currently stored.
    pub async fn enumerate(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();

        if !self.fs.exists(&self.objects_dir).await {
            return Ok(hashes);
        }

        for dir_entry in self.fs.read_dir(&self.objects_dir).await? {
            if !self.fs.is_dir(&dir_entry).await {
                continue;
            }
            let prefix = dir_entry
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            for file_entry in self.fs.read_dir(&dir_entry).await? {
                if let Some(suffix) = file_entry.file_name() {
                    hashes.push(format!("{}{}", prefix, suffix.to_string_lossy()));
                }
            }
        }

        Ok(hashes)
    }

    pub async fn object_count(&self) -> Result<usize> {
        Ok(self.enumerate().await?.len())
    }

    /// Total size in bytes of every stored object.
    pub async fn storage_size(&self) -> Result<u64> {
        let mut total = 0u64;

        if !self.fs.exists(&self.objects_dir).await {
            return Ok(0);
        }

        for dir_entry in self.fs.read_dir(&self.objects_dir).await? {
            if !self.fs.is_dir(&dir_entry).await {
                continue;
            }
            for file_entry in self.fs.read_dir(&dir_entry).await? {
                if let Ok(metadata) = self.fs.metadata(&file_entry).await {
                    total += metadata.len();
                }
            }
        }

        Ok(total)
    }

    /// Remove every object whose hash is not in `live`. A file that fails
    /// to unlink is logged and skipped rather than aborting the whole pass.
    pub async fn gc(&self, live: &HashSet<String>) -> Result<u64> {
        let mut bytes_freed = 0u64;

        if !self.fs.exists(&self.objects_dir).await {
            return Ok(0);
        }

        for dir_entry in self.fs.read_dir(&self.objects_dir).await? {
            if !self.fs.is_dir(&dir_entry).await {
                continue;
            }
            let prefix = dir_entry
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            for file_entry in self.fs.read_dir(&dir_entry).await? {
                let suffix = match file_entry.file_name() {
                    Some(n) => n.to_string_lossy().to_string(),
                    None => continue,
                };
                let hash = format!("{prefix}{suffix}");
                if live.contains(&hash) {
                    continue;
                }

                let size = self
                    .fs
                    .metadata(&file_entry)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);

                match self.fs.remove_file(&file_entry).await {
                    Ok(()) => bytes_freed += size,
                    Err(e) => tracing::warn!("gc: failed to remove object {}: {}", hash, e),
                }
            }
        }

        tracing::info!("gc: freed {} bytes from object store", bytes_freed);

        Ok(bytes_freed)
    }
}
