//! Content-addressable image store with deduplication.
//!
//! Images are deduplicated by SHA-256 truncated to 16 hex characters and
//! referenced by the consumer-facing id `@img:<hash16>` (distinct from
//! the object store's full-hash blob references).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{MidlightError, Result};
use crate::traits::FileSystem;

const REF_PREFIX: &str = "@img:";

/// Metadata about a stored image, returned by `info()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub filename: String,
    #[serde(rename = "originalName")]
    pub original_name: Option<String>,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Result of a successful store operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredImage {
    #[serde(rename = "ref")]
    pub image_ref: String,
    pub info: ImageInfo,
}

/// On-disk side table mapping hash16 -> original filename, since the
/// stored filename itself only carries the hash and extension.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageMeta {
    #[serde(default)]
    original_names: HashMap<String, String>,
}

pub struct ImageStore {
    images_dir: PathBuf,
    meta_path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl ImageStore {
    pub fn new(workspace_root: &Path, fs: Arc<dyn FileSystem>) -> Self {
        let images_dir = workspace_root.join(".midlight").join("images");
        let meta_path = images_dir.join(".meta.json");
        Self {
            images_dir,
            meta_path,
            fs,
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.fs.create_dir_all(&self.images_dir).await?;
        Ok(())
    }

    pub async fn store_data_url(
        &self,
        data_url: &str,
        original_name: Option<&str>,
    ) -> Result<StoredImage> {
        let (header, base64_data) = data_url
            .split_once(',')
            .ok_or_else(|| MidlightError::InvalidFormat("not a data URL".into()))?;

        let mime_type = header
            .strip_prefix("data:")
            .and_then(|s| s.split(';').next())
            .ok_or_else(|| MidlightError::InvalidFormat("missing data: prefix".into()))?
            .to_string();

        let bytes = BASE64
            .decode(base64_data)
            .map_err(|e| MidlightError::InvalidFormat(format!("invalid base64: {e}")))?;

        self.store_buffer(&bytes, &mime_type, original_name).await
    }

    pub async fn store_buffer(
        &self,
        bytes: &[u8],
        mime: &str,
        original_name: Option<&str>,
    ) -> Result<StoredImage> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let full_hash = format!("{:x}", hasher.finalize());
        let hash16 = &full_hash[..16];

        let extension = extension_for_mime(mime);
        let filename = format!("{hash16}.{extension}");
        let file_path = self.images_dir.join(&filename);

        if !self.fs.exists(&file_path).await {
            self.fs.write_bytes(&file_path, bytes).await?;
            tracing::debug!("stored new image {} ({} bytes)", filename, bytes.len());
        }

        if let Some(name) = original_name {
            let mut meta = self.load_meta().await?;
            meta.original_names
                .entry(hash16.to_string())
                .or_insert_with(|| name.to_string());
            self.save_meta(&meta).await?;
        }

        let info = self.build_info(hash16, &filename, bytes.len() as u64).await?;

        Ok(StoredImage {
            image_ref: format!("{REF_PREFIX}{hash16}"),
            info,
        })
    }

    pub async fn data_url(&self, image_ref: &str) -> Result<Option<String>> {
        let hash16 = Self::hash_of(image_ref);
        let path = match self.find_by_hash(hash16).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let bytes = self.fs.read(&path).await?;
        let mime = mime_for_path(&path);
        Ok(Some(format!("data:{};base64,{}", mime, BASE64.encode(&bytes))))
    }

    pub async fn buffer(&self, image_ref: &str) -> Result<Option<(Vec<u8>, String)>> {
        let hash16 = Self::hash_of(image_ref);
        let path = match self.find_by_hash(hash16).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let bytes = self.fs.read(&path).await?;
        let mime = mime_for_path(&path);
        Ok(Some((bytes, mime)))
    }

    pub async fn exists(&self, image_ref: &str) -> bool {
        let hash16 = Self::hash_of(image_ref);
        matches!(self.find_by_hash(hash16).await, Ok(Some(_)))
    }

    pub async fn info(&self, image_ref: &str) -> Result<Option<ImageInfo>> {
        let hash16 = Self::hash_of(image_ref);
        let path = match self.find_by_hash(hash16).await? {
            Some(p) => p,
            None => return Ok(None),
        };

        let size = self.fs.metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Some(self.build_info(hash16, &filename, size).await?))
    }

    /// All refs currently stored.
    pub async fn all_refs(&self) -> Result<Vec<String>> {
        let mut refs = Vec::new();

        if !self.fs.exists(&self.images_dir).await {
            return Ok(refs);
        }

        for entry in self.fs.read_dir(&self.images_dir).await? {
            if !self.fs.is_file(&entry).await {
                continue;
            }
            if entry
                .file_name()
                .map(|n| n == ".meta.json")
                .unwrap_or(false)
            {
                continue;
            }
            if let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) {
                refs.push(format!("{REF_PREFIX}{stem}"));
            }
        }

        Ok(refs)
    }

    /// Remove every image whose hash16 is not in `live_refs`. `live_refs`
    /// may contain either bare hash16 strings or full `@img:` refs.
    pub async fn gc(&self, live_refs: &HashSet<String>) -> Result<u64> {
        let live_hashes: HashSet<&str> = live_refs.iter().map(|r| Self::hash_of(r)).collect();
        let mut bytes_freed = 0u64;

        if !self.fs.exists(&self.images_dir).await {
            return Ok(0);
        }

        for entry in self.fs.read_dir(&self.images_dir).await? {
            if !self.fs.is_file(&entry).await {
                continue;
            }
            if entry
                .file_name()
                .map(|n| n == ".meta.json")
                .unwrap_or(false)
            {
                continue;
            }
            let stem = match entry.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            if live_hashes.contains(stem) {
                continue;
            }

            let size = self.fs.metadata(&entry).await.map(|m| m.len()).unwrap_or(0);
            match self.fs.remove_file(&entry).await {
                Ok(()) => bytes_freed += size,
                Err(e) => tracing::warn!("gc: failed to remove image {:?}: {}", entry, e),
            }
        }

        Ok(bytes_freed)
    }

    pub async fn copy_to(&self, image_ref: &str, dest_path: &Path) -> Result<bool> {
        let hash16 = Self::hash_of(image_ref);
        let src = match self.find_by_hash(hash16).await? {
            Some(p) => p,
            None => return Ok(false),
        };

        if let Some(parent) = dest_path.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        self.fs.copy(&src, dest_path).await?;
        Ok(true)
    }

    fn hash_of(image_ref: &str) -> &str {
        image_ref.strip_prefix(REF_PREFIX).unwrap_or(image_ref)
    }

    async fn find_by_hash(&self, hash16: &str) -> Result<Option<PathBuf>> {
        if !self.fs.exists(&self.images_dir).await {
            return Ok(None);
        }

        for entry in self.fs.read_dir(&self.images_dir).await? {
            if let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) {
                if stem == hash16 {
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    async fn build_info(&self, hash16: &str, filename: &str, size_bytes: u64) -> Result<ImageInfo> {
        let meta = self.load_meta().await?;
        let original_name = meta.original_names.get(hash16).cloned();
        let ext = filename.rsplit('.').next().unwrap_or("bin");
        Ok(ImageInfo {
            filename: filename.to_string(),
            original_name,
            size_bytes,
            mime_type: mime_for_extension(ext).to_string(),
        })
    }

    async fn load_meta(&self) -> Result<ImageMeta> {
        if !self.fs.exists(&self.meta_path).await {
            return Ok(ImageMeta::default());
        }
        let raw = self.fs.read_to_string(&self.meta_path).await?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    async fn save_meta(&self, meta: &ImageMeta) -> Result<()> {
        let raw = serde_json::to_string_pretty(meta)?;
        self.fs.write(&self.meta_path, &raw).await?;
        Ok(())
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn mime_for_path(path: &Path) -> String {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("bin");
    mime_for_extension(ext).to_string()
}
