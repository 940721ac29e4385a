//! Workspace configuration, persisted at `.midlight/config.json`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::traits::FileSystem;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersioningConfig {
    pub enabled: bool,
    #[serde(rename = "checkpointIntervalMs")]
    pub checkpoint_interval_ms: i64,
    #[serde(rename = "minChangeChars")]
    pub min_change_chars: usize,
    #[serde(rename = "maxCheckpointsPerFile")]
    pub max_checkpoints_per_file: usize,
    #[serde(rename = "retentionDays")]
    pub retention_days: i64,
}

impl Default for VersioningConfig {
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryConfig {
    #[serde(rename = "walIntervalMs")]
    pub wal_interval_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { wal_interval_ms: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierConfig {
    #[serde(rename = "maxActiveDrafts")]
    pub max_active_drafts: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self { max_active_drafts: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceConfig {
    pub version: u32,
    pub versioning: VersioningConfig,
    pub recovery: RecoveryConfig,
    pub tier: TierConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            versioning: VersioningConfig::default(),
            recovery: RecoveryConfig::default(),
            tier: TierConfig::default(),
        }
    }
}

/// Load the workspace config, writing and returning the default if it
/// doesn't exist yet.
pub async fn load_or_init(workspace_root: &Path, fs: &Arc<dyn FileSystem>) -> Result<WorkspaceConfig> {
    let path = config_path(workspace_root);

    if !fs.exists(&path).await {
        let default = WorkspaceConfig::default();
        fs.write(&path, &serde_json::to_string_pretty(&default)?).await?;
        return Ok(default);
    }

    let raw = fs.read_to_string(&path).await?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

pub async fn save(workspace_root: &Path, fs: &Arc<dyn FileSystem>, config: &WorkspaceConfig) -> Result<()> {
    let path = config_path(workspace_root);
    fs.write(&path, &serde_json::to_string_pretty(config)?).await?;
    Ok(())
}

fn config_path(workspace_root: &Path) -> std::path::PathBuf {
    workspace_root.join(".midlight").join("config.json")
}
