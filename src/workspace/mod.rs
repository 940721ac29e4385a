//! Per-workspace configuration and the coordinator that ties every
//! subsystem together into load/save/GC operations on documents.

pub mod config;
pub mod coordinator;

pub use config::{RecoveryConfig, TierConfig, VersioningConfig, WorkspaceConfig};
pub use coordinator::{GcResult, LoadedDocument, SaveResult, SaveTrigger, WorkspaceCoordinator, WorkspaceRegistry};
