//! Write-ahead-log based crash recovery.

pub mod recovery_manager;

pub use recovery_manager::{ContentProducer, RecoveryEntry, RecoveryManager};
