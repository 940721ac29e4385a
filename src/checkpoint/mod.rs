//! Automatic, gated checkpoint history plus named bookmarks.

pub mod checkpoint_manager;

pub use checkpoint_manager::{
    Checkpoint, CheckpointConfig, CheckpointKind, CheckpointManager, CheckpointStats,
    CheckpointTrigger, ComparedCheckpoints,
};
