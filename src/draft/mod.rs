//! Per-document draft branches with independent checkpoint chains.

pub mod draft_manager;

pub use draft_manager::{Draft, DraftManager, DraftStatus};
