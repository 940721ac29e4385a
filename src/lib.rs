//! Midlight: a local, file-backed document versioning engine.
//!
//! A workspace is a directory containing plain Markdown files plus a
//! hidden `.midlight/` subtree holding content-addressed blobs, images,
//! checkpoint history, drafts, crash recovery logs, and per-document
//! Sidecar metadata. [`workspace::WorkspaceCoordinator`] is the single
//! entry point for loading, saving, and garbage-collecting a workspace;
//! everything else in this crate is a subsystem it owns.

pub mod checkpoint;
pub mod document;
pub mod draft;
pub mod error;
pub mod recovery;
pub mod store;
pub mod traits;
pub mod util;
pub mod workspace;

pub use error::{MidlightError, Result};
pub use workspace::{SaveTrigger, WorkspaceCoordinator, WorkspaceRegistry};

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`,
/// defaulting to `midlight_core=info` when unset. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("midlight_core=info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
