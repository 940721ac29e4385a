//! Small helpers shared by the managers that key their on-disk state by a
//! document's workspace-relative path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Turn a file key (a workspace-relative path, e.g. `notes/ideas.md`) into
/// a string safe to embed in a single path segment: path separators become
/// `_` and a trailing `.md` extension is stripped (e.g. `notes/ideas.md` ->
/// `notes_ideas`). Interior dots are left untouched.
pub(crate) fn safe_key(file_key: &str) -> String {
    file_key
        .trim_end_matches(".md")
        .replace(['/', '\\'], "_")
}

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A random lowercase base36 token of the given length, used for
/// checkpoint/draft/block ids.
pub(crate) fn random_base36(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36_ALPHABET[rng.gen_range(0..BASE36_ALPHABET.len())] as char)
        .collect()
}

/// Per-key async mutexes so a read-modify-write against one file key's
/// on-disk JSON can be serialized without blocking operations on other
/// keys behind the same lock.
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, creating it on first use. Held until the
    /// returned guard is dropped.
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.locks.lock().unwrap();
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}
