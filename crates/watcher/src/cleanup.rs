use std::collections::HashMap;
use std::path::PathBuf;

use log::warn;

use crate::transfer;

/// Tracks transcoder input files this watcher moved in, so they can be
/// removed once their job reaches a terminal state.
///
/// Deletion is deferred and retried: the engine may still hold the file
/// open on the tick its job finishes.
#[derive(Default)]
pub struct InputCleanup {
    registered: HashMap<String, PathBuf>,
    pending: Vec<PathBuf>,
}

impl InputCleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the input file behind a title after moving it in
    pub fn register(&mut self, title: &str, path: PathBuf) {
        self.registered.insert(title.to_string(), path);
    }

    /// Queue the title's input file for deletion.
    ///
    /// Returns false when the title was never registered, which means the
    /// job predates this watcher run and is not ours to act on.
    pub fn claim(&mut self, title: &str) -> bool {
        match self.registered.remove(title) {
            Some(path) => {
                self.pending.push(path);
                true
            }
            None => false,
        }
    }

    /// Attempt every pending deletion; failures stay queued for next tick
    pub fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for path in pending {
            if let Err(e) = transfer::delete_file(&path) {
                warn!("Deferred delete failed, will retry: {}", e);
                self.pending.push(path);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn claim_requires_registration() {
        let mut cleanup = InputCleanup::new();
        assert!(!cleanup.claim("title"));

        cleanup.register("title", PathBuf::from("/tmp/title.avi"));
        assert!(cleanup.claim("title"));
        // second claim finds nothing
        assert!(!cleanup.claim("title"));
        assert_eq!(cleanup.pending_count(), 1);
    }

    #[test]
    fn flush_deletes_claimed_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("title.avi");
        std::fs::write(&path, "x").unwrap();

        let mut cleanup = InputCleanup::new();
        cleanup.register("title", path.clone());
        cleanup.claim("title");
        cleanup.flush();

        assert!(!path.exists());
        assert_eq!(cleanup.pending_count(), 0);
    }

    #[test]
    fn failed_deletions_are_retried_later() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-there.avi");

        let mut cleanup = InputCleanup::new();
        cleanup.register("title", missing.clone());
        cleanup.claim("title");
        cleanup.flush();
        assert_eq!(cleanup.pending_count(), 1);

        // the file shows up (engine released it); retry succeeds
        std::fs::write(&missing, "x").unwrap();
        cleanup.flush();
        assert_eq!(cleanup.pending_count(), 0);
        assert!(!missing.exists());
    }
}
