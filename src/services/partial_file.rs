//! Removal of files whose write never finished.

use std::{io::ErrorKind, path::Path};
use tracing::{debug, error, warn};

/// Removes `path` on drop unless disarmed. Covers both the error returns of
/// a write and a write whose future is dropped part way through.
pub(crate) struct PartialFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialFile<'a> {
    /// Guard a file that was just created at `path`.
    pub(crate) fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    /// The write completed; keep the file.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        debug!(path = %self.path.display(), "starting cleanup of partially written file");
        match std::fs::remove_file(self.path) {
            Ok(()) => debug!(path = %self.path.display(), "finished cleanup successfully"),
            Err(err) if err.kind() == ErrorKind::NotFound => warn!(
                path = %self.path.display(),
                "file that's supposed to be cleaned up doesn't exist anymore"
            ),
            Err(err) => error!(
                path = %self.path.display(),
                error = %err,
                "failed to cleanup file, it might still exist on disk"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn armed_guard_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial");
        std::fs::write(&path, b"half").unwrap();
        drop(PartialFile::new(&path));
        assert!(!path.exists());
    }

    #[test]
    fn disarmed_guard_keeps_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("complete");
        std::fs::write(&path, b"whole").unwrap();
        PartialFile::new(&path).disarm();
        assert!(path.exists());
    }
}
