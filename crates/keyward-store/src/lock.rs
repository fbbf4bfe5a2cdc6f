//! Cross-process exclusion through a lock file next to the store.
//!
//! The file is created with `create_new`, so exactly one holder wins. It
//! records the holder's pid and is removed when the guard drops. A file left
//! behind by a crashed process has to be deleted by hand.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

/// Exclusive store lock. Released on drop.
#[derive(Debug, Default)]
pub struct StoreLock {
    path: Option<PathBuf>,
}

impl StoreLock {
    /// A guard that excludes nothing, for stores without other writers.
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn acquire(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StoreError::Locked(format!(
                    "{} exists; delete it if no other keyward process is running",
                    path.display()
                )),
                _ => StoreError::Io(e.to_string()),
            })?;

        if let Err(e) = write!(file, "{}", std::process::id()) {
            let _ = std::fs::remove_file(&path);
            return Err(StoreError::Io(e.to_string()));
        }
        tracing::debug!("Acquired store lock {}", path.display());
        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to release store lock {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.lock");

        let first = StoreLock::acquire(&path).unwrap();
        assert!(matches!(StoreLock::acquire(&path), Err(StoreError::Locked(_))));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        drop(first);
        assert!(!path.exists());
        assert!(StoreLock::acquire(&path).is_ok());
    }

    #[test]
    fn unlocked_guard_touches_nothing() {
        let lock = StoreLock::unlocked();
        assert!(lock.path().is_none());
    }
}
