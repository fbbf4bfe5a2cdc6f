//! Process-wide passphrase protection flags.
//!
//! The rekey coordinator is the only writer; session and unlock logic read
//! snapshots through a [`ProtectionHandle`].

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionState {
    /// The data store currently requires a passphrase.
    pub is_protected: bool,
    /// The Secret Store may be used to skip the passphrase prompt.
    pub biometric_bypass_enabled: bool,
    /// The passphrase changed since the session was last unlocked.
    pub changed_since_last_unlock: bool,
    #[serde(default)]
    pub last_changed_at: Option<DateTime<Utc>>,
}

impl ProtectionState {
    /// State right after a successful rekey. Bypass is always revoked.
    pub fn after_rekey(is_protected: bool) -> Self {
        Self {
            is_protected,
            biometric_bypass_enabled: false,
            changed_since_last_unlock: true,
            last_changed_at: Some(Utc::now()),
        }
    }

    pub fn acknowledge_unlock(&mut self) {
        self.changed_since_last_unlock = false;
    }

    pub fn set_biometric_bypass(&mut self, enabled: bool) {
        self.biometric_bypass_enabled = enabled;
    }

    /// Load persisted state, or the default (unprotected) state if the file is missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Shared, clonable handle onto the session's [`ProtectionState`].
#[derive(Debug, Clone, Default)]
pub struct ProtectionHandle {
    inner: Arc<RwLock<ProtectionState>>,
}

impl ProtectionHandle {
    pub fn new(state: ProtectionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub fn snapshot(&self) -> ProtectionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the whole state in a single write.
    pub fn replace(&self, state: ProtectionState) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Apply an in-place change and return the resulting snapshot.
    pub fn update(&self, f: impl FnOnce(&mut ProtectionState)) -> ProtectionState {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        guard.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_rekey_forces_flags() {
        let state = ProtectionState::after_rekey(true);
        assert!(state.is_protected);
        assert!(!state.biometric_bypass_enabled);
        assert!(state.changed_since_last_unlock);
        assert!(state.last_changed_at.is_some());

        let cleared = ProtectionState::after_rekey(false);
        assert!(!cleared.is_protected);
    }

    #[test]
    fn acknowledge_unlock_clears_changed() {
        let mut state = ProtectionState::after_rekey(true);
        state.acknowledge_unlock();
        assert!(!state.changed_since_last_unlock);
    }

    #[test]
    fn handle_clones_share_state() {
        let handle = ProtectionHandle::default();
        let other = handle.clone();
        handle.replace(ProtectionState::after_rekey(true));
        assert!(other.snapshot().is_protected);

        let snap = other.update(|s| s.set_biometric_bypass(true));
        assert!(snap.biometric_bypass_enabled);
        assert!(handle.snapshot().biometric_bypass_enabled);
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = ProtectionState::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(state, ProtectionState::default());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("protection.json");
        let state = ProtectionState::after_rekey(true);
        state.save(&path).unwrap();
        assert_eq!(ProtectionState::load(&path).unwrap(), state);
    }
}
