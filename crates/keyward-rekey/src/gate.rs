//! The session's in-memory unlock secret.

use std::sync::{PoisonError, RwLock};

use keyward_crypto::Secret;

/// Source of the secret that currently unlocks the data store.
pub trait CredentialGate: Send + Sync {
    /// Snapshot of the in-session secret. `None` while the session is locked.
    fn current_unlock_secret(&self) -> Option<Secret>;

    /// Replace the in-session secret after the store key changed.
    fn rotate(&self, secret: Secret);
}

/// In-memory gate tied to one unlocked session.
#[derive(Debug, Default)]
pub struct SessionGate {
    secret: RwLock<Option<Secret>>,
}

impl SessionGate {
    pub fn locked() -> Self {
        Self::default()
    }

    pub fn unlocked(secret: Secret) -> Self {
        Self {
            secret: RwLock::new(Some(secret)),
        }
    }

    /// Start a session with `secret`. The caller has already verified it
    /// against the store.
    pub fn unlock(&self, secret: Secret) {
        *self.secret.write().unwrap_or_else(PoisonError::into_inner) = Some(secret);
    }

    /// End the session; the held secret is dropped and zeroed.
    pub fn lock(&self) {
        self.secret
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_unlocked(&self) -> bool {
        self.secret
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl CredentialGate for SessionGate {
    fn current_unlock_secret(&self) -> Option<Secret> {
        self.secret
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn rotate(&self, secret: Secret) {
        self.unlock(secret);
    }
}
