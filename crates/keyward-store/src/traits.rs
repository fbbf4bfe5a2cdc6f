use async_trait::async_trait;
use keyward_crypto::Secret;

use crate::error::{SecretStoreResult, StoreResult};
use crate::lock::StoreLock;

/// Encrypted-at-rest container whose key the rekey protocol changes.
///
/// Uses `async-trait` for object safety (`dyn DataStore`).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Replace the store key `old` with `new`.
    ///
    /// Must be atomic: on error the store is still keyed with `old`.
    /// Must reject with `StoreError::KeyRejected` when `old` does not
    /// open the store. Either side may be absent (unprotected store).
    async fn change_key(&self, old: &Secret, new: &Secret) -> StoreResult<()>;

    /// Exclude other processes from the store for a whole rekey run.
    ///
    /// Fails with `StoreError::Locked` while someone else holds it. Stores
    /// with no writers outside this process keep the default.
    fn lock_exclusive(&self) -> StoreResult<StoreLock> {
        Ok(StoreLock::unlocked())
    }
}

/// Secure holder for the bypass credential (biometric / auto-unlock).
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Overwrite the stored secret, or delete it when `value` is absent.
    /// Deleting a missing entry is not an error.
    async fn set_secret(&self, value: &Secret) -> SecretStoreResult<()>;

    /// Read the stored secret; absent when nothing is stored.
    async fn load_secret(&self) -> SecretStoreResult<Secret>;
}

/// Auxiliary credential material held outside the Secret Store that must
/// be invalidated after the passphrase changes.
pub trait CredentialCache: Send + Sync {
    fn name(&self) -> &str;

    fn clear(&self) -> anyhow::Result<()>;
}
