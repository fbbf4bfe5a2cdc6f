pub mod cache;
pub mod error;
pub mod lock;
pub mod secret_store;
pub mod traits;
pub mod vault;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use cache::FileCredentialCache;
pub use error::{SecretStoreError, SecretStoreResult, StoreError, StoreResult};
pub use lock::StoreLock;
pub use secret_store::{FileSecretStore, KeyringSecretStore};
pub use traits::{CredentialCache, DataStore, SecretStore};
pub use vault::VaultFile;
