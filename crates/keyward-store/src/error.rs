use keyward_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key rejected: the supplied secret does not unlock the store")]
    KeyRejected,

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store corrupted: {0}")]
    Corrupted(String),

    #[error("Store already exists: {0}")]
    AlreadyExists(String),

    #[error("Store not found: {0}")]
    NotFound(String),

    /// Another process holds the store's exclusive lock.
    #[error("Store is locked by another process: {0}")]
    Locked(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Secret store backend error: {0}")]
    Backend(String),

    #[error("Secret store I/O error: {0}")]
    Io(String),

    #[error("Stored secret could not be decoded: {0}")]
    Encoding(String),
}

pub type SecretStoreResult<T> = Result<T, SecretStoreError>;
