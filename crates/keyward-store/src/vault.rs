//! Encrypted-at-rest key/value vault file.
//!
//! File format (JSON):
//! `{ "version": 1, "body": { "kind": "plain", "entries": {..} } }` for an
//! unprotected vault, or
//! `{ "version": 1, "body": { "kind": "sealed", "salt", "nonce", "ciphertext" } }`
//! where the ciphertext is the JSON entry map sealed under the passphrase.
//!
//! Every write goes to a temp file in the same directory, is fsynced, then
//! renamed over the vault, so readers only ever see a complete old or new file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use keyward_crypto::aead::{self, SealedPayload};
use keyward_crypto::{CryptoError, Secret};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::error::{StoreError, StoreResult};
use crate::lock::StoreLock;
use crate::traits::DataStore;

pub const VAULT_VERSION: u32 = 1;

pub type VaultEntries = BTreeMap<String, String>;

#[derive(Serialize, Deserialize)]
struct VaultEnvelope {
    version: u32,
    body: VaultBody,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum VaultBody {
    Plain { entries: VaultEntries },
    Sealed(SealedPayload),
}

/// A vault on disk. Holds no key material; every call takes the secret.
#[derive(Debug)]
pub struct VaultFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl VaultFile {
    /// Create a new empty vault protected by `secret` (or unprotected if absent).
    pub async fn create(path: impl Into<PathBuf>, secret: &Secret) -> StoreResult<Self> {
        let path = path.into();
        let secret = secret.clone();
        let target = path.clone();
        blocking(move || {
            if target.exists() {
                return Err(StoreError::AlreadyExists(target.display().to_string()));
            }
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
            }
            write_vault(&target, &VaultEntries::new(), &secret)
        })
        .await?;

        tracing::info!("Created vault at {}", path.display());
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Open an existing vault. Only checks that the file exists.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file shared by every process writing this vault.
    pub fn lock_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    pub async fn is_protected(&self) -> StoreResult<bool> {
        let path = self.path.clone();
        blocking(move || Ok(matches!(read_envelope(&path)?.body, VaultBody::Sealed(_)))).await
    }

    /// Decrypt the vault with `secret` and return all entries.
    pub async fn unlock(&self, secret: &Secret) -> StoreResult<VaultEntries> {
        let path = self.path.clone();
        let secret = secret.clone();
        blocking(move || read_vault(&path, &secret)).await
    }

    pub async fn get(&self, secret: &Secret, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.unlock(secret).await?;
        Ok(entries.remove(key))
    }

    pub async fn put(&self, secret: &Secret, key: &str, value: &str) -> StoreResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.modify(secret, move |entries| {
            entries.insert(key, value);
        })
        .await
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn remove(&self, secret: &Secret, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.modify(secret, move |entries| entries.remove(&key).is_some())
            .await
    }

    async fn modify<R>(
        &self,
        secret: &Secret,
        f: impl FnOnce(&mut VaultEntries) -> R + Send + 'static,
    ) -> StoreResult<R>
    where
        R: Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let _lock = StoreLock::acquire(self.lock_path())?;
        let path = self.path.clone();
        let secret = secret.clone();
        blocking(move || {
            let mut entries = read_vault(&path, &secret)?;
            let result = f(&mut entries);
            write_vault(&path, &entries, &secret)?;
            Ok(result)
        })
        .await
    }
}

#[async_trait]
impl DataStore for VaultFile {
    /// The caller is expected to hold `lock_exclusive()` for the whole run.
    async fn change_key(&self, old: &Secret, new: &Secret) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let (old, new) = (old.clone(), new.clone());
        let protected = new.is_present();
        blocking(move || {
            let entries = read_vault(&path, &old)?;
            write_vault(&path, &entries, &new)
        })
        .await?;

        tracing::info!(
            "Vault {} re-keyed (protected: {protected})",
            self.path.display()
        );
        Ok(())
    }

    fn lock_exclusive(&self) -> StoreResult<StoreLock> {
        StoreLock::acquire(self.lock_path())
    }
}

pub(crate) async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn read_envelope(path: &Path) -> StoreResult<VaultEnvelope> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
        _ => StoreError::Io(e.to_string()),
    })?;
    let envelope: VaultEnvelope =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupted(e.to_string()))?;
    if envelope.version != VAULT_VERSION {
        return Err(StoreError::Corrupted(format!(
            "unsupported vault version {}",
            envelope.version
        )));
    }
    Ok(envelope)
}

fn read_vault(path: &Path, secret: &Secret) -> StoreResult<VaultEntries> {
    match (read_envelope(path)?.body, secret.is_present()) {
        (VaultBody::Plain { entries }, false) => Ok(entries),
        (VaultBody::Sealed(sealed), true) => {
            let plaintext = aead::open(&sealed, secret).map_err(|e| match e {
                CryptoError::DecryptionFailed => StoreError::KeyRejected,
                other => StoreError::Crypto(other),
            })?;
            serde_json::from_slice(&plaintext).map_err(|e| StoreError::Corrupted(e.to_string()))
        }
        // Protected vault opened without a passphrase, or the other way round.
        _ => Err(StoreError::KeyRejected),
    }
}

fn write_vault(path: &Path, entries: &VaultEntries, secret: &Secret) -> StoreResult<()> {
    let body = if secret.is_present() {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(entries).map_err(|e| StoreError::Corrupted(e.to_string()))?,
        );
        VaultBody::Sealed(aead::seal(&plaintext, secret)?)
    } else {
        VaultBody::Plain {
            entries: entries.clone(),
        }
    };
    let envelope = VaultEnvelope {
        version: VAULT_VERSION,
        body,
    };
    let bytes =
        serde_json::to_vec_pretty(&envelope).map_err(|e| StoreError::Corrupted(e.to_string()))?;
    write_atomic(path, &bytes)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io = |e: std::io::Error| StoreError::Io(e.to_string());

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    tmp.write_all(bytes).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error.to_string()))?;
    Ok(())
}
