//! Secret Store backends holding the bypass credential.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use keyward_crypto::Secret;
use zeroize::Zeroizing;

use crate::error::{SecretStoreError, SecretStoreResult};
use crate::traits::SecretStore;
use crate::vault::write_atomic;

/// Bypass secret kept in the OS keyring.
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
    account: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(service: &str, account: &str) -> SecretStoreResult<Entry> {
        Entry::new(service, account)
            .map_err(|e| SecretStoreError::Backend(format!("keyring init: {e}")))
    }
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn set_secret(&self, value: &Secret) -> SecretStoreResult<()> {
        let (service, account) = (self.service.clone(), self.account.clone());
        let encoded = value
            .expose()
            .map(|bytes| Zeroizing::new(general_purpose::STANDARD.encode(bytes)));

        blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match encoded {
                Some(encoded) => entry
                    .set_password(&encoded)
                    .map_err(|e| SecretStoreError::Backend(format!("store secret: {e}"))),
                None => match entry.delete_password() {
                    Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(e) => Err(SecretStoreError::Backend(format!("delete secret: {e}"))),
                },
            }
        })
        .await?;

        tracing::debug!(
            "Keyring entry {}:{} {}",
            self.service,
            self.account,
            if value.is_present() { "updated" } else { "cleared" }
        );
        Ok(())
    }

    async fn load_secret(&self) -> SecretStoreResult<Secret> {
        let (service, account) = (self.service.clone(), self.account.clone());
        blocking(move || {
            let entry = Self::entry(&service, &account)?;
            match entry.get_password() {
                Ok(encoded) => decode(&Zeroizing::new(encoded)),
                Err(keyring::Error::NoEntry) => Ok(Secret::absent()),
                Err(e) => Err(SecretStoreError::Backend(format!("load secret: {e}"))),
            }
        })
        .await
    }
}

/// Bypass secret kept in a single file (mode 0600 on unix).
///
/// Development fallback for machines without a usable keyring; the file is
/// only as safe as the account that owns it.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn set_secret(&self, value: &Secret) -> SecretStoreResult<()> {
        let path = self.path.clone();
        let encoded = value
            .expose()
            .map(|bytes| Zeroizing::new(general_purpose::STANDARD.encode(bytes)));

        blocking(move || match encoded {
            Some(encoded) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| SecretStoreError::Io(e.to_string()))?;
                }
                write_atomic(&path, encoded.as_bytes())
                    .map_err(|e| SecretStoreError::Io(e.to_string()))?;
                restrict_permissions(&path)
            }
            None => match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SecretStoreError::Io(e.to_string())),
            },
        })
        .await
    }

    async fn load_secret(&self) -> SecretStoreResult<Secret> {
        let path = self.path.clone();
        blocking(move || match std::fs::read_to_string(&path) {
            Ok(encoded) => decode(&Zeroizing::new(encoded)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Secret::absent()),
            Err(e) => Err(SecretStoreError::Io(e.to_string())),
        })
        .await
    }
}

fn decode(encoded: &str) -> SecretStoreResult<Secret> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| SecretStoreError::Encoding(e.to_string()))?;
    Ok(Secret::new(bytes))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> SecretStoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| SecretStoreError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> SecretStoreResult<()> {
    Ok(())
}

async fn blocking<T, F>(f: F) -> SecretStoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> SecretStoreResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SecretStoreError::Backend(format!("secret store task failed: {e}")))?
}
