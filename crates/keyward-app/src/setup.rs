use std::sync::Arc;

use anyhow::{Context, Result};
use keyward_core::config::{AppConfig, SecretBackend};
use keyward_core::ProtectionState;
use keyward_crypto::Secret;
use keyward_store::{
    FileCredentialCache, FileSecretStore, KeyringSecretStore, SecretStore, StoreError, VaultFile,
};

use crate::prompt;

pub fn open_vault(config: &AppConfig) -> Result<VaultFile> {
    VaultFile::open(config.data.vault_path())
        .context("no vault found; run `keyward init` first")
}

pub fn secret_store(config: &AppConfig) -> Arc<dyn SecretStore> {
    match config.secret_store.backend {
        SecretBackend::Keyring => Arc::new(KeyringSecretStore::new(
            config.secret_store.service.clone(),
            config.secret_store.account.clone(),
        )),
        SecretBackend::File => {
            tracing::warn!("Using the file secret store backend; the bypass secret is stored unencrypted");
            Arc::new(FileSecretStore::new(config.data.bypass_secret_path()))
        }
    }
}

pub fn quick_unlock(config: &AppConfig) -> FileCredentialCache {
    FileCredentialCache::new(config.data.quick_unlock_path())
}

pub fn load_state(config: &AppConfig) -> Result<ProtectionState> {
    ProtectionState::load(&config.data.state_path()).context("failed to read protection state")
}

pub fn save_state(config: &AppConfig, state: &ProtectionState) -> Result<()> {
    state
        .save(&config.data.state_path())
        .context("failed to write protection state")
}

/// Prompt for the passphrase (if the vault has one) and check it opens the vault.
pub async fn unlock_session(vault: &VaultFile) -> Result<Secret> {
    let secret = if vault.is_protected().await? {
        prompt::current_passphrase()?
    } else {
        Secret::absent()
    };
    verify(vault, &secret).await?;
    Ok(secret)
}

pub async fn verify(vault: &VaultFile, secret: &Secret) -> Result<()> {
    match vault.unlock(secret).await {
        Ok(_) => Ok(()),
        Err(StoreError::KeyRejected) => anyhow::bail!("incorrect passphrase"),
        Err(e) => Err(e.into()),
    }
}

/// Load or create a stable device ID for this machine.
pub fn load_or_create_device_id(config: &AppConfig) -> Result<String> {
    let path = config.data.device_id_path();
    if path.exists() {
        Ok(std::fs::read_to_string(&path)?.trim().to_string())
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let id = uuid::Uuid::new_v4().to_string();
        std::fs::write(&path, &id)?;
        tracing::info!("Generated new device ID: {id}");
        Ok(id)
    }
}
