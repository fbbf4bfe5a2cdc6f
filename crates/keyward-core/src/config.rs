use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub secret_store: SecretStoreConfig,
    #[serde(default)]
    pub rekey: RekeyConfig,
}

/// Where the vault, its protection state and the quick-unlock record live.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: String,
}

fn default_data_dir() -> String {
    "data".into()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

impl DataConfig {
    pub fn vault_path(&self) -> PathBuf {
        Path::new(&self.dir).join("keyward.vault")
    }

    pub fn state_path(&self) -> PathBuf {
        Path::new(&self.dir).join("protection.json")
    }

    pub fn quick_unlock_path(&self) -> PathBuf {
        Path::new(&self.dir).join("quick-unlock.json")
    }

    pub fn device_id_path(&self) -> PathBuf {
        Path::new(&self.dir).join("device_id")
    }

    /// Used only by the `file` secret store backend.
    pub fn bypass_secret_path(&self) -> PathBuf {
        Path::new(&self.dir).join("bypass.secret")
    }
}

/// Which backend holds the bypass secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    /// OS keyring (Secret Service, Keychain, Credential Manager).
    Keyring,
    /// Plain file in the data directory. Development fallback only.
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretStoreConfig {
    #[serde(default = "default_backend")]
    pub backend: SecretBackend,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_account")]
    pub account: String,
}

fn default_backend() -> SecretBackend {
    SecretBackend::Keyring
}
fn default_service() -> String {
    "keyward".into()
}
fn default_account() -> String {
    "vault-passphrase".into()
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            service: default_service(),
            account: default_account(),
        }
    }
}

/// Rekey protocol tuning.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RekeyConfig {
    /// Upper bound for each individual store call (0 = no timeout).
    #[serde(default)]
    pub store_timeout_secs: u64,
}

impl RekeyConfig {
    pub fn store_timeout(&self) -> Option<Duration> {
        (self.store_timeout_secs > 0).then(|| Duration::from_secs(self.store_timeout_secs))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback chain: explicit path → ./config/default.toml → hardcoded defaults.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Self {
        if let Some(path) = explicit_path {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {e}", path.display());
                }
            }
        }

        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load default config: {e}");
                }
            }
        }

        tracing::info!("Using hardcoded default configuration");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.data.dir, "data");
        assert_eq!(cfg.secret_store.backend, SecretBackend::Keyring);
        assert_eq!(cfg.secret_store.service, "keyward");
        assert!(cfg.rekey.store_timeout().is_none());
    }

    #[test]
    fn parses_all_sections() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [data]
            dir = "/var/lib/keyward"

            [secret_store]
            backend = "file"
            account = "alice"

            [rekey]
            store_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.data.vault_path(), Path::new("/var/lib/keyward/keyward.vault"));
        assert_eq!(cfg.secret_store.backend, SecretBackend::File);
        assert_eq!(cfg.secret_store.account, "alice");
        assert_eq!(cfg.secret_store.service, "keyward");
        assert_eq!(cfg.rekey.store_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn shipped_config_waits_for_store_calls() {
        let cfg: AppConfig = toml::from_str(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(cfg.secret_store.backend, SecretBackend::Keyring);
        assert!(cfg.rekey.store_timeout().is_none());
    }

    #[test]
    fn unknown_backend_rejected() {
        let result: Result<AppConfig, _> = toml::from_str("[secret_store]\nbackend = \"vault\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn load_or_default_falls_back_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[data\n").unwrap();
        let cfg = AppConfig::load_or_default(Some(&path));
        assert_eq!(cfg.data.dir, "data");
    }
}
