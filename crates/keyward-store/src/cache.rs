use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::CredentialCache;

/// Per-device quick-unlock enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickUnlockRecord {
    pub device_id: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Quick-unlock enrollment record stored next to the vault.
///
/// Invalidated after every passphrase change so the bypass has to be
/// re-enrolled against the new secret.
#[derive(Debug, Clone)]
pub struct FileCredentialCache {
    path: PathBuf,
}

impl FileCredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn enroll(&self, device_id: &str) -> anyhow::Result<QuickUnlockRecord> {
        let record = QuickUnlockRecord {
            device_id: device_id.to_string(),
            enrolled_at: Utc::now(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&record)?)
            .with_context(|| format!("write {}", self.path.display()))?;
        Ok(record)
    }

    pub fn record(&self) -> anyhow::Result<Option<QuickUnlockRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub fn is_enrolled(&self) -> bool {
        self.path.exists()
    }
}

impl CredentialCache for FileCredentialCache {
    fn name(&self) -> &str {
        "quick-unlock enrollment"
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}
