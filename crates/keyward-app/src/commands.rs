use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use keyward_core::config::AppConfig;
use keyward_core::{ProtectionHandle, ProtectionState};
use keyward_crypto::Secret;
use keyward_rekey::{
    RekeyCoordinator, RekeyFailure, RekeyOutcome, RekeyRequest, SessionGate, Severity,
};
use keyward_store::{CredentialCache, SecretStore, StoreError, VaultFile};

use crate::prompt;
use crate::setup::{self, open_vault, unlock_session};

/// Exit code for outcomes that may have left the vault and the secret store disagreeing.
pub const EXIT_CRITICAL: u8 = 3;

pub async fn init(config: &AppConfig, protect: bool) -> Result<()> {
    let secret = if protect {
        prompt::new_passphrase(false)?
    } else {
        Secret::absent()
    };

    let vault = VaultFile::create(config.data.vault_path(), &secret).await?;
    if secret.is_present() {
        if let Err(e) = setup::secret_store(config).set_secret(&secret).await {
            tracing::warn!("Could not mirror passphrase into the secret store: {e}");
        }
    }

    let state = ProtectionState {
        is_protected: secret.is_present(),
        ..ProtectionState::default()
    };
    setup::save_state(config, &state)?;

    println!("Initialized vault at {}", vault.path().display());
    Ok(())
}

pub fn status(config: &AppConfig) -> Result<()> {
    let state = setup::load_state(config)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

pub async fn put(config: &AppConfig, key: String, value: String) -> Result<()> {
    let vault = open_vault(config)?;
    let secret = unlock_session(&vault).await?;
    vault.put(&secret, &key, &value).await?;
    println!("Stored {key}");
    Ok(())
}

pub async fn get(config: &AppConfig, key: String) -> Result<()> {
    let vault = open_vault(config)?;
    let secret = unlock_session(&vault).await?;
    match vault.get(&secret, &key).await? {
        Some(value) => println!("{value}"),
        None => anyhow::bail!("no entry named {key}"),
    }
    Ok(())
}

pub async fn list(config: &AppConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let secret = unlock_session(&vault).await?;
    let entries = vault.unlock(&secret).await?;
    for key in entries.keys() {
        println!("{key}");
    }
    println!("({} entries)", entries.len());
    Ok(())
}

pub async fn remove(config: &AppConfig, key: String) -> Result<()> {
    let vault = open_vault(config)?;
    let secret = unlock_session(&vault).await?;
    if !vault.remove(&secret, &key).await? {
        anyhow::bail!("no entry named {key}");
    }
    println!("Removed {key}");
    Ok(())
}

pub async fn passphrase(config: &AppConfig) -> Result<ExitCode> {
    let vault = open_vault(config)?;
    let state = setup::load_state(config)?;
    let current = unlock_session(&vault).await?;
    let new = prompt::new_passphrase(vault.is_protected().await?)?;
    let removing = new.is_absent();

    let protection = ProtectionHandle::new(state);
    let coordinator = RekeyCoordinator::new(
        Arc::new(SessionGate::unlocked(current.clone())),
        Arc::new(vault),
        setup::secret_store(config),
        protection.clone(),
    )
    .with_cache(Arc::new(setup::quick_unlock(config)))
    .with_config(&config.rekey);

    let outcome = coordinator.rekey(RekeyRequest::new(current, new)).await;
    let (mut out, mut err) = (std::io::stdout(), std::io::stderr());
    let code = report(&outcome, &mut err)?;
    if outcome.is_success() {
        announce(config, &protection.snapshot(), removing, &mut out, &mut err)?;
    }
    Ok(ExitCode::from(code))
}

/// Print the outcome's diagnostics and return the process exit code.
fn report(outcome: &RekeyOutcome, err: &mut dyn Write) -> io::Result<u8> {
    match outcome {
        RekeyOutcome::Success(success) => {
            for (cache, error) in &success.cache_errors {
                writeln!(err, "warning: could not clear {cache}: {error}")?;
            }
        }
        RekeyOutcome::RevertedFailure { cause } => {
            writeln!(err, "Operation failed, nothing changed, please retry ({cause})")?;
        }
        RekeyOutcome::UnrecoverableFailure(failure) if failure.severity() == Severity::Retry => {
            writeln!(err, "Error: {failure}")?;
        }
        RekeyOutcome::UnrecoverableFailure(failure) => critical_banner(failure, err)?,
    }

    Ok(match outcome.severity() {
        Severity::None => 0,
        Severity::Retry => 1,
        Severity::Critical => EXIT_CRITICAL,
    })
}

fn critical_banner(failure: &RekeyFailure, err: &mut dyn Write) -> io::Result<()> {
    writeln!(err, "==================================================================")?;
    writeln!(err, "CRITICAL: the vault passphrase may be in an inconsistent state.")?;
    writeln!(err, "{failure}")?;
    match failure {
        RekeyFailure::RollbackFailed { .. } => {
            writeln!(err, "The vault now opens with the NEW passphrase, but the secret store")?;
            writeln!(err, "still holds the old one. Unlock with the new passphrase and run")?;
            writeln!(err, "`keyward bypass enable` to resynchronize.")?;
        }
        RekeyFailure::TimedOut { .. } => {
            writeln!(err, "The store call may still complete after this process exits.")?;
            writeln!(err, "Wait a moment, then try unlocking with both the old and the new")?;
            writeln!(err, "passphrase before changing it again.")?;
        }
        _ => writeln!(err, "Try unlocking with both the old and the new passphrase.")?,
    }
    writeln!(err, "==================================================================")
}

/// Tell the user the passphrase changed, then persist the new protection state.
///
/// The vault is already re-keyed at this point, so a failure to save the state
/// file is only a warning.
fn announce(
    config: &AppConfig,
    state: &ProtectionState,
    removing: bool,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<()> {
    if removing {
        writeln!(out, "Passphrase removed")?;
    } else {
        writeln!(out, "Passphrase updated")?;
    }
    if let Err(e) = setup::save_state(config, state) {
        tracing::warn!("Protection state not saved after rekey: {e:#}");
        writeln!(
            err,
            "warning: {e:#}; run `keyward status` and `keyward unlock` to refresh it"
        )?;
    }
    Ok(())
}

pub async fn bypass_enable(config: &AppConfig) -> Result<()> {
    let vault = open_vault(config)?;
    if !vault.is_protected().await? {
        anyhow::bail!("the vault has no passphrase to bypass");
    }
    let secret = unlock_session(&vault).await?;

    setup::secret_store(config).set_secret(&secret).await?;
    let device_id = setup::load_or_create_device_id(config)?;
    setup::quick_unlock(config).enroll(&device_id)?;

    let mut state = setup::load_state(config)?;
    state.set_biometric_bypass(true);
    setup::save_state(config, &state)?;

    println!("Bypass enabled for device {device_id}");
    Ok(())
}

pub fn bypass_disable(config: &AppConfig) -> Result<()> {
    setup::quick_unlock(config).clear()?;
    let mut state = setup::load_state(config)?;
    state.set_biometric_bypass(false);
    setup::save_state(config, &state)?;

    println!("Bypass disabled");
    Ok(())
}

pub async fn unlock(config: &AppConfig, bypass: bool) -> Result<()> {
    let vault = open_vault(config)?;
    let mut state = setup::load_state(config)?;

    let secret = if bypass {
        if !state.biometric_bypass_enabled || !setup::quick_unlock(config).is_enrolled() {
            anyhow::bail!("bypass is not enabled; unlock with the passphrase");
        }
        setup::secret_store(config).load_secret().await?
    } else if vault.is_protected().await? {
        prompt::current_passphrase()?
    } else {
        Secret::absent()
    };

    let entries = match vault.unlock(&secret).await {
        Ok(entries) => entries,
        Err(StoreError::KeyRejected) if bypass => {
            anyhow::bail!("the stored bypass secret no longer opens the vault; unlock with the passphrase")
        }
        Err(StoreError::KeyRejected) => anyhow::bail!("incorrect passphrase"),
        Err(e) => return Err(e.into()),
    };

    if state.changed_since_last_unlock {
        println!("Note: the passphrase changed since the last unlock");
    }
    state.acknowledge_unlock();
    setup::save_state(config, &state)?;

    println!("Unlocked ({} entries)", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keyward_rekey::{RekeyStep, RekeySuccess};
    use keyward_store::SecretStoreError;

    use super::*;

    fn reported(outcome: RekeyOutcome) -> (u8, String) {
        let mut err = Vec::new();
        let code = report(&outcome, &mut err).unwrap();
        (code, String::from_utf8(err).unwrap())
    }

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.data.dir = dir.path().display().to_string();
        config
    }

    #[test]
    fn failed_rollback_is_critical() {
        let (code, err) = reported(RekeyOutcome::UnrecoverableFailure(
            RekeyFailure::RollbackFailed {
                mirror: SecretStoreError::Backend("keyring locked".into()),
                rollback: StoreError::Io("read-only filesystem".into()),
            },
        ));
        assert_eq!(code, EXIT_CRITICAL);
        assert!(err.contains("CRITICAL"));
        assert!(err.contains("opens with the NEW passphrase"));
    }

    #[test]
    fn interrupted_run_is_critical() {
        let (code, err) = reported(RekeyOutcome::UnrecoverableFailure(
            RekeyFailure::Interrupted {
                reason: "task panicked".into(),
            },
        ));
        assert_eq!(code, EXIT_CRITICAL);
        assert!(err.contains("CRITICAL"));
        assert!(err.contains("both the old and the new passphrase"));
    }

    #[test]
    fn timed_out_store_call_is_critical() {
        let (code, err) = reported(RekeyOutcome::UnrecoverableFailure(RekeyFailure::TimedOut {
            step: RekeyStep::ChangeKey,
            limit: Duration::from_secs(30),
        }));
        assert_eq!(code, EXIT_CRITICAL);
        assert!(err.contains("CRITICAL"));
        assert!(err.contains("may still complete"));
    }

    #[test]
    fn retryable_failures_exit_one_without_banner() {
        let (code, err) = reported(RekeyOutcome::RevertedFailure {
            cause: SecretStoreError::Backend("keyring locked".into()),
        });
        assert_eq!(code, 1);
        assert!(err.contains("nothing changed"));
        assert!(!err.contains("CRITICAL"));

        let (code, err) = reported(RekeyOutcome::UnrecoverableFailure(
            RekeyFailure::LockUnavailable(StoreError::Locked("keyward.vault.lock exists".into())),
        ));
        assert_eq!(code, 1);
        assert!(err.contains("busy"));
        assert!(!err.contains("CRITICAL"));
    }

    #[test]
    fn success_warns_about_cache_errors() {
        let (code, err) = reported(RekeyOutcome::Success(RekeySuccess {
            state: ProtectionState::after_rekey(true),
            cache_errors: vec![("quick-unlock".into(), "permission denied".into())],
        }));
        assert_eq!(code, 0);
        assert!(err.contains("could not clear quick-unlock"));
    }

    #[test]
    fn announce_saves_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let (mut out, mut err) = (Vec::new(), Vec::new());

        announce(&config, &ProtectionState::after_rekey(true), false, &mut out, &mut err).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Passphrase updated\n");
        assert!(err.is_empty());
        assert!(setup::load_state(&config).unwrap().is_protected);
    }

    #[test]
    fn announce_reports_change_even_if_state_cannot_be_saved() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        std::fs::create_dir_all(config.data.state_path()).unwrap();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        announce(&config, &ProtectionState::after_rekey(false), true, &mut out, &mut err).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Passphrase removed\n");
        let err = String::from_utf8(err).unwrap();
        assert!(err.starts_with("warning:"));
        assert!(err.contains("failed to write protection state"));
    }
}
