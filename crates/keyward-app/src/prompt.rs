//! Passphrase entry for the CLI.
//!
//! Each value is read from its environment variable when set, otherwise
//! from an interactive prompt.

use anyhow::Result;
use keyward_crypto::Secret;
use thiserror::Error;
use zeroize::Zeroizing;

pub const PASSPHRASE_ENV: &str = "KEYWARD_PASSPHRASE";
pub const NEW_PASSPHRASE_ENV: &str = "KEYWARD_NEW_PASSPHRASE";
pub const CONFIRM_PASSPHRASE_ENV: &str = "KEYWARD_CONFIRM_PASSPHRASE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PassphraseFormError {
    #[error("passphrases do not match")]
    Mismatch,

    #[error("passphrase cannot be empty (the vault has no passphrase to remove)")]
    EmptyWhenUnprotected,
}

fn read(env_var: &str, prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(Zeroizing::new(value));
    }
    Ok(Zeroizing::new(rpassword::prompt_password(prompt)?))
}

/// The passphrase that unlocks the vault now.
pub fn current_passphrase() -> Result<Secret> {
    let entry = read(PASSPHRASE_ENV, "Passphrase: ")?;
    Ok(Secret::from_entry(&entry))
}

/// Read a new passphrase and its confirmation.
///
/// An empty entry means "remove the passphrase", which is only allowed
/// while the vault is protected.
pub fn new_passphrase(is_protected: bool) -> Result<Secret> {
    let entry = read(NEW_PASSPHRASE_ENV, "New passphrase (empty to remove): ")?;
    let confirmation = read(CONFIRM_PASSPHRASE_ENV, "Confirm new passphrase: ")?;
    Ok(validate_new(&entry, &confirmation, is_protected)?)
}

pub fn validate_new(
    entry: &str,
    confirmation: &str,
    is_protected: bool,
) -> Result<Secret, PassphraseFormError> {
    let new = Secret::from_entry(entry);
    if new != Secret::from_entry(confirmation) {
        return Err(PassphraseFormError::Mismatch);
    }
    if new.is_absent() && !is_protected {
        return Err(PassphraseFormError::EmptyWhenUnprotected);
    }
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_entries_accepted() {
        let secret = validate_new("correct horse", "correct horse", false).unwrap();
        assert_eq!(secret, Secret::new("correct horse"));
    }

    #[test]
    fn mismatch_rejected() {
        assert_eq!(
            validate_new("correct horse", "correct hose", true),
            Err(PassphraseFormError::Mismatch)
        );
    }

    #[test]
    fn empty_removes_protection_only_when_protected() {
        assert!(validate_new("", "", true).unwrap().is_absent());
        assert_eq!(
            validate_new("", "", false),
            Err(PassphraseFormError::EmptyWhenUnprotected)
        );
    }

    #[test]
    fn empty_confirmation_is_a_mismatch() {
        assert_eq!(
            validate_new("something", "", true),
            Err(PassphraseFormError::Mismatch)
        );
    }
}
