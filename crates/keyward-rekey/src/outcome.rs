use std::fmt;
use std::time::Duration;

use keyward_core::ProtectionState;
use keyward_crypto::Secret;
use keyward_store::{SecretStoreError, StoreError};
use thiserror::Error;

/// Change the store key from `current` to `new`. Either may be absent.
///
/// The caller must already have matched `new` against the user's
/// confirmation entry.
#[derive(Debug)]
pub struct RekeyRequest {
    pub current: Secret,
    pub new: Secret,
}

impl RekeyRequest {
    pub fn new(current: Secret, new: Secret) -> Self {
        Self { current, new }
    }
}

/// Terminal result of one `rekey()` call.
#[must_use]
#[derive(Debug)]
pub enum RekeyOutcome {
    Success(RekeySuccess),
    /// The Secret Store rejected the new key and the store key was rolled
    /// back. Nothing changed; retrying is safe.
    RevertedFailure { cause: SecretStoreError },
    UnrecoverableFailure(RekeyFailure),
}

#[derive(Debug)]
pub struct RekeySuccess {
    pub state: ProtectionState,
    /// Best-effort auxiliary cache cleanup errors, `(cache name, error)`.
    pub cache_errors: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum RekeyFailure {
    /// The session is locked or holds a different secret. Nothing was touched.
    #[error("requested current secret does not match the session secret")]
    PreconditionViolated,

    /// The data store refused the key change. Nothing was persisted.
    #[error("data store rejected the key change: {0}")]
    StoreRekeyFailed(#[source] StoreError),

    /// The Secret Store update failed and so did the rollback. The data
    /// store now uses the new secret while the Secret Store does not.
    #[error(
        "secret store update failed ({mirror}) and rolling back the data store also failed: {rollback}"
    )]
    RollbackFailed {
        mirror: SecretStoreError,
        #[source]
        rollback: StoreError,
    },

    /// Another process is changing or writing the store. Nothing was touched.
    #[error("store is busy: {0}")]
    LockUnavailable(#[source] StoreError),

    /// A store call did not finish in time. It may still complete, so which
    /// secret each store holds is unknown.
    #[error("{step} did not finish within {limit:?}; store state is unknown")]
    TimedOut { step: RekeyStep, limit: Duration },

    /// The protocol task died before reaching a terminal state.
    #[error("rekey interrupted before completion: {reason}")]
    Interrupted { reason: String },
}

/// Store call of the protocol, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyStep {
    ChangeKey,
    MirrorSecret,
    Rollback,
}

impl fmt::Display for RekeyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ChangeKey => "data store key change",
            Self::MirrorSecret => "secret store update",
            Self::Rollback => "data store rollback",
        })
    }
}

/// How loudly an outcome must be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    None,
    /// "Operation failed, nothing changed, please retry."
    Retry,
    /// Store state may be inconsistent; requires a non-dismissible alert.
    Critical,
}

impl RekeyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Success(_) => Severity::None,
            Self::RevertedFailure { .. } => Severity::Retry,
            Self::UnrecoverableFailure(failure) => failure.severity(),
        }
    }

    /// True when neither store was mutated, so the caller may retry silently.
    pub fn is_silent_retry_safe(&self) -> bool {
        matches!(
            self,
            Self::UnrecoverableFailure(
                RekeyFailure::PreconditionViolated
                    | RekeyFailure::StoreRekeyFailed(_)
                    | RekeyFailure::LockUnavailable(_)
            )
        )
    }
}

impl RekeyFailure {
    pub fn severity(&self) -> Severity {
        match self {
            Self::PreconditionViolated | Self::StoreRekeyFailed(_) | Self::LockUnavailable(_) => {
                Severity::Retry
            }
            Self::RollbackFailed { .. } | Self::TimedOut { .. } | Self::Interrupted { .. } => {
                Severity::Critical
            }
        }
    }
}
