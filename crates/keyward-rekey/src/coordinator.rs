//! The rekey protocol.
//!
//! 1. take the store's exclusive lock and check the requested current secret
//!    against the session gate
//! 2. re-key the data store
//! 3. mirror the new secret into the Secret Store, rolling step 2 back on failure
//! 4. publish the new `ProtectionState`, rotate the gate, clear auxiliary caches
//!
//! Runs are single-flight, both within the process and across processes
//! sharing the store, and are not cancellable: the protocol is spawned onto
//! the runtime, so dropping the caller's future leaves it running to a
//! terminal outcome.
//!
//! A store call that exceeds the configured timeout is not abandoned. It keeps
//! running in the background while still holding the run's locks, and the
//! outcome reports the store state as unknown.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use keyward_core::config::RekeyConfig;
use keyward_core::{ProtectionHandle, ProtectionState};
use keyward_crypto::Secret;
use keyward_store::{
    CredentialCache, DataStore, SecretStore, SecretStoreResult, StoreLock, StoreResult,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::gate::CredentialGate;
use crate::outcome::{RekeyFailure, RekeyOutcome, RekeyRequest, RekeyStep, RekeySuccess};

#[derive(Clone)]
pub struct RekeyCoordinator {
    gate: Arc<dyn CredentialGate>,
    data_store: Arc<dyn DataStore>,
    secret_store: Arc<dyn SecretStore>,
    caches: Vec<Arc<dyn CredentialCache>>,
    protection: ProtectionHandle,
    store_timeout: Option<Duration>,
    in_flight: Arc<Mutex<()>>,
}

/// Locks held for one protocol run, shared with any store call still
/// finishing in the background.
struct RunGuard {
    _in_flight: OwnedMutexGuard<()>,
    _store: StoreLock,
}

impl RekeyCoordinator {
    pub fn new(
        gate: Arc<dyn CredentialGate>,
        data_store: Arc<dyn DataStore>,
        secret_store: Arc<dyn SecretStore>,
        protection: ProtectionHandle,
    ) -> Self {
        Self {
            gate,
            data_store,
            secret_store,
            caches: Vec::new(),
            protection,
            store_timeout: None,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Register auxiliary credential material to invalidate after a successful rekey.
    pub fn with_cache(mut self, cache: Arc<dyn CredentialCache>) -> Self {
        self.caches.push(cache);
        self
    }

    /// Stop waiting for any single store call after `limit`.
    ///
    /// A timed-out call may still complete, so the run ends with
    /// `RekeyFailure::TimedOut` and no rollback is attempted.
    pub fn with_store_timeout(mut self, limit: Duration) -> Self {
        self.store_timeout = Some(limit);
        self
    }

    pub fn with_config(mut self, config: &RekeyConfig) -> Self {
        self.store_timeout = config.store_timeout();
        self
    }

    pub fn protection(&self) -> &ProtectionHandle {
        &self.protection
    }

    /// Change the data store key and mirror it into the Secret Store.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn rekey(&self, request: RekeyRequest) -> RekeyOutcome {
        let run = self.clone();
        match tokio::spawn(async move { run.run(request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Rekey task died before completion: {e}");
                RekeyOutcome::UnrecoverableFailure(RekeyFailure::Interrupted {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn run(&self, request: RekeyRequest) -> RekeyOutcome {
        let in_flight = self.in_flight.clone().lock_owned().await;
        let RekeyRequest { current, new } = request;
        let transition = describe(&current, &new);

        let store_lock = match self.data_store.lock_exclusive() {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!("Rekey refused ({transition}): {e}");
                return RekeyOutcome::UnrecoverableFailure(RekeyFailure::LockUnavailable(e));
            }
        };
        let guard = Arc::new(RunGuard {
            _in_flight: in_flight,
            _store: store_lock,
        });

        match self.gate.current_unlock_secret() {
            Some(active) if active == current => {}
            Some(_) => {
                tracing::warn!("Rekey refused ({transition}): current secret does not match session");
                return RekeyOutcome::UnrecoverableFailure(RekeyFailure::PreconditionViolated);
            }
            None => {
                tracing::warn!("Rekey refused ({transition}): session is locked");
                return RekeyOutcome::UnrecoverableFailure(RekeyFailure::PreconditionViolated);
            }
        }

        tracing::info!("Rekey started ({transition})");

        match self
            .bounded(self.change_key(&current, &new), &guard, RekeyStep::ChangeKey)
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!("Data store rekey failed ({transition}): {e}");
                return RekeyOutcome::UnrecoverableFailure(RekeyFailure::StoreRekeyFailed(e));
            }
            Err(failure) => return failure,
        }

        let mirror = match self
            .bounded(self.set_secret(&new), &guard, RekeyStep::MirrorSecret)
            .await
        {
            Ok(result) => result,
            Err(failure) => return failure,
        };

        if let Err(mirror) = mirror {
            tracing::warn!("Secret store update failed, rolling back data store: {mirror}");
            return match self
                .bounded(self.change_key(&new, &current), &guard, RekeyStep::Rollback)
                .await
            {
                Ok(Ok(())) => {
                    tracing::warn!("Rekey reverted ({transition}); store key unchanged");
                    RekeyOutcome::RevertedFailure { cause: mirror }
                }
                Ok(Err(rollback)) => {
                    tracing::error!(
                        "ROLLBACK FAILED ({transition}): data store now uses the new secret \
                         but the secret store does not; secret store error: {mirror}; \
                         rollback error: {rollback}"
                    );
                    RekeyOutcome::UnrecoverableFailure(RekeyFailure::RollbackFailed {
                        mirror,
                        rollback,
                    })
                }
                Err(failure) => failure,
            };
        }

        let state = ProtectionState::after_rekey(new.is_present());
        self.protection.replace(state.clone());
        self.gate.rotate(new);
        let cache_errors = self.clear_caches();

        tracing::info!("Rekey complete ({transition})");
        RekeyOutcome::Success(RekeySuccess {
            state,
            cache_errors,
        })
    }

    fn change_key(
        &self,
        old: &Secret,
        new: &Secret,
    ) -> impl Future<Output = StoreResult<()>> + Send + 'static {
        let store = self.data_store.clone();
        let (old, new) = (old.clone(), new.clone());
        async move { store.change_key(&old, &new).await }
    }

    fn set_secret(&self, value: &Secret) -> impl Future<Output = SecretStoreResult<()>> + Send + 'static {
        let store = self.secret_store.clone();
        let value = value.clone();
        async move { store.set_secret(&value).await }
    }

    fn clear_caches(&self) -> Vec<(String, String)> {
        let mut errors = Vec::new();
        for cache in &self.caches {
            if let Err(e) = cache.clear() {
                tracing::warn!("Failed to clear {}: {e:#}", cache.name());
                errors.push((cache.name().to_string(), format!("{e:#}")));
            }
        }
        errors
    }

    /// Await `call`, giving up after the store timeout.
    ///
    /// On timeout the call is moved to a background task holding `guard`, so
    /// no later run can start until it settles, and the run's terminal
    /// outcome is returned as `Err`.
    async fn bounded<T, E>(
        &self,
        call: impl Future<Output = Result<T, E>> + Send + 'static,
        guard: &Arc<RunGuard>,
        step: RekeyStep,
    ) -> Result<Result<T, E>, RekeyOutcome>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let Some(limit) = self.store_timeout else {
            return Ok(call.await);
        };

        let mut call = Box::pin(call);
        tokio::select! {
            result = &mut call => Ok(result),
            _ = tokio::time::sleep(limit) => {
                tracing::error!(
                    "{step} did not finish within {limit:?}; store state is unknown until it settles"
                );
                let guard = guard.clone();
                tokio::spawn(async move {
                    match call.await {
                        Ok(_) => tracing::warn!("Late {step} completed"),
                        Err(e) => tracing::warn!("Late {step} failed: {e}"),
                    }
                    drop(guard);
                });
                Err(RekeyOutcome::UnrecoverableFailure(RekeyFailure::TimedOut { step, limit }))
            }
        }
    }
}

fn describe(current: &Secret, new: &Secret) -> &'static str {
    match (current.is_present(), new.is_present()) {
        (false, true) => "set passphrase",
        (true, true) => "change passphrase",
        (true, false) => "remove passphrase",
        (false, false) => "keep unprotected",
    }
}
