//! In-memory collaborators for testing the rekey protocol.
//!
//! Each mock counts calls and can be scripted per call: pass, fail, stall
//! (apply the change on a blocking thread after a delay, like the real
//! stores, so the work lands even if the caller stops waiting) or panic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keyward_crypto::Secret;

use crate::error::{SecretStoreError, SecretStoreResult, StoreError, StoreResult};
use crate::lock::StoreLock;
use crate::traits::{CredentialCache, DataStore, SecretStore};

enum Step<E> {
    Pass,
    Fail(E),
    Stall(Duration),
    Panic,
}

/// In-memory DataStore that tracks its active key.
pub struct MockDataStore {
    active: Arc<Mutex<Secret>>,
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step<StoreError>>>,
    delay: Option<Duration>,
    locked: AtomicBool,
}

impl MockDataStore {
    pub fn new(initial_key: Secret) -> Self {
        Self {
            active: Arc::new(Mutex::new(initial_key)),
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            locked: AtomicBool::new(false),
        }
    }

    /// Sleep this long inside every `change_key` before applying it.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Let the next scripted call behave normally.
    pub fn pass_next(&self) {
        self.script.lock().unwrap().push_back(Step::Pass);
    }

    /// Fail the next scripted call with `err`, leaving the key unchanged.
    pub fn fail_next(&self, err: StoreError) {
        self.script.lock().unwrap().push_back(Step::Fail(err));
    }

    /// Apply the next scripted call on a blocking thread after `delay`.
    /// The change lands even if the caller gives up waiting.
    pub fn stall_next(&self, delay: Duration) {
        self.script.lock().unwrap().push_back(Step::Stall(delay));
    }

    pub fn panic_next(&self) {
        self.script.lock().unwrap().push_back(Step::Panic);
    }

    /// Make `lock_exclusive` fail as if another process held the store.
    pub fn hold_lock_elsewhere(&self, held: bool) {
        self.locked.store(held, Ordering::SeqCst);
    }

    pub fn change_key_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn active_key(&self) -> Secret {
        self.active.lock().unwrap().clone()
    }

    /// Succeeds only with the active key.
    pub fn unlock(&self, secret: &Secret) -> StoreResult<()> {
        if *self.active.lock().unwrap() == *secret {
            Ok(())
        } else {
            Err(StoreError::KeyRejected)
        }
    }
}

fn apply_change(active: &Mutex<Secret>, old: &Secret, new: &Secret) -> StoreResult<()> {
    let mut active = active.lock().unwrap();
    if *active != *old {
        return Err(StoreError::KeyRejected);
    }
    *active = new.clone();
    Ok(())
}

#[async_trait]
impl DataStore for MockDataStore {
    async fn change_key(&self, old: &Secret, new: &Secret) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Panic) => panic!("data store crashed mid-call"),
            Some(Step::Stall(delay)) => {
                let active = self.active.clone();
                let (old, new) = (old.clone(), new.clone());
                tokio::task::spawn_blocking(move || {
                    std::thread::sleep(delay);
                    apply_change(&active, &old, &new)
                })
                .await
                .map_err(|e| StoreError::Task(e.to_string()))?
            }
            Some(Step::Pass) | None => apply_change(&self.active, old, new),
        }
    }

    fn lock_exclusive(&self) -> StoreResult<StoreLock> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(StoreError::Locked("mock store".into()));
        }
        Ok(StoreLock::unlocked())
    }
}

/// In-memory SecretStore.
pub struct MockSecretStore {
    stored: Arc<Mutex<Secret>>,
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step<SecretStoreError>>>,
    delay: Option<Duration>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self {
            stored: Arc::new(Mutex::new(Secret::absent())),
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next(&self, err: SecretStoreError) {
        self.script.lock().unwrap().push_back(Step::Fail(err));
    }

    /// Store the next value on a blocking thread after `delay`.
    pub fn stall_next(&self, delay: Duration) {
        self.script.lock().unwrap().push_back(Step::Stall(delay));
    }

    pub fn set_secret_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Secret {
        self.stored.lock().unwrap().clone()
    }
}

impl Default for MockSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn set_secret(&self, value: &Secret) -> SecretStoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Panic) => panic!("secret store crashed mid-call"),
            Some(Step::Stall(delay)) => {
                let stored = self.stored.clone();
                let value = value.clone();
                tokio::task::spawn_blocking(move || {
                    std::thread::sleep(delay);
                    *stored.lock().unwrap() = value;
                })
                .await
                .map_err(|e| SecretStoreError::Backend(e.to_string()))
            }
            Some(Step::Pass) | None => {
                *self.stored.lock().unwrap() = value.clone();
                Ok(())
            }
        }
    }

    async fn load_secret(&self) -> SecretStoreResult<Secret> {
        Ok(self.stored())
    }
}

/// CredentialCache that counts clears and can be made to fail.
pub struct MockCredentialCache {
    name: String,
    clears: AtomicUsize,
    failing: bool,
}

impl MockCredentialCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clears: AtomicUsize::new(0),
            failing: false,
        }
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            failing: true,
            ..Self::new(name)
        }
    }

    pub fn clear_calls(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl CredentialCache for MockCredentialCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            anyhow::bail!("{} unavailable", self.name);
        }
        Ok(())
    }
}
