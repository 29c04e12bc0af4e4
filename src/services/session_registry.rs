use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::schemas::delivery::SessionStatus;
use crate::services::assessment_client::{AssessmentBackend, CandidateCredential};
use crate::services::progress_sync::SaveOutcome;
use crate::services::session_controller::{SessionController, SessionError, SessionTiming};

/// `(test_id, sha256(token))`. Raw bearer tokens never become map keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SessionKey {
    test_id: String,
    candidate: String,
}

impl SessionKey {
    pub(crate) fn new(test_id: &str, credential: &CandidateCredential) -> Self {
        let digest = Sha256::digest(credential.token().as_bytes());
        Self { test_id: test_id.to_string(), candidate: hex::encode(digest) }
    }
}

#[derive(Debug, Error)]
pub(crate) enum RegistryError {
    #[error("too many live sessions")]
    AtCapacity,
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub(crate) struct OpenedSession {
    pub(crate) controller: Arc<SessionController>,
    pub(crate) request_fullscreen: bool,
}

type Slot = Arc<OnceCell<Arc<SessionController>>>;

/// Live controllers, one per test and candidate.
pub(crate) struct SessionRegistry {
    backend: Arc<dyn AssessmentBackend>,
    timing: SessionTiming,
    capacity: usize,
    entries: StdMutex<HashMap<SessionKey, Slot>>,
}

impl SessionRegistry {
    pub(crate) fn new(
        backend: Arc<dyn AssessmentBackend>,
        timing: SessionTiming,
        capacity: usize,
    ) -> Self {
        Self { backend, timing, capacity, entries: StdMutex::new(HashMap::new()) }
    }

    /// Returns the live controller for this candidate, loading and starting it on first
    /// use. Concurrent opens for the same key share a single load.
    pub(crate) async fn open(
        &self,
        test_id: &str,
        credential: &CandidateCredential,
    ) -> Result<OpenedSession, RegistryError> {
        let key = SessionKey::new(test_id, credential);
        let slot = {
            let mut entries = self.lock_entries();
            match entries.get(&key) {
                Some(slot) => slot.clone(),
                None => {
                    if entries.len() >= self.capacity {
                        tracing::warn!(capacity = self.capacity, "Session registry at capacity");
                        return Err(RegistryError::AtCapacity);
                    }
                    let slot: Slot = Arc::new(OnceCell::new());
                    entries.insert(key.clone(), slot.clone());
                    slot
                }
            }
        };

        let loaded = slot
            .get_or_try_init(|| {
                SessionController::open(
                    self.backend.clone(),
                    credential.clone(),
                    test_id,
                    self.timing,
                )
            })
            .await;

        let controller = match loaded {
            Ok(controller) => controller.clone(),
            Err(err) => {
                let mut entries = self.lock_entries();
                let stale = entries
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized());
                if stale {
                    entries.remove(&key);
                }
                tracing::warn!(test_id, error = %err, "Failed to open delivery session");
                return Err(err.into());
            }
        };

        let request_fullscreen = controller.start();
        Ok(OpenedSession { controller, request_fullscreen })
    }

    pub(crate) fn get(
        &self,
        test_id: &str,
        credential: &CandidateCredential,
    ) -> Option<Arc<SessionController>> {
        let key = SessionKey::new(test_id, credential);
        self.lock_entries().get(&key).and_then(|slot| slot.get().cloned())
    }

    /// Evicts the session and runs its teardown. `None` when nothing was live.
    pub(crate) async fn teardown(
        &self,
        test_id: &str,
        credential: &CandidateCredential,
    ) -> Option<SaveOutcome> {
        let key = SessionKey::new(test_id, credential);
        let slot = self.lock_entries().remove(&key)?;
        let controller = slot.get()?.clone();
        Some(controller.teardown().await)
    }

    /// Evicts sessions that finished more than `retention` ago. An attempt whose timeout
    /// submit failed counts from expiry and is torn down; reopening loads it again.
    /// Returns how many were removed.
    pub(crate) async fn prune_lapsed(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.lock_entries().retain(|_, slot| {
            let Some(controller) = slot.get() else {
                return true;
            };
            match controller.lapsed_for(now) {
                Some(age) if age >= retention => {
                    evicted.push(controller.clone());
                    false
                }
                _ => true,
            }
        });

        let pruned = evicted.len();
        for controller in evicted {
            if controller.status() != SessionStatus::Completed {
                tracing::warn!(
                    test_id = controller.test_id(),
                    "Evicting expired session that was never submitted"
                );
                controller.teardown().await;
            }
        }
        pruned
    }

    /// Tears every live session down concurrently. Used on graceful shutdown.
    pub(crate) async fn shutdown_all(&self) -> usize {
        let controllers: Vec<_> = self
            .lock_entries()
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();

        let mut teardowns = JoinSet::new();
        for controller in controllers {
            teardowns.spawn(async move { controller.teardown().await });
        }

        let mut closed = 0;
        while let Some(result) = teardowns.join_next().await {
            match result {
                Ok(_) => closed += 1,
                Err(err) => tracing::error!(error = %err, "Session teardown task failed"),
            }
        }
        closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock_entries().len()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<SessionKey, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
