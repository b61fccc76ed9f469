//! Bounded per-backend job slots.
//!
//! Every backend gets a fair `tokio` semaphore with `max_concurrent_jobs`
//! permits, so waiters are served in arrival order. A job first
//! [`enqueue`](QueueManager::enqueue)s, which picks the least-loaded
//! backend and hands back a [`QueueTicket`]; the ticket then
//! [`acquire`](QueueTicket::acquire)s a [`SlotPermit`] that is held for
//! the whole upload/submit/poll/fetch span. A waiting ticket can be
//! withdrawn with [`cancel`](QueueManager::cancel).
//!
//! Bookkeeping lives behind a `std::sync::Mutex` that is never held across
//! an `.await`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use comfybot_comfyui::backend::GenerationBackend;
use comfybot_core::error::GenerationError;
use comfybot_core::types::{JobId, UserId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("job {0} was withdrawn while queued")]
    Cancelled(JobId),

    #[error("backend slots are closed")]
    Closed,
}

impl From<QueueError> for GenerationError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Cancelled(job_id) => GenerationError::Cancelled(job_id),
            QueueError::Closed => GenerationError::BackendUnavailable(err.to_string()),
        }
    }
}

/// Load of one backend, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BackendLoad {
    pub name: String,
    pub running: usize,
    pub waiting: usize,
}

struct BackendSlots {
    backend: Arc<dyn GenerationBackend>,
    semaphore: Arc<Semaphore>,
}

#[derive(Default)]
struct QueueState {
    /// Jobs holding or waiting for a slot, per backend index.
    load: Vec<usize>,
    running: Vec<usize>,
    /// Tickets not yet granted a slot.
    waiting: HashMap<JobId, CancellationToken>,
    /// Every job id holding a reservation, waiting or running.
    active: HashSet<JobId>,
    /// Jobs per user that have not finished yet.
    per_user: HashMap<UserId, usize>,
}

pub struct QueueManager {
    backends: Vec<BackendSlots>,
    max_concurrent_jobs: usize,
    max_pending_per_user: usize,
    state: Mutex<QueueState>,
}

impl QueueManager {
    pub fn new(
        backends: Vec<Arc<dyn GenerationBackend>>,
        max_concurrent_jobs: usize,
        max_pending_per_user: usize,
    ) -> Arc<Self> {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        let count = backends.len();
        let backends = backends
            .into_iter()
            .map(|backend| BackendSlots {
                backend,
                semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            })
            .collect();
        Arc::new(Self {
            backends,
            max_concurrent_jobs,
            max_pending_per_user: max_pending_per_user.max(1),
            state: Mutex::new(QueueState {
                load: vec![0; count],
                running: vec![0; count],
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn backend(&self, index: usize) -> Arc<dyn GenerationBackend> {
        Arc::clone(&self.backends[index].backend)
    }

    /// Reserve a place in the least-loaded backend's queue.
    ///
    /// Job ids must be unique among unfinished jobs; a reused id fails with
    /// `DuplicateJob`. Fails with `AdmissionRejected` when the user already has
    /// `max_pending_per_user` unfinished jobs, and with
    /// `BackendUnavailable` when no backend is configured.
    pub fn enqueue(
        self: &Arc<Self>,
        job_id: JobId,
        user_id: UserId,
    ) -> Result<QueueTicket, GenerationError> {
        let mut state = self.lock();

        if state.active.contains(&job_id) {
            return Err(GenerationError::DuplicateJob(job_id));
        }

        let pending = state.per_user.get(&user_id).copied().unwrap_or(0);
        if pending >= self.max_pending_per_user {
            return Err(GenerationError::AdmissionRejected(format!(
                "You already have {pending} jobs in progress (limit {}). Wait for one to finish.",
                self.max_pending_per_user
            )));
        }

        let backend = state
            .load
            .iter()
            .enumerate()
            .min_by_key(|(index, load)| (**load, *index))
            .map(|(index, _)| index)
            .ok_or_else(|| GenerationError::BackendUnavailable("no backend configured".into()))?;

        let position = state.load[backend];
        state.load[backend] += 1;
        *state.per_user.entry(user_id).or_default() += 1;
        let cancel = CancellationToken::new();
        state.waiting.insert(job_id, cancel.clone());
        state.active.insert(job_id);
        drop(state);

        tracing::debug!(%job_id, user_id, backend, position, "Job enqueued");

        Ok(QueueTicket {
            reservation: Reservation {
                manager: Arc::clone(self),
                job_id,
                user_id,
                backend,
                running: false,
            },
            position,
            cancel,
        })
    }

    /// Withdraw a job that is still waiting for a slot.
    ///
    /// Returns `false` when the job is unknown or already running.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let token = self.lock().waiting.remove(&job_id);
        match token {
            Some(token) => {
                token.cancel();
                tracing::info!(%job_id, "Queued job withdrawn");
                true
            }
            None => false,
        }
    }

    pub fn is_waiting(&self, job_id: JobId) -> bool {
        self.lock().waiting.contains_key(&job_id)
    }

    pub fn loads(&self) -> Vec<BackendLoad> {
        let state = self.lock();
        self.backends
            .iter()
            .enumerate()
            .map(|(i, slots)| BackendLoad {
                name: slots.backend.name().to_string(),
                running: state.running[i],
                waiting: state.load[i] - state.running[i],
            })
            .collect()
    }

    /// Unfinished jobs for `user_id`.
    pub fn pending_for(&self, user_id: UserId) -> usize {
        self.lock().per_user.get(&user_id).copied().unwrap_or(0)
    }
}

/// Undoes an [`enqueue`](QueueManager::enqueue) when dropped.
struct Reservation {
    manager: Arc<QueueManager>,
    job_id: JobId,
    user_id: UserId,
    backend: usize,
    running: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut state = self.manager.lock();
        state.waiting.remove(&self.job_id);
        state.active.remove(&self.job_id);
        state.load[self.backend] = state.load[self.backend].saturating_sub(1);
        if self.running {
            state.running[self.backend] = state.running[self.backend].saturating_sub(1);
        }
        if let Some(count) = state.per_user.get_mut(&self.user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.per_user.remove(&self.user_id);
            }
        }
    }
}

/// A reserved place in a backend queue.
pub struct QueueTicket {
    reservation: Reservation,
    position: usize,
    cancel: CancellationToken,
}

impl QueueTicket {
    pub fn job_id(&self) -> JobId {
        self.reservation.job_id
    }

    pub fn backend(&self) -> usize {
        self.reservation.backend
    }

    /// Jobs already running or waiting on this backend when enqueued.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Wait for a slot. Resolves to [`QueueError::Cancelled`] if the job
    /// is withdrawn first.
    pub async fn acquire(self) -> Result<SlotPermit, QueueError> {
        let QueueTicket {
            mut reservation,
            cancel,
            ..
        } = self;
        let job_id = reservation.job_id;
        let semaphore = Arc::clone(&reservation.manager.backends[reservation.backend].semaphore);

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled(job_id)),
            permit = semaphore.acquire_owned() => permit.map_err(|_| QueueError::Closed)?,
        };

        // A cancel that raced the grant still wins.
        {
            let mut state = reservation.manager.lock();
            if state.waiting.remove(&job_id).is_none() {
                return Err(QueueError::Cancelled(job_id));
            }
            state.running[reservation.backend] += 1;
        }
        reservation.running = true;

        tracing::debug!(%job_id, backend = reservation.backend, "Backend slot acquired");
        Ok(SlotPermit {
            _permit: permit,
            reservation,
        })
    }
}

impl fmt::Debug for QueueTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTicket")
            .field("job_id", &self.reservation.job_id)
            .field("backend", &self.reservation.backend)
            .field("position", &self.position)
            .finish()
    }
}

/// A held backend slot. Dropping it frees the slot for the next waiter.
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
    reservation: Reservation,
}

impl SlotPermit {
    pub fn backend(&self) -> usize {
        self.reservation.backend
    }

    pub fn job_id(&self) -> JobId {
        self.reservation.job_id
    }
}

impl fmt::Debug for SlotPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPermit")
            .field("job_id", &self.reservation.job_id)
            .field("backend", &self.reservation.backend)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
