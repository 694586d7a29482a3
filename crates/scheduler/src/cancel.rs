//! Cooperative cancellation
//!
//! A running job checks its token between units of work (pages of an export,
//! bands of a render) and stops early once it is cancelled. The registry maps
//! job ids to tokens so the control thread can cancel by id.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::JobId;

/// Cancellation token for cooperative job cancellation
///
/// Clones share the same flag.
///
/// # Example
///
/// ```
/// use pagemark_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the non-cancelled state
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of tokens for jobs that are queued or running
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    /// Register a job and return the token handed to its worker
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(job_id, token.clone());
        token
    }

    /// Cancel a job by id. Returns `true` if the job was registered.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let tokens = self.tokens.lock().unwrap();
        match tokens.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel several jobs; returns how many were registered
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        let tokens = self.tokens.lock().unwrap();
        job_ids
            .iter()
            .filter_map(|job_id| tokens.get(job_id))
            .inspect(|token| token.cancel())
            .count()
    }

    /// Cancel every registered job, queued or running
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock().unwrap();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Forget a finished or dequeued job
    pub fn unregister(&self, job_id: JobId) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.remove(&job_id).is_some()
    }

    pub fn get(&self, job_id: JobId) -> Option<CancellationToken> {
        let tokens = self.tokens.lock().unwrap();
        tokens.get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().unwrap().is_empty()
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
