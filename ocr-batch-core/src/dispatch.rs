//! Bounded-retry, bounded-concurrency wrapper around one provider call.
//!
//! A [`Dispatcher`] owns the only shared mutable state of a batch: the
//! semaphore that caps how many calls run at once. Cloning a dispatcher shares
//! that semaphore. Each attempt holds a permit only while the call executes;
//! backoff sleeps happen without one.
//!
//! `dispatch` never returns an error: the caller gets a [`DispatchOutcome`]
//! and decides what a failure means for the batch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::DispatchPolicy;
use crate::contract::{ErrorKind, InferenceResponse, ProviderError};

/// Result of dispatching one task. `elapsed_ms` always covers the last
/// attempt only, measured from permit acquisition.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Success {
        response: InferenceResponse,
        elapsed_ms: u64,
        attempts: u32,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        attempts: u32,
        elapsed_ms: u64,
    },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Success { attempts, .. }
            | DispatchOutcome::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            DispatchOutcome::Success { elapsed_ms, .. }
            | DispatchOutcome::Failure { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

impl DispatchPolicy {
    /// Attempt budget; a configured zero still makes one attempt.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after the `attempt`-th failure (1-indexed): `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    policy: DispatchPolicy,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(policy: DispatchPolicy) -> Self {
        let permits = Arc::new(Semaphore::new(policy.max_concurrent.max(1)));
        Self { policy, permits }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `call` until it succeeds, fails permanently, or the attempt budget
    /// is spent. Attempts for one task are strictly sequential.
    pub async fn dispatch<F, Fut>(&self, label: &str, mut call: F) -> DispatchOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<InferenceResponse, ProviderError>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let permit = match self.permits.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(task = label, error = %e, "Dispatcher semaphore closed");
                    return DispatchOutcome::Failure {
                        kind: ErrorKind::Permanent,
                        message: format!("dispatcher unavailable: {e}"),
                        attempts: attempt - 1,
                        elapsed_ms: 0,
                    };
                }
            };

            debug!(task = label, attempt, max_attempts, "Dispatching attempt");
            let started = Instant::now();
            let result = call().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            drop(permit);

            match result {
                Ok(response) => {
                    info!(task = label, attempt, elapsed_ms, "Call succeeded");
                    return DispatchOutcome::Success {
                        response,
                        elapsed_ms,
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        task = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        task = label,
                        attempt,
                        kind = ?e.kind(),
                        error = %e,
                        "Call failed, giving up"
                    );
                    return DispatchOutcome::Failure {
                        kind: e.kind(),
                        message: e.to_string(),
                        attempts: attempt,
                        elapsed_ms,
                    };
                }
            }
        }
    }
}
