//! Registry of in-flight invocations keyed by correlation id.
//!
//! Every entry is completed at most once: `resolve`, `reject` and
//! `cancel_all` remove the entry before completing it, so a duplicate
//! or late frame finds nothing and is discarded.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use jobwire_core::{CorrelationId, JobName, JobOutput};
use tokio::sync::oneshot;

use crate::error::InvokeError;

/// Outcome delivered to the caller awaiting an invocation.
pub type InvocationResult = Result<JobOutput, InvokeError>;

/// Client-side record of one request awaiting its response.
struct PendingInvocation {
    job_name: JobName,
    registered_at: Instant,
    completion: oneshot::Sender<InvocationResult>,
}

/// Maps in-flight correlation ids to the callers awaiting them.
///
/// The map is the only shared mutable state of the client. The lock is
/// never held across an `.await`.
#[derive(Default)]
pub struct InvocationRegistry {
    pending: Mutex<HashMap<CorrelationId, PendingInvocation>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pending invocation and return the handle its caller awaits.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        job_name: JobName,
    ) -> Result<oneshot::Receiver<InvocationResult>, InvokeError> {
        let mut pending = self.lock();
        if pending.contains_key(&correlation_id) {
            return Err(InvokeError::DuplicateCorrelation(correlation_id));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(
            correlation_id,
            PendingInvocation {
                job_name,
                registered_at: Instant::now(),
                completion: tx,
            },
        );
        Ok(rx)
    }

    /// Complete the invocation with a successful result.
    ///
    /// Returns `false` if no such invocation was pending.
    pub fn resolve(&self, correlation_id: CorrelationId, result: JobOutput) -> bool {
        self.complete(correlation_id, Ok(result))
    }

    /// Complete the invocation with an error.
    ///
    /// Returns `false` if no such invocation was pending.
    pub fn reject(&self, correlation_id: CorrelationId, error: InvokeError) -> bool {
        self.complete(correlation_id, Err(error))
    }

    /// Drop an entry without completing it.
    ///
    /// Used when the caller already holds its outcome (timeout, failed
    /// send) and only the bookkeeping needs to go.
    pub fn remove(&self, correlation_id: CorrelationId) -> bool {
        self.lock().remove(&correlation_id).is_some()
    }

    /// Reject every pending invocation with `error` and clear the map.
    ///
    /// Returns the number of invocations cancelled.
    pub fn cancel_all(&self, error: InvokeError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();

        for (correlation_id, entry) in drained {
            tracing::debug!(
                correlation_id = %correlation_id,
                job_name = %entry.job_name,
                "Cancelling pending invocation",
            );
            let _ = entry.completion.send(Err(error.clone()));
        }

        if count > 0 {
            tracing::info!(count, error = %error, "Cancelled pending invocations");
        }
        count
    }

    /// Number of invocations currently awaiting a response.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, correlation_id: CorrelationId) -> bool {
        self.lock().contains_key(&correlation_id)
    }

    fn complete(&self, correlation_id: CorrelationId, result: InvocationResult) -> bool {
        let Some(entry) = self.lock().remove(&correlation_id) else {
            tracing::warn!(
                correlation_id = %correlation_id,
                "Discarding response for unknown or completed invocation",
            );
            return false;
        };

        tracing::debug!(
            correlation_id = %correlation_id,
            job_name = %entry.job_name,
            ok = result.is_ok(),
            elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
            "Invocation completed",
        );

        if entry.completion.send(result).is_err() {
            // The caller stopped waiting (dropped its future).
            tracing::debug!(correlation_id = %correlation_id, "Invocation receiver dropped");
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingInvocation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
