//! Timeouts and bounded retries around store calls.
//!
//! Every store call goes through [`bounded`] (writes) or [`retry_read`]
//! (idempotent reads). A call that exceeds its timeout surfaces as
//! `StoreError::Unavailable`, which the orchestrator turns into
//! `AuthError::UpstreamUnavailable`.

use std::future::Future;
use std::time::Duration;

use tollgate_auth::{AuthError, RetryPolicy};

use crate::store::{CredentialError, StoreError};

/// Errors that can tell whether trying again might help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Transient for CredentialError {
    fn is_transient(&self) -> bool {
        matches!(self, CredentialError::Store(e) if e.is_transient())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AuthError::UpstreamUnavailable(msg),
            StoreError::Conflict(msg) | StoreError::Corrupt(msg) => AuthError::Internal(msg),
        }
    }
}

fn timed_out(operation: &str, timeout: Duration) -> StoreError {
    StoreError::Unavailable(format!("{operation} timed out after {}ms", timeout.as_millis()))
}

/// Run one store call under `timeout`. Never retried.
pub async fn bounded<T, E, Fut>(operation: &'static str, timeout: Duration, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "store call timed out");
            Err(timed_out(operation, timeout).into())
        }
    }
}

/// Run an idempotent read under `timeout`, retrying transient failures with
/// exponential backoff up to `policy.attempts` total attempts.
pub async fn retry_read<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    timeout: Duration,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<StoreError> + Transient + core::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => timed_out(operation, timeout).into(),
        };

        if !err.is_transient() || attempt >= attempts {
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient store failure, retrying read"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
