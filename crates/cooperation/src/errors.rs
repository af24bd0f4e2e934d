//! Error and retry-policy types for cooperation points.
//!
//! [`CooperationError`] is what every `cooperate` call returns on failure. It
//! keeps the caller's own work and check failures ([`CooperationError::Work`],
//! [`CooperationError::Check`]) strictly apart from coordination failures
//! (timeout, capacity, cancellation), which the core produces itself.
//!
//! [`RetryPolicy`] is advisory: the core never retries anything, but callers
//! that do can ask an error whether retrying makes sense.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable` errors: follower timeouts, capacity rejections, cancellations.
///   The in-flight work they gave up on is unaffected.
/// - `NonRetryable` errors: invalid keys, and the caller's own work or check
///   failures (the caller knows better than the core whether those are transient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried without changing its inputs.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Argument errors
// ---------------------------------------------------------------------------

/// A key or point identity was built from an absent component.
///
/// Produced by [`crate::CooperationKey::create`] and by the point builders.
/// Convertible into [`CooperationError`] for any work error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid argument: {reason}")]
pub struct InvalidArgument {
    reason: String,
}

impl InvalidArgument {
    /// Creates an [`InvalidArgument`] with a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the reason the argument was rejected.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

// ---------------------------------------------------------------------------
// Cooperation errors
// ---------------------------------------------------------------------------

/// Failure of a single `cooperate` call.
///
/// `E` is the caller's work/check error type. Followers receive a clone of the
/// leader's failure, which is why `cooperate` requires `E: Clone`.
#[derive(Debug, Error)]
pub enum CooperationError<E> {
    /// The scope or action used to derive the key was absent.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// The work function failed.
    ///
    /// Returned verbatim to whichever caller ran the work and to every
    /// follower that was waiting on that run.
    #[error("Work failed: {0}")]
    Work(E),

    /// The check function failed during fallback. The fallback is abandoned.
    #[error("Check failed: {0}")]
    Check(E),

    /// A follower waited `waited` for the leader without seeing a result and
    /// was not allowed to perform the work itself.
    #[error("Timed out after {waited:?} waiting for in-flight work on '{key}'")]
    Timeout {
        /// Label of the key that was being waited on.
        key: String,
        /// How long the follower waited.
        waited: Duration,
    },

    /// The key already had `limit` participants and the caller was not allowed
    /// to perform the work itself.
    #[error("Cooperation on '{key}' is at capacity ({limit} participants)")]
    Capacity {
        /// Label of the saturated key.
        key: String,
        /// Configured participants-per-key limit.
        limit: usize,
    },

    /// The caller's cancellation token fired while it was waiting.
    ///
    /// The leader's in-flight work is not affected.
    #[error("Cancelled while waiting for in-flight work on '{key}'")]
    Cancelled {
        /// Label of the key that was being waited on.
        key: String,
    },
}

impl<E> CooperationError<E> {
    /// Returns `true` for failures produced by the coordination core itself
    /// rather than by the caller's work or check function.
    pub fn is_coordination_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Capacity { .. } | Self::Cancelled { .. }
        )
    }

    /// Advisory retry policy for this failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.is_coordination_failure() {
            RetryPolicy::Retryable { after: None }
        } else {
            RetryPolicy::NonRetryable
        }
    }

    /// Returns the caller's own error if this failure came from the work or
    /// check function, otherwise gives the error back unchanged.
    pub fn into_caller_error(self) -> Result<E, Self> {
        match self {
            Self::Work(e) | Self::Check(e) => Ok(e),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Lease errors
// ---------------------------------------------------------------------------

/// Failures of the shared lease store behind [`crate::LeaseStore`].
///
/// Cluster-aware work functions require `E: From<LeaseError>` so these surface
/// through the caller's own error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// The lease store could not be reached or rejected the request.
    #[error("Lease store unavailable: {message}")]
    Unavailable {
        /// Description of the store failure.
        message: String,
    },

    /// The lease row for `fingerprint` is owned by a different token.
    #[error("Lease for '{fingerprint}' is not held by this token")]
    NotHeld {
        /// Fingerprint of the cooperation key the lease guards.
        fingerprint: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordination_failures_are_retryable() {
        let timeout: CooperationError<String> = CooperationError::Timeout {
            key: "npm-proxy:fetch".into(),
            waited: Duration::from_millis(50),
        };
        assert_eq!(
            timeout.retry_policy(),
            RetryPolicy::Retryable { after: None }
        );

        let work: CooperationError<String> = CooperationError::Work("boom".into());
        assert!(!work.is_coordination_failure());
        assert_eq!(work.retry_policy(), RetryPolicy::NonRetryable);
    }

    #[test]
    fn caller_errors_are_unwrapped() {
        let check: CooperationError<String> = CooperationError::Check("lookup failed".into());
        assert_eq!(check.into_caller_error().unwrap(), "lookup failed");

        let capacity: CooperationError<String> = CooperationError::Capacity {
            key: "k".into(),
            limit: 1,
        };
        assert!(capacity.into_caller_error().is_err());
    }

    #[test]
    fn invalid_argument_converts_for_any_work_error() {
        let err: CooperationError<std::io::Error> = InvalidArgument::new("scope is empty").into();
        assert_eq!(err.to_string(), "Invalid argument: scope is empty");
    }
}
