//! Top-level error and retry-policy types for the push-relay domain.
//!
//! [`CycleError`] covers every way a single poll cycle can fail. Port-level
//! errors ([`FeedError`], [`DispatchError`], [`StoreError`]) are defined next to
//! their traits in [`crate::ports`]; a cycle error wraps exactly one of them.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in the scheduler's retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ports::{DispatchError, FeedError, StoreError};
use crate::EventId;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by port error types to let the scheduler decide whether to re-run
/// the whole cycle before the next regular tick.
///
/// - `Retryable` errors: network failures, timeouts, 5xx responses, rate limits.
/// - `NonRetryable` errors: malformed payloads, rejected requests, corrupt state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` or `x-ratelimit-reset` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried before the next scheduled cycle.
    NonRetryable,
}

impl RetryPolicy {
    /// Classifies an HTTP status code returned by a remote endpoint.
    ///
    /// 408, 429 and every 5xx are retryable; everything else is not.
    pub fn for_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            408 | 429 | 500..=599 => RetryPolicy::Retryable { after: retry_after },
            // GitHub signals secondary rate limits with 403 plus a reset header.
            403 if retry_after.is_some() => RetryPolicy::Retryable { after: retry_after },
            _ => RetryPolicy::NonRetryable,
        }
    }

    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Cycle-level errors
// ---------------------------------------------------------------------------

/// Errors that abort a poll cycle.
///
/// A cycle that fails never advances the watermark past what it read, except
/// in the [`CycleError::WriteState`] case where the write itself is what
/// failed. Notifications already delivered in the failing cycle are not rolled
/// back; they may be delivered again by the next cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The stored watermark could not be read. Nothing was fetched or dispatched.
    #[error("failed to read watermark")]
    ReadState(#[source] StoreError),

    /// The feed could not be fetched or its payload failed validation.
    #[error("failed to fetch activity feed")]
    Fetch(#[source] FeedError),

    /// Delivering the notification for `event_id` failed. The remainder of the
    /// cycle was abandoned.
    #[error("failed to dispatch notification for event {event_id} ({dispatched} delivered earlier in this cycle)")]
    Dispatch {
        /// Feed record whose notification could not be delivered.
        event_id: EventId,
        /// Notifications successfully delivered before the failure.
        dispatched: usize,
        /// Underlying delivery failure.
        #[source]
        source: DispatchError,
    },

    /// Every dispatch succeeded but the new watermark could not be persisted.
    #[error("failed to persist watermark after dispatching {dispatched} notification(s)")]
    WriteState {
        /// Notifications delivered in this cycle that may be repeated.
        dispatched: usize,
        /// Underlying storage failure.
        #[source]
        source: StoreError,
    },
}

impl CycleError {
    /// Returns the retry policy of the underlying port error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            CycleError::ReadState(e) | CycleError::WriteState { source: e, .. } => e.retry_policy(),
            CycleError::Fetch(e) => e.retry_policy(),
            CycleError::Dispatch { source, .. } => source.retry_policy(),
        }
    }

    /// Number of notifications delivered before the cycle failed.
    ///
    /// A non-zero value means the next cycle may deliver them again.
    pub fn delivered_before_failure(&self) -> usize {
        match self {
            CycleError::ReadState(_) | CycleError::Fetch(_) => 0,
            CycleError::Dispatch { dispatched, .. } | CycleError::WriteState { dispatched, .. } => {
                *dispatched
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Invalid or missing process configuration.
///
/// Produced at load time; no cycle ever runs with an invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("environment variable \"{name}\" must be set")]
    Missing {
        /// Name of the missing variable.
        name: &'static str,
    },

    /// A variable is set but its value cannot be used.
    #[error("invalid value for \"{name}\": {message}")]
    Invalid {
        /// Name of the offending variable.
        name: &'static str,
        /// Description of the problem.
        message: String,
    },
}
