//! Port traits: what the poll cycle needs from the outside world.
//!
//! Infrastructure crates implement these over real transports (`github`,
//! `webhook`, `store`); [`crate::memory`] provides in-process versions. The
//! traits are object safe so the composition root can hold them as
//! `Arc<dyn ...>`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::feed::{FeedRecord, RecordError};
use crate::normalize::PushNotification;
use crate::{CacheToken, RepositoryId, RetryPolicy, Watermark};

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

/// Failure reading or writing the watermark record.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be accessed.
    #[error("state store I/O failed")]
    Io(#[from] std::io::Error),

    /// The stored record exists but cannot be decoded.
    #[error("stored watermark is corrupt")]
    Corrupt(#[source] serde_json::Error),

    /// Any other backend failure.
    #[error("state store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// I/O and backend failures are retryable; a corrupt record needs an operator.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            StoreError::Io(_) | StoreError::Backend(_) => RetryPolicy::Retryable { after: None },
            StoreError::Corrupt(_) => RetryPolicy::NonRetryable,
        }
    }
}

/// Durable home of the single [`Watermark`] record.
///
/// Implementations must replace the record atomically: a reader sees either
/// the previous or the new watermark, never a mix.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the stored watermark, or `None` if none was ever written.
    async fn read(&self) -> Result<Option<Watermark>, StoreError>;

    /// Replaces the stored watermark.
    async fn write(&self, watermark: &Watermark) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Feed client
// ---------------------------------------------------------------------------

/// Result of a conditional feed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedPage {
    /// The feed is unchanged since the supplied cache token.
    NotModified,

    /// A fresh page of records.
    Modified {
        /// Records, newest first.
        records: Vec<FeedRecord>,
        /// Cache validator to send next time, if the response carried one.
        cache_token: Option<CacheToken>,
    },
}

/// Failure fetching the activity feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("feed request failed: {message}")]
    Transport {
        /// Transport error description.
        message: String,
    },

    /// The feed answered with a status other than 200 or 304.
    #[error("feed returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
        /// Delay requested by the server, if any.
        retry_after: Option<Duration>,
    },

    /// The response body does not match the record contract.
    #[error("feed payload failed validation")]
    InvalidPayload(#[from] RecordError),
}

impl FeedError {
    /// Retry classification used by the scheduler.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            FeedError::Transport { .. } => RetryPolicy::Retryable { after: None },
            FeedError::Status {
                status,
                retry_after,
                ..
            } => RetryPolicy::for_status(*status, *retry_after),
            FeedError::InvalidPayload(_) => RetryPolicy::NonRetryable,
        }
    }
}

/// Source of repository activity.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Fetches the first page of recent activity for `repository`.
    ///
    /// When `cache_token` is given it is sent as a cache validator, and an
    /// unchanged feed yields [`FeedPage::NotModified`].
    async fn fetch(
        &self,
        repository: &RepositoryId,
        cache_token: Option<&CacheToken>,
    ) -> Result<FeedPage, FeedError>;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Failure delivering one notification.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The notification could not be serialised.
    #[error("failed to serialise notification")]
    Serialize(#[source] serde_json::Error),

    /// The request never produced a response.
    #[error("webhook request failed: {message}")]
    Transport {
        /// Transport error description.
        message: String,
    },

    /// The receiver answered with a non-2xx status.
    #[error("webhook rejected notification with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

impl DispatchError {
    /// Retry classification used by the scheduler.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            DispatchError::Serialize(_) => RetryPolicy::NonRetryable,
            DispatchError::Transport { .. } => RetryPolicy::Retryable { after: None },
            DispatchError::Rejected { status, .. } => RetryPolicy::for_status(*status, None),
        }
    }
}

/// Delivers notifications to the downstream receiver.
///
/// One call is one delivery attempt; implementations never retry.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Delivers `notification`.
    async fn dispatch(&self, notification: &PushNotification) -> Result<(), DispatchError>;
}
