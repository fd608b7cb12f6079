//! Shared value types for the push-relay domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! invariants that the poll cycle relies on (the watermark never moves
//! backwards) and participate in domain computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CacheToken, EventId};

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Logical key under which the watermark record is persisted.
pub const WATERMARK_KEY: &str = "last-update";

/// Persisted progress marker: the highest feed record already processed plus
/// the cache validator of the most recent feed response.
///
/// Serialised as `{"cacheToken": "...", "lastSeenId": 123}`; `cacheToken` is
/// omitted when absent. A record that was never written is equivalent to
/// [`Watermark::default`] (`lastSeenId = 0`, no token).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    /// `ETag` of the last successful feed response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_token: Option<CacheToken>,

    /// Highest feed record id processed so far; [`EventId::ZERO`] before the
    /// first successful cycle.
    #[serde(default)]
    pub last_seen_id: EventId,
}

impl Watermark {
    /// Creates a watermark from its parts.
    pub fn new(last_seen_id: EventId, cache_token: Option<CacheToken>) -> Self {
        Self {
            cache_token,
            last_seen_id,
        }
    }

    /// Returns `true` when no cycle has completed yet.
    ///
    /// The first cycle only establishes a baseline and dispatches nothing.
    pub fn is_initial(&self) -> bool {
        self.last_seen_id == EventId::ZERO
    }

    /// Returns the watermark that follows this one after a successful fetch.
    ///
    /// `highest_seen` only ever raises `last_seen_id`; a missing `cache_token`
    /// keeps the current one.
    #[must_use]
    pub fn advance(&self, highest_seen: EventId, cache_token: Option<CacheToken>) -> Self {
        Self {
            cache_token: cache_token.or_else(|| self.cache_token.clone()),
            last_seen_id: self.last_seen_id.max(highest_seen),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
