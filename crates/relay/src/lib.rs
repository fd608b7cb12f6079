//! Core polling domain for push-relay.
//!
//! This crate owns the watermark protocol: how one repository's activity feed
//! is polled, deduplicated against a persisted [`Watermark`], filtered to one
//! branch, and turned into push notifications. Infrastructure crates implement
//! the traits in [`ports`]; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`EventId`, `RepositoryId`, `CacheToken`, etc.) |
//! | [`types`] | `Watermark` and `Timestamp` |
//! | [`errors`] | Cycle, configuration and retry-policy types |
//! | [`feed`] | Validated feed-record contract and page parser |
//! | [`normalize`] | Push record → webhook-shaped notification |
//! | [`ports`] | `StateStore`, `FeedClient`, `Dispatcher` and their errors |
//! | [`memory`] | In-memory and caching state stores |
//! | [`cycle`] | The poll cycle controller |

pub mod cycle;
pub mod errors;
pub mod feed;
pub mod identifiers;
pub mod memory;
pub mod normalize;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use cycle::{plan_cycle, CycleOutcome, CyclePlan, CycleSummary, PollCycle};
pub use errors::{ConfigError, CycleError, RetryPolicy};
pub use feed::{parse_page, FeedRecord, PushEvent, PushPayload, RecordError, RecordKind};
pub use identifiers::{BranchName, CacheToken, CommitSha, CycleId, EventId, RepositoryId};
pub use memory::{CachedStateStore, InMemoryStateStore};
pub use normalize::{normalize_push, PushNotification};
pub use ports::{
    DispatchError, Dispatcher, FeedClient, FeedError, FeedPage, StateStore, StoreError,
};
pub use types::{Timestamp, Watermark, WATERMARK_KEY};
