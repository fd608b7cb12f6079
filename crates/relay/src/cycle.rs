//! The poll cycle: one read-fetch-dispatch-persist pass over the activity feed.
//!
//! ## Protocol
//!
//! 1. Read the [`Watermark`] (absent means `lastSeenId = 0`, no token). A zero
//!    `lastSeenId` marks the initial run.
//! 2. Fetch the feed with the stored cache token. "Not modified" ends the cycle
//!    with nothing dispatched and nothing written.
//! 3. Walk the page oldest first. Records at or below `lastSeenId` are skipped
//!    (the walk continues; the page is not a strict superset of the previous
//!    one). Every newer record raises the candidate watermark.
//! 4. On the initial run nothing is dispatched. Otherwise push records for the
//!    target branch are normalised and dispatched in order.
//! 5. Persist `{max id seen, newest cache token}` if it differs from what was
//!    read.
//!
//! ## Failure policy
//!
//! The first failing dispatch aborts the cycle and the watermark is left as it
//! was read. The failing record and everything after it are retried on the next
//! cycle, and so are the records delivered before it in this cycle: delivery is
//! at-least-once. Continuing past a failure and advancing the watermark anyway
//! would instead lose the failed notification for good.
//!
//! Two processes running cycles against the same store at the same time can
//! both dispatch the same record. Nothing here prevents that; the scheduler
//! only serialises cycles within one process.

use std::sync::Arc;

use tracing::Instrument;

use crate::feed::{FeedRecord, PushEvent};
use crate::normalize::normalize_push;
use crate::ports::{Dispatcher, FeedClient, FeedPage, StateStore};
use crate::{BranchName, CycleError, CycleId, EventId, RepositoryId, Watermark};

/// What a cycle decided to do with one fetched page.
#[derive(Debug)]
pub struct CyclePlan<'a> {
    /// Push records to deliver, oldest first, with their push events.
    pub dispatch: Vec<(&'a FeedRecord, &'a PushEvent)>,
    /// Highest record id on the page newer than the watermark, or the watermark
    /// itself when nothing is new.
    pub highest_seen: EventId,
    /// Records newer than the watermark.
    pub new_records: usize,
    /// New records that will not be delivered (wrong type, wrong branch, or
    /// suppressed by the initial run).
    pub filtered: usize,
}

/// Decides which records of a newest-first `records` page to deliver.
///
/// Pure: no I/O, no logging. `last_seen` of [`EventId::ZERO`] is the initial
/// run and yields an empty dispatch list.
pub fn plan_cycle<'a>(
    records: &'a [FeedRecord],
    last_seen: EventId,
    target_branch: &BranchName,
) -> CyclePlan<'a> {
    let initial_run = last_seen == EventId::ZERO;
    let mut plan = CyclePlan {
        dispatch: Vec::new(),
        highest_seen: last_seen,
        new_records: 0,
        filtered: 0,
    };

    for record in records.iter().rev() {
        if record.id <= last_seen {
            continue;
        }
        plan.new_records += 1;
        plan.highest_seen = plan.highest_seen.max(record.id);

        match record.as_push() {
            Some(push) if !initial_run && target_branch.matches_ref(&push.payload.git_ref) => {
                plan.dispatch.push((record, push));
            }
            _ => plan.filtered += 1,
        }
    }

    plan
}

/// Counters and final state of a cycle that fetched a fresh page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    /// The cycle started from an empty watermark and only set a baseline.
    pub initial_run: bool,
    /// Records newer than the starting watermark.
    pub new_records: usize,
    /// Notifications delivered.
    pub dispatched: usize,
    /// New records not delivered.
    pub filtered: usize,
    /// Watermark after the cycle.
    pub watermark: Watermark,
    /// Whether the watermark was written (it is skipped when unchanged).
    pub watermark_written: bool,
}

/// Result of a cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The feed was unchanged; nothing was dispatched or written.
    NotModified,
    /// A fresh page was processed.
    Completed(CycleSummary),
}

/// Runs poll cycles for one repository and branch.
///
/// Holds no state between cycles; everything that must survive lives in the
/// [`StateStore`]. Callers must not run two cycles of the same store at once.
pub struct PollCycle {
    repository: RepositoryId,
    target_branch: BranchName,
    store: Arc<dyn StateStore>,
    feed: Arc<dyn FeedClient>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl PollCycle {
    /// Creates a cycle runner from its collaborators.
    pub fn new(
        repository: RepositoryId,
        target_branch: BranchName,
        store: Arc<dyn StateStore>,
        feed: Arc<dyn FeedClient>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            repository,
            target_branch,
            store,
            feed,
            dispatcher,
        }
    }

    /// The watched repository.
    pub fn repository(&self) -> &RepositoryId {
        &self.repository
    }

    /// The branch whose pushes are delivered.
    pub fn target_branch(&self) -> &BranchName {
        &self.target_branch
    }

    /// Executes one full cycle.
    pub async fn run(&self) -> Result<CycleOutcome, CycleError> {
        let cycle_id = CycleId::new_random();
        let span = tracing::info_span!(
            "poll_cycle",
            %cycle_id,
            repository = %self.repository,
            branch = %self.target_branch,
        );
        self.run_cycle().instrument(span).await
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let current = self
            .store
            .read()
            .await
            .map_err(CycleError::ReadState)?
            .unwrap_or_default();
        tracing::debug!(
            last_seen_id = %current.last_seen_id,
            has_cache_token = current.cache_token.is_some(),
            "loaded watermark"
        );

        let page = self
            .feed
            .fetch(&self.repository, current.cache_token.as_ref())
            .await
            .map_err(CycleError::Fetch)?;
        let (records, cache_token) = match page {
            FeedPage::NotModified => {
                tracing::debug!("feed not modified");
                return Ok(CycleOutcome::NotModified);
            }
            FeedPage::Modified {
                records,
                cache_token,
            } => (records, cache_token),
        };

        let initial_run = current.is_initial();
        let plan = plan_cycle(&records, current.last_seen_id, &self.target_branch);
        if initial_run {
            tracing::info!(
                records = records.len(),
                "initial run, recording baseline without dispatching"
            );
        }

        let mut dispatched = 0;
        for (record, push) in &plan.dispatch {
            let notification = normalize_push(push);
            self.dispatcher
                .dispatch(&notification)
                .await
                .map_err(|source| CycleError::Dispatch {
                    event_id: record.id,
                    dispatched,
                    source,
                })?;
            dispatched += 1;
            tracing::info!(
                event_id = %record.id,
                commits = notification.commits.len(),
                after = %notification.after,
                "dispatched push notification"
            );
        }

        let next = current.advance(plan.highest_seen, cache_token);
        let watermark_written = next != current;
        if watermark_written {
            self.store
                .write(&next)
                .await
                .map_err(|source| CycleError::WriteState { dispatched, source })?;
            tracing::debug!(last_seen_id = %next.last_seen_id, "persisted watermark");
        }

        Ok(CycleOutcome::Completed(CycleSummary {
            initial_run,
            new_records: plan.new_records,
            dispatched,
            filtered: plan.filtered,
            watermark: next,
            watermark_written,
        }))
    }
}
