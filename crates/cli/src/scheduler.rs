//! Cycle triggering: one-shot and recurring modes, with bounded retries.
//!
//! A failed cycle is re-run after 1s, 5s and 15s when its error is retryable,
//! honouring any longer delay the server asked for. Cycles never overlap: the
//! next tick is only awaited after the current cycle (and its retries) has
//! finished, and ticks missed meanwhile are delayed rather than bursted.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;

use relay::{CycleError, CycleOutcome, PollCycle, RetryPolicy};

/// Delays before each extra attempt of a failed cycle.
pub const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

/// Something that can run one poll cycle.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> Result<CycleOutcome, CycleError>;
}

#[async_trait]
impl CycleRunner for PollCycle {
    async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        self.run().await
    }
}

/// Drives a [`CycleRunner`].
pub struct Scheduler<C> {
    cycle: C,
    backoff: Vec<Duration>,
}

impl<C: CycleRunner> Scheduler<C> {
    pub fn new(cycle: C) -> Self {
        Self {
            cycle,
            backoff: RETRY_BACKOFF.to_vec(),
        }
    }

    /// Runs one cycle with retries and returns its final result.
    pub async fn run_once(&self) -> Result<CycleOutcome, CycleError> {
        self.run_with_retries().await
    }

    /// Runs a cycle every `interval` until `shutdown` resolves.
    ///
    /// The first cycle starts immediately. `shutdown` is only observed between
    /// cycles; an in-flight cycle always runs to completion.
    pub async fn run_recurring(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = interval.as_secs(), "starting recurring poll");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, stopping poll loop");
                    return;
                }
                _ = ticker.tick() => {}
            }
            // Failures are logged inside; the next tick starts afresh.
            let _ = self.run_with_retries().await;
        }
    }

    async fn run_with_retries(&self) -> Result<CycleOutcome, CycleError> {
        let mut attempt = 0;
        loop {
            let err = match self.cycle.run_cycle().await {
                Ok(outcome) => {
                    log_outcome(&outcome);
                    return Ok(outcome);
                }
                Err(err) => err,
            };

            let policy = err.retry_policy();
            let delay = match (&policy, self.backoff.get(attempt)) {
                (RetryPolicy::Retryable { after }, Some(base)) => {
                    after.map_or(*base, |after| after.max(*base))
                }
                _ => {
                    tracing::error!(
                        error = %error_chain(&err),
                        retryable = policy.is_retryable(),
                        attempts = attempt + 1,
                        delivered_before_failure = err.delivered_before_failure(),
                        "poll cycle failed"
                    );
                    return Err(err);
                }
            };

            attempt += 1;
            tracing::warn!(
                error = %error_chain(&err),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                delivered_before_failure = err.delivered_before_failure(),
                "poll cycle failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::NotModified => tracing::info!("feed not modified"),
        CycleOutcome::Completed(summary) => tracing::info!(
            initial_run = summary.initial_run,
            new_records = summary.new_records,
            dispatched = summary.dispatched,
            filtered = summary.filtered,
            last_seen_id = %summary.watermark.last_seen_id,
            watermark_written = summary.watermark_written,
            "poll cycle completed"
        ),
    }
}

/// Formats an error with all of its sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay::{DispatchError, EventId, FeedError, StoreError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    type Step = Box<dyn Fn() -> Result<CycleOutcome, CycleError> + Send + Sync>;

    /// Replays scripted results, then reports `NotModified` forever.
    #[derive(Clone, Default)]
    struct ScriptedCycle {
        steps: Arc<Mutex<VecDeque<Step>>>,
        calls: Arc<AtomicUsize>,
        duration: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl ScriptedCycle {
        fn then(
            self,
            step: impl Fn() -> Result<CycleOutcome, CycleError> + Send + Sync + 'static,
        ) -> Self {
            self.steps.lock().unwrap().push_back(Box::new(step));
            self
        }

        fn taking(mut self, duration: Duration) -> Self {
            self.duration = duration;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CycleRunner for ScriptedCycle {
        async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.duration.is_zero() {
                tokio::time::sleep(self.duration).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(step) => step(),
                None => Ok(CycleOutcome::NotModified),
            }
        }
    }

    fn transient() -> Result<CycleOutcome, CycleError> {
        Err(CycleError::Fetch(FeedError::Transport {
            message: "connection reset".into(),
        }))
    }

    fn rate_limited(after: Duration) -> Result<CycleOutcome, CycleError> {
        Err(CycleError::Fetch(FeedError::Status {
            status: 429,
            body: String::new(),
            retry_after: Some(after),
        }))
    }

    fn rejected() -> Result<CycleOutcome, CycleError> {
        Err(CycleError::Dispatch {
            event_id: EventId::new(7),
            dispatched: 1,
            source: DispatchError::Rejected {
                status: 400,
                body: "bad".into(),
            },
        })
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_not_retried() {
        let cycle = ScriptedCycle::default();
        let scheduler = Scheduler::new(cycle.clone());

        assert_eq!(scheduler.run_once().await.unwrap(), CycleOutcome::NotModified);
        assert_eq!(cycle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_back_off_then_succeed() {
        let cycle = ScriptedCycle::default().then(transient).then(transient);
        let scheduler = Scheduler::new(cycle.clone());
        let start = Instant::now();

        assert!(scheduler.run_once().await.is_ok());

        assert_eq!(cycle.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 5));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let cycle = ScriptedCycle::default()
            .then(transient)
            .then(transient)
            .then(transient)
            .then(transient)
            .then(transient);
        let scheduler = Scheduler::new(cycle.clone());
        let start = Instant::now();

        let err = scheduler.run_once().await.unwrap_err();

        assert!(matches!(err, CycleError::Fetch(_)));
        assert_eq!(cycle.calls(), 1 + RETRY_BACKOFF.len());
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 5 + 15));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_returns_immediately() {
        let cycle = ScriptedCycle::default().then(rejected);
        let scheduler = Scheduler::new(cycle.clone());

        let err = scheduler.run_once().await.unwrap_err();

        assert_eq!(err.delivered_before_failure(), 1);
        assert_eq!(cycle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_requested_delay_wins_when_longer() {
        let cycle = ScriptedCycle::default().then(|| rate_limited(Duration::from_secs(30)));
        let scheduler = Scheduler::new(cycle.clone());
        let start = Instant::now();

        assert!(scheduler.run_once().await.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_wins_when_server_delay_is_shorter() {
        let cycle = ScriptedCycle::default().then(|| rate_limited(Duration::from_millis(10)));
        let scheduler = Scheduler::new(cycle.clone());
        let start = Instant::now();

        assert!(scheduler.run_once().await.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_state_is_not_retried() {
        let cycle = ScriptedCycle::default().then(|| {
            let corrupt = serde_json::from_str::<u64>("many").unwrap_err();
            Err(CycleError::ReadState(StoreError::Corrupt(corrupt)))
        });
        let scheduler = Scheduler::new(cycle.clone());

        assert!(scheduler.run_once().await.is_err());
        assert_eq!(cycle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_state_is_retried() {
        let cycle = ScriptedCycle::default()
            .then(|| Err(CycleError::ReadState(StoreError::Backend("offline".into()))));
        let scheduler = Scheduler::new(cycle.clone());

        assert!(scheduler.run_once().await.is_ok());
        assert_eq!(cycle.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_runs_on_each_tick_until_shutdown() {
        let cycle = ScriptedCycle::default();
        let scheduler = Scheduler::new(cycle.clone());

        scheduler
            .run_recurring(
                Duration::from_secs(60),
                tokio::time::sleep(Duration::from_secs(150)),
            )
            .await;

        // Ticks at 0s, 60s and 120s; shutdown at 150s.
        assert_eq!(cycle.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_survives_failed_cycles() {
        let cycle = ScriptedCycle::default().then(rejected).then(rejected);
        let scheduler = Scheduler::new(cycle.clone());

        scheduler
            .run_recurring(
                Duration::from_secs(10),
                tokio::time::sleep(Duration::from_secs(25)),
            )
            .await;

        assert_eq!(cycle.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycles_never_overlap() {
        let cycle = ScriptedCycle::default().taking(Duration::from_secs(25));
        let scheduler = Scheduler::new(cycle.clone());
        let start = Instant::now();

        scheduler
            .run_recurring(
                Duration::from_secs(10),
                tokio::time::sleep(Duration::from_secs(60)),
            )
            .await;

        assert_eq!(cycle.max_in_flight.load(Ordering::SeqCst), 1);
        // Cycles start at 0s, 25s and 50s; the last finishes before shutdown is seen.
        assert_eq!(cycle.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(75));
    }

    #[tokio::test(start_paused = true)]
    async fn very_long_server_delay_is_honoured() {
        let after = Duration::MAX;
        let cycle = ScriptedCycle::default().then(move || rate_limited(after));
        let scheduler = Scheduler::new(cycle.clone());

        let run = tokio::time::timeout(Duration::from_secs(60), scheduler.run_once()).await;

        assert!(run.is_err(), "retry must wait for the requested delay");
        assert_eq!(cycle.calls(), 1);
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = CycleError::Dispatch {
            event_id: EventId::new(7),
            dispatched: 0,
            source: DispatchError::Rejected {
                status: 400,
                body: "bad".into(),
            },
        };
        let text = error_chain(&err);
        assert!(text.starts_with("failed to dispatch notification for event 7"));
        assert!(text.contains("400"));
    }
}
