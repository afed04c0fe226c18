use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{ChangeFeed, ChangeFilter, ChangeHandler};

/// Backoff schedule for re-opening a lost subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of the delay.
    pub max_delay: Duration,
    /// Consecutive failures after which the subscription reports `Degraded`.
    pub degraded_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            degraded_after: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay before retry number `attempt` (1-based).
    ///
    /// The ceiling doubles per attempt up to `max_delay` and stays there once
    /// degraded. `jitter` in `[0, 1]` scales the ceiling into `[ceiling / 2, ceiling]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter: f64) -> Duration {
        let ceiling = if attempt >= self.degraded_after {
            self.max_delay
        } else {
            let exponent = attempt.saturating_sub(1).min(16);
            self.base_delay
                .saturating_mul(1_u32 << exponent)
                .min(self.max_delay)
        };

        ceiling.mul_f64(0.5 + jitter.clamp(0.0, 1.0) / 2.0)
    }
}

/// Observable state of a synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// No subscription task is running.
    Unsubscribed,
    /// A live stream is being consumed.
    Subscribed,
    /// The stream was lost and a retry is scheduled.
    Reconnecting {
        /// Consecutive failed attempts so far.
        attempt: u32,
    },
    /// Retries keep failing; the cache may be stale.
    Degraded {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Message of the latest failure.
        last_error: String,
    },
}

/// Status channel shared with subscription tasks.
///
/// Each task publishes under the generation it was started with; retiring
/// bumps the generation so a task that outlives its teardown cannot
/// overwrite `Unsubscribed`.
struct StatusCell {
    sender: watch::Sender<SyncStatus>,
    generation: AtomicU64,
}

impl StatusCell {
    fn new() -> Self {
        let (sender, _) = watch::channel(SyncStatus::Unsubscribed);
        Self {
            sender,
            generation: AtomicU64::new(0),
        }
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Publishes `status` if `generation` is still live. Returns whether it was published.
    fn publish(&self, generation: u64, status: SyncStatus) -> bool {
        self.sender.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            *current = status;
            true
        })
    }

    fn retire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sender.send_replace(SyncStatus::Unsubscribed);
    }
}

/// Keeps a change handler in sync with one filtered change feed subscription.
///
/// The subscription runs in a supervised task owned by this value. A lost
/// stream is re-opened with exponential backoff and jitter. The handler
/// resynchronizes after every successful subscribe, the first included, to
/// cover notifications missed while no stream was open.
pub struct ChangeFeedSynchronizer {
    feed: Arc<dyn ChangeFeed>,
    handler: Arc<dyn ChangeHandler>,
    filter: ChangeFilter,
    policy: ReconnectPolicy,
    status: Arc<StatusCell>,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeedSynchronizer {
    /// Creates an unsubscribed synchronizer.
    #[must_use]
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        handler: Arc<dyn ChangeHandler>,
        filter: ChangeFilter,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            feed,
            handler,
            filter,
            policy,
            status: Arc::new(StatusCell::new()),
            task: None,
        }
    }

    /// Starts the subscription task, tearing down any previous one first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&mut self) {
        self.teardown();

        let supervisor = Supervisor {
            feed: Arc::clone(&self.feed),
            handler: Arc::clone(&self.handler),
            filter: self.filter.clone(),
            policy: self.policy,
            generation: self.status.current_generation(),
            status: Arc::clone(&self.status),
        };
        self.task = Some(tokio::spawn(supervisor.run()));
    }

    /// Stops the subscription task.
    pub fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(table = %self.filter.table, "change feed subscription closed");
        }
        self.status.retire();
    }

    /// Returns whether a subscription task is owned.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns a receiver that observes status transitions.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.sender.subscribe()
    }

    /// Returns the current status.
    #[must_use]
    pub fn current_status(&self) -> SyncStatus {
        self.status.sender.borrow().clone()
    }

    /// Returns the subscription filter.
    #[must_use]
    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }
}

impl Drop for ChangeFeedSynchronizer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Supervisor {
    feed: Arc<dyn ChangeFeed>,
    handler: Arc<dyn ChangeHandler>,
    filter: ChangeFilter,
    policy: ReconnectPolicy,
    status: Arc<StatusCell>,
    generation: u64,
}

impl Supervisor {
    async fn run(self) {
        let table = self.filter.table;
        let mut failures: u32 = 0;

        loop {
            let last_error = match self.feed.subscribe(self.filter.clone()).await {
                Ok(mut stream) => {
                    self.publish(SyncStatus::Subscribed);
                    info!(table = %table, "change feed subscribed");
                    let opened_at = Instant::now();

                    if let Err(error) = self.handler.resynchronize().await {
                        warn!(table = %table, error = %error, "resynchronization after subscribe failed");
                    }

                    let mut delivered = false;
                    while let Some(change) = stream.next().await {
                        if !self.filter.matches(&change) {
                            continue;
                        }
                        delivered = true;
                        if let Err(error) = self.handler.apply_change(change).await {
                            warn!(table = %table, error = %error, "failed to apply change notification");
                        }
                    }

                    // Only a stream that proved healthy ends the failure streak.
                    if delivered || opened_at.elapsed() >= self.policy.max_delay {
                        failures = 0;
                    }
                    "change feed stream closed".to_owned()
                }
                Err(error) => error.to_string(),
            };

            failures = failures.saturating_add(1);
            let status = if failures >= self.policy.degraded_after {
                SyncStatus::Degraded {
                    attempt: failures,
                    last_error: last_error.clone(),
                }
            } else {
                SyncStatus::Reconnecting { attempt: failures }
            };
            self.publish(status);

            let delay = self.policy.delay_for(failures, jitter_fraction());
            warn!(
                table = %table,
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %last_error,
                "change feed subscription lost, reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn publish(&self, status: SyncStatus) {
        self.status.publish(self.generation, status);
    }
}

fn jitter_fraction() -> f64 {
    let mut bytes = [0_u8; 2];
    if getrandom::fill(&mut bytes).is_err() {
        return 0.5;
    }
    f64::from(u16::from_le_bytes(bytes)) / f64::from(u16::MAX)
}
