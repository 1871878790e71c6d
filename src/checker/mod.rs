//! The URL checker: scheduling passes, the check queue and the checks themselves.

mod batch;
mod queue;
mod record;

use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::{
    classify::{Observation, Verdict, classify, is_benign_redirect},
    clock::Clock,
    config::CheckerSettings,
    domain::{CheckableUrl, RecordId},
    probe::{HTTP_OK, Prober},
    store::{HistoryStore, RecordSource, StoreError, UrlDueFilter},
};

pub use batch::apportion;
use batch::BatchPlanner;
pub use queue::{CheckTask, RunningTask, TaskQueue};
pub use record::{RecordCheckOutcome, ResumeToken};

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of the last scheduling pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckerStatus {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_pass: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_pass: Option<OffsetDateTime>,
    /// Checks queued by the last pass
    pub last_batch: usize,
}

/// Candidates found by a scheduling pass, per pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSizes {
    pub never_checked: u64,
    pub records_due: u64,
    pub urls_due: u64,
}

pub struct UrlChecker {
    store: Arc<dyn HistoryStore>,
    records: Arc<dyn RecordSource>,
    prober: Arc<dyn Prober>,
    clock: Arc<dyn Clock>,
    settings: CheckerSettings,
    queue: TaskQueue,
    status: ArcSwap<CheckerStatus>,
}

impl UrlChecker {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        records: Arc<dyn RecordSource>,
        prober: Arc<dyn Prober>,
        clock: Arc<dyn Clock>,
        settings: CheckerSettings,
    ) -> Self {
        Self {
            store,
            records,
            prober,
            clock,
            settings,
            queue: TaskQueue::default(),
            status: ArcSwap::from_pointee(CheckerStatus::default()),
        }
    }

    pub fn settings(&self) -> &CheckerSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn HistoryStore {
        self.store.as_ref()
    }

    pub fn status(&self) -> CheckerStatus {
        (**self.status.load()).clone()
    }

    /// Checks waiting or running
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn due_filter(&self, now: OffsetDateTime) -> UrlDueFilter {
        UrlDueFilter {
            threshold: self.settings.invalidation_threshold,
            valid_cutoff: now - self.settings.valid_recheck_interval(),
            invalid_cutoff: now - self.settings.invalid_recheck_interval(),
        }
    }

    /// Count the candidates of every pool at `now`
    pub async fn pool_sizes(&self, now: OffsetDateTime) -> Result<PoolSizes, CheckerError> {
        Ok(PoolSizes {
            never_checked: self.store.count_never_checked().await?,
            records_due: self
                .store
                .count_records_due(now - self.settings.resource_recheck_interval())
                .await?,
            urls_due: self.store.count_urls_due(&self.due_filter(now)).await?,
        })
    }

    /// Select the next batch of checks without queuing them
    pub async fn plan_batch(&self, now: OffsetDateTime) -> Result<Vec<CheckTask>, CheckerError> {
        let pools = self.pool_sizes(now).await?;
        let shares = apportion(
            self.settings.batch_size,
            &[pools.never_checked, pools.records_due, pools.urls_due],
        );
        tracing::debug!(?pools, ?shares, "apportioned batch");

        let mut planner = BatchPlanner::new(
            self.store.as_ref(),
            self.records.as_ref(),
            self.settings.per_domain_cap,
        );
        planner.take_never_checked(shares[0]).await?;
        planner
            .take_records_due(now - self.settings.resource_recheck_interval(), shares[1])
            .await?;
        planner
            .take_urls_due(&self.due_filter(now), shares[2])
            .await?;

        Ok(planner.into_tasks())
    }

    /// Queue a fresh batch unless checks are still waiting or running
    ///
    /// Returns the delay until the next pass should run.
    #[tracing::instrument(name = "checker::run_scheduling_pass", skip(self))]
    pub async fn run_scheduling_pass(&self) -> Result<Duration, CheckerError> {
        let now = self.clock.now();

        let (delay, queued) = if !self.queue.is_empty() {
            tracing::debug!(
                outstanding = self.queue.len(),
                "previous batch still outstanding, deferring"
            );
            (self.settings.retry_delay(), 0)
        } else {
            let tasks = self.plan_batch(now).await?;
            if tasks.is_empty() {
                tracing::debug!("nothing due");
                (self.settings.idle_delay(), 0)
            } else {
                let queued = tasks.len();
                self.queue.extend(tasks);
                tracing::info!(queued, "queued checks");
                (self.settings.queued_delay(), queued)
            }
        };

        self.status.store(Arc::new(CheckerStatus {
            last_pass: Some(now),
            next_pass: Some(now + delay),
            last_batch: queued,
        }));

        Ok(delay)
    }

    /// Put a record at the head of the queue; `false` when a check of it is outstanding
    pub fn queue_record(&self, record_id: RecordId) -> bool {
        self.queue.push_record_front(record_id)
    }

    /// Run the task at the head of the queue; `false` when the queue was empty
    ///
    /// The task counts as outstanding until it returns, failed or not.
    pub async fn run_next(&self) -> Result<bool, CheckerError> {
        let Some(running) = self.queue.start() else {
            return Ok(false);
        };

        match running.task() {
            &CheckTask::Record {
                record_id,
                next_field,
            } => {
                let deadline = Instant::now() + self.settings.task_time_budget();
                if let RecordCheckOutcome::Yield(token) =
                    self.check_record(record_id, next_field, deadline).await?
                {
                    self.queue.push_back(CheckTask::Record {
                        record_id: token.record_id,
                        next_field: token.next_field,
                    });
                }
            }
            CheckTask::Url(key) => {
                self.check_url(key).await?;
            }
        }

        Ok(true)
    }

    /// Probe one URL and merge the outcome into its history
    #[tracing::instrument(name = "checker::check_url", skip(self, key), fields(url = %key.url))]
    pub async fn check_url(&self, key: &CheckableUrl) -> Result<Verdict, CheckerError> {
        let started = Instant::now();
        let probe = self.prober.probe(&key.url).await;

        let url_content_valid = if probe.status_code == HTTP_OK {
            self.prober.has_valid_content(&key.url).await
        } else {
            true
        };

        let healthy_redirect = probe.is_redirect() && is_benign_redirect(&key.url, &probe.final_url);
        let final_content_valid = if probe.final_status_code != HTTP_OK || healthy_redirect {
            true
        } else if probe.final_url == key.url {
            url_content_valid
        } else {
            self.prober.has_valid_content(&probe.final_url).await
        };

        let observation = Observation {
            key,
            probe: &probe,
            url_content_valid,
            final_content_valid,
            checked_at: self.clock.now(),
            duration: started.elapsed(),
        };
        let verdict = self
            .store
            .update_url_history(key, &|existing| classify(existing, &observation))
            .await?;

        match &verdict {
            Verdict::Healthy => tracing::debug!(status = probe.status_code, "url is healthy"),
            Verdict::Failing(entry) => tracing::info!(
                status = entry.status_code,
                final_status = entry.final_status_code,
                times_invalid = entry.times_invalid,
                "url is failing"
            ),
        }

        Ok(verdict)
    }
}
