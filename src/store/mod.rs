//! Persistence of URL and record check history, and read access to record fields.

mod memory;
mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    classify::Verdict,
    domain::{CheckableUrl, FieldValue, RecordHistoryEntry, RecordId, UrlHistoryEntry},
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Number of records read per page when walking never-checked records
pub const RECORD_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read-modify-write step applied to the stored history of one URL
pub type ClassifyFn<'a> = dyn Fn(Option<&UrlHistoryEntry>) -> Verdict + Send + Sync + 'a;

/// Selection of failing URLs whose recheck interval has passed
#[derive(Debug, Clone, Copy)]
pub struct UrlDueFilter {
    pub threshold: i32,
    /// Below-threshold URLs checked at or before this instant are due
    pub valid_cutoff: OffsetDateTime,
    /// At-or-above-threshold URLs checked at or before this instant are due
    pub invalid_cutoff: OffsetDateTime,
}

impl UrlDueFilter {
    pub fn matches(&self, entry: &UrlHistoryEntry) -> bool {
        if entry.is_invalid(self.threshold) {
            entry.check_date <= self.invalid_cutoff
        } else {
            entry.check_date <= self.valid_cutoff
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// At or above the invalidation threshold
    Invalid,
    /// Failing, but below the invalidation threshold
    PossiblyInvalid,
    #[default]
    All,
}

/// Selection of failing URLs for reporting
#[derive(Debug, Clone, Copy)]
pub struct FailingUrlFilter {
    pub threshold: i32,
    pub severity: Severity,
    pub include_hidden: bool,
    pub status_code: Option<u16>,
}

impl FailingUrlFilter {
    pub fn matches(&self, entry: &UrlHistoryEntry) -> bool {
        let severity = match self.severity {
            Severity::Invalid => entry.is_invalid(self.threshold),
            Severity::PossiblyInvalid => !entry.is_invalid(self.threshold),
            Severity::All => true,
        };

        severity
            && (self.include_hidden || !entry.hidden)
            && self.status_code.is_none_or(|code| entry.status_code == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodeCount {
    pub status_code: u16,
    pub final_status_code: u16,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistorySummary {
    pub records_checked: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_record_check: Option<OffsetDateTime>,
    pub failing_urls: u64,
    pub invalid_urls: u64,
    pub hidden_urls: u64,
}

/// Current checkable field values of records
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Checkable fields of a record, `None` when the record no longer exists
    async fn record_fields(
        &self,
        record_id: RecordId,
    ) -> Result<Option<Vec<FieldValue>>, StoreError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Records with checkable fields that were never checked
    async fn count_never_checked(&self) -> Result<u64, StoreError>;

    /// Page of never-checked records in ascending id order, strictly after `after`
    async fn never_checked_records(
        &self,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError>;

    /// Records last checked strictly before `before`
    async fn count_records_due(&self, before: OffsetDateTime) -> Result<u64, StoreError>;

    /// Page of records last checked strictly before `before`, oldest check first
    async fn records_due(
        &self,
        before: OffsetDateTime,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError>;

    async fn count_urls_due(&self, filter: &UrlDueFilter) -> Result<u64, StoreError>;

    /// Page of failing URLs due for a recheck, oldest check first
    async fn urls_due(
        &self,
        filter: &UrlDueFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CheckableUrl>, StoreError>;

    /// Replace the history of one URL with the outcome of `classify`
    ///
    /// The stored entry is read, classified and replaced while holding the history lock.
    /// A failing verdict deletes the old row and inserts the new one; a healthy verdict
    /// only deletes.
    async fn update_url_history(
        &self,
        key: &CheckableUrl,
        classify: &ClassifyFn<'_>,
    ) -> Result<Verdict, StoreError>;

    /// Create or move forward the check date of a record
    async fn record_checked(
        &self,
        record_id: RecordId,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    async fn record_history(
        &self,
        record_id: RecordId,
    ) -> Result<Option<RecordHistoryEntry>, StoreError>;

    async fn url_history_for_record(
        &self,
        record_id: RecordId,
    ) -> Result<Vec<UrlHistoryEntry>, StoreError>;

    async fn url_history(
        &self,
        key: &CheckableUrl,
    ) -> Result<Option<UrlHistoryEntry>, StoreError>;

    /// Returns the number of rows deleted
    async fn delete_url_history(&self, keys: &[CheckableUrl]) -> Result<u64, StoreError>;

    /// Drop all history of a record; `false` when there was none
    async fn forget_record(&self, record_id: RecordId) -> Result<bool, StoreError>;

    /// Returns `false` when the URL has no history
    async fn set_hidden(&self, key: &CheckableUrl, hidden: bool) -> Result<bool, StoreError>;

    /// Failing URLs ordered by record, field and URL
    async fn failing_urls(
        &self,
        filter: &FailingUrlFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UrlHistoryEntry>, StoreError>;

    async fn count_failing_urls(&self, filter: &FailingUrlFilter) -> Result<u64, StoreError>;

    /// Failing URLs grouped by status and final status, most frequent first
    async fn status_code_counts(
        &self,
        filter: &FailingUrlFilter,
    ) -> Result<Vec<StatusCodeCount>, StoreError>;

    async fn summary(&self, threshold: i32) -> Result<HistorySummary, StoreError>;

    /// Delete at most `limit` history rows of records that no longer exist
    async fn prune_orphans(&self, limit: usize) -> Result<u64, StoreError>;
}
