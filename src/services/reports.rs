use serde::{Deserialize, Serialize};

use crate::{
    checker::{CheckerStatus, UrlChecker},
    domain::{CheckableUrl, UrlHistoryEntry},
    services::ServiceError,
    store::{FailingUrlFilter, HistorySummary, Severity, StatusCodeCount},
};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FailingUrlQuery {
    pub severity: Severity,
    pub include_hidden: bool,
    pub status_code: Option<u16>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailingUrlPage {
    pub total: u64,
    pub threshold: i32,
    pub items: Vec<FailingUrl>,
}

/// A failing URL as reported to administrators
#[derive(Debug, Serialize, Deserialize)]
pub struct FailingUrl {
    #[serde(flatten)]
    pub entry: UrlHistoryEntry,
    /// At or above the invalidation threshold
    pub invalid: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckerStats {
    pub threshold: i32,
    pub queued: usize,
    #[serde(flatten)]
    pub history: HistorySummary,
    #[serde(flatten)]
    pub status: CheckerStatus,
}

fn filter(checker: &UrlChecker, query: &FailingUrlQuery) -> FailingUrlFilter {
    FailingUrlFilter {
        threshold: checker.settings().invalidation_threshold,
        severity: query.severity,
        include_hidden: query.include_hidden,
        status_code: query.status_code,
    }
}

/// Page of failing URLs with the total for the same filter
#[tracing::instrument(name = "services::list_failing_urls", skip(checker))]
pub async fn list_failing_urls(
    checker: &UrlChecker,
    query: &FailingUrlQuery,
) -> Result<FailingUrlPage, ServiceError> {
    let filter = filter(checker, query);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);

    let store = checker.store();
    let total = store.count_failing_urls(&filter).await?;
    let items = store
        .failing_urls(&filter, query.offset, limit)
        .await?
        .into_iter()
        .map(|entry| FailingUrl {
            invalid: entry.is_invalid(filter.threshold),
            entry,
        })
        .collect();

    Ok(FailingUrlPage {
        total,
        threshold: filter.threshold,
        items,
    })
}

/// Failing URLs grouped by status and final status
#[tracing::instrument(name = "services::status_code_summary", skip(checker))]
pub async fn status_code_summary(
    checker: &UrlChecker,
    query: &FailingUrlQuery,
) -> Result<Vec<StatusCodeCount>, ServiceError> {
    let counts = checker
        .store()
        .status_code_counts(&filter(checker, query))
        .await?;

    Ok(counts)
}

/// Hide or unhide a failing URL from the default report
///
/// The flag survives repeat failures with the same outcome and is cleared when the
/// outcome changes.
#[tracing::instrument(name = "services::set_url_hidden", skip(checker))]
pub async fn set_url_hidden(
    checker: &UrlChecker,
    key: &CheckableUrl,
    hidden: bool,
) -> Result<(), ServiceError> {
    if checker.store().set_hidden(key, hidden).await? {
        Ok(())
    } else {
        Err(ServiceError::NotFound)
    }
}

#[tracing::instrument(name = "services::checker_stats", skip(checker))]
pub async fn checker_stats(checker: &UrlChecker) -> Result<CheckerStats, ServiceError> {
    let threshold = checker.settings().invalidation_threshold;
    let history = checker.store().summary(threshold).await?;

    Ok(CheckerStats {
        threshold,
        queued: checker.queued(),
        history,
        status: checker.status(),
    })
}
