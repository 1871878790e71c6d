use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{
    classify::Verdict,
    domain::{CheckableUrl, FieldValue, RecordHistoryEntry, RecordId, UrlHistoryEntry},
    store::{
        ClassifyFn, FailingUrlFilter, HistoryStore, HistorySummary, RecordSource,
        StatusCodeCount, StoreError, UrlDueFilter,
    },
};

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, Vec<FieldValue>>,
    url_history: BTreeMap<CheckableUrl, UrlHistoryEntry>,
    record_history: BTreeMap<RecordId, OffsetDateTime>,
}

/// History and records held in process memory
///
/// One mutex guards every table, so each operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record with its checkable field values
    pub async fn insert_record(&self, record_id: RecordId, fields: Vec<FieldValue>) {
        self.inner.lock().await.records.insert(record_id, fields);
    }

    pub async fn remove_record(&self, record_id: RecordId) {
        self.inner.lock().await.records.remove(&record_id);
    }

    pub async fn put_url_history(&self, entry: UrlHistoryEntry) {
        self.inner
            .lock()
            .await
            .url_history
            .insert(entry.key.clone(), entry);
    }

    pub async fn put_record_history(&self, record_id: RecordId, at: OffsetDateTime) {
        self.inner.lock().await.record_history.insert(record_id, at);
    }
}

fn page<T>(items: impl Iterator<Item = T>, offset: usize, limit: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

#[async_trait]
impl RecordSource for MemoryStore {
    async fn record_fields(
        &self,
        record_id: RecordId,
    ) -> Result<Option<Vec<FieldValue>>, StoreError> {
        Ok(self.inner.lock().await.records.get(&record_id).cloned())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn count_never_checked(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let count = inner
            .records
            .iter()
            .filter(|(id, fields)| !fields.is_empty() && !inner.record_history.contains_key(*id))
            .count();
        Ok(count as u64)
    }

    async fn never_checked_records(
        &self,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError> {
        let inner = self.inner.lock().await;
        let ids = inner
            .records
            .iter()
            .filter(|(id, _)| after.is_none_or(|after| **id > after))
            .filter(|(id, fields)| !fields.is_empty() && !inner.record_history.contains_key(*id))
            .map(|(id, _)| *id);
        Ok(page(ids, 0, limit))
    }

    async fn count_records_due(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let count = inner
            .record_history
            .values()
            .filter(|date| **date < before)
            .count();
        Ok(count as u64)
    }

    async fn records_due(
        &self,
        before: OffsetDateTime,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<(OffsetDateTime, RecordId)> = inner
            .record_history
            .iter()
            .filter(|(_, date)| **date < before)
            .map(|(id, date)| (*date, *id))
            .collect();
        due.sort();
        Ok(page(due.into_iter().map(|(_, id)| id), offset, limit))
    }

    async fn count_urls_due(&self, filter: &UrlDueFilter) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let count = inner
            .url_history
            .values()
            .filter(|entry| filter.matches(entry))
            .count();
        Ok(count as u64)
    }

    async fn urls_due(
        &self,
        filter: &UrlDueFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CheckableUrl>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<&UrlHistoryEntry> = inner
            .url_history
            .values()
            .filter(|entry| filter.matches(entry))
            .collect();
        due.sort_by(|a, b| a.check_date.cmp(&b.check_date).then(a.key.cmp(&b.key)));
        Ok(page(due.into_iter().map(|e| e.key.clone()), offset, limit))
    }

    async fn update_url_history(
        &self,
        key: &CheckableUrl,
        classify: &ClassifyFn<'_>,
    ) -> Result<Verdict, StoreError> {
        let mut inner = self.inner.lock().await;

        let previous = inner.url_history.remove(key);
        let verdict = classify(previous.as_ref());
        if let Verdict::Failing(entry) = &verdict {
            inner.url_history.insert(key.clone(), entry.clone());
        }

        Ok(verdict)
    }

    async fn record_checked(
        &self,
        record_id: RecordId,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        self.inner.lock().await.record_history.insert(record_id, at);
        Ok(())
    }

    async fn record_history(
        &self,
        record_id: RecordId,
    ) -> Result<Option<RecordHistoryEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .record_history
            .get(&record_id)
            .map(|check_date| RecordHistoryEntry {
                record_id,
                check_date: *check_date,
            }))
    }

    async fn url_history_for_record(
        &self,
        record_id: RecordId,
    ) -> Result<Vec<UrlHistoryEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .url_history
            .values()
            .filter(|entry| entry.key.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn url_history(
        &self,
        key: &CheckableUrl,
    ) -> Result<Option<UrlHistoryEntry>, StoreError> {
        Ok(self.inner.lock().await.url_history.get(key).cloned())
    }

    async fn delete_url_history(&self, keys: &[CheckableUrl]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let deleted = keys
            .iter()
            .filter(|key| inner.url_history.remove(*key).is_some())
            .count();
        Ok(deleted as u64)
    }

    async fn forget_record(&self, record_id: RecordId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;

        let before = inner.url_history.len();
        inner
            .url_history
            .retain(|key, _| key.record_id != record_id);
        let urls_removed = inner.url_history.len() != before;
        let record_removed = inner.record_history.remove(&record_id).is_some();

        Ok(urls_removed || record_removed)
    }

    async fn set_hidden(&self, key: &CheckableUrl, hidden: bool) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.url_history.get_mut(key) {
            Some(entry) => {
                entry.hidden = hidden;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn failing_urls(
        &self,
        filter: &FailingUrlFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UrlHistoryEntry>, StoreError> {
        let inner = self.inner.lock().await;
        let entries = inner
            .url_history
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned();
        Ok(page(entries, offset, limit))
    }

    async fn count_failing_urls(&self, filter: &FailingUrlFilter) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let count = inner
            .url_history
            .values()
            .filter(|entry| filter.matches(entry))
            .count();
        Ok(count as u64)
    }

    async fn status_code_counts(
        &self,
        filter: &FailingUrlFilter,
    ) -> Result<Vec<StatusCodeCount>, StoreError> {
        let inner = self.inner.lock().await;

        let mut groups: HashMap<(u16, u16), u64> = HashMap::new();
        for entry in inner.url_history.values().filter(|e| filter.matches(e)) {
            *groups
                .entry((entry.status_code, entry.final_status_code))
                .or_default() += 1;
        }

        let mut counts: Vec<StatusCodeCount> = groups
            .into_iter()
            .map(|((status_code, final_status_code), count)| StatusCodeCount {
                status_code,
                final_status_code,
                count,
            })
            .collect();
        counts.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.status_code.cmp(&b.status_code))
                .then(a.final_status_code.cmp(&b.final_status_code))
        });

        Ok(counts)
    }

    async fn summary(&self, threshold: i32) -> Result<HistorySummary, StoreError> {
        let inner = self.inner.lock().await;
        let urls = inner.url_history.values();

        Ok(HistorySummary {
            records_checked: inner.record_history.len() as u64,
            last_record_check: inner.record_history.values().max().copied(),
            failing_urls: inner.url_history.len() as u64,
            invalid_urls: urls.clone().filter(|e| e.is_invalid(threshold)).count() as u64,
            hidden_urls: urls.filter(|e| e.hidden).count() as u64,
        })
    }

    async fn prune_orphans(&self, limit: usize) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;

        let orphan_urls: Vec<CheckableUrl> = inner
            .url_history
            .keys()
            .filter(|key| !inner.records.contains_key(&key.record_id))
            .take(limit)
            .cloned()
            .collect();
        for key in &orphan_urls {
            inner.url_history.remove(key);
        }

        let orphan_records: Vec<RecordId> = inner
            .record_history
            .keys()
            .filter(|id| !inner.records.contains_key(*id))
            .take(limit - orphan_urls.len())
            .copied()
            .collect();
        for id in &orphan_records {
            inner.record_history.remove(id);
        }

        Ok((orphan_urls.len() + orphan_records.len()) as u64)
    }
}
