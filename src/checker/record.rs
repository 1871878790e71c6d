use std::collections::HashSet;

use tokio::time::Instant;

use crate::{
    checker::{CheckerError, UrlChecker},
    domain::{CheckableUrl, RecordId},
};

/// Where an interrupted record check picks up again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeToken {
    pub record_id: RecordId,
    /// Index of the first field not yet checked
    pub next_field: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCheckOutcome {
    /// Every field was checked and the record history moved forward
    Completed { urls_checked: usize },
    /// The time budget ran low before all fields were checked
    Yield(ResumeToken),
    /// The record no longer exists and its history was dropped
    Forgotten,
}

impl UrlChecker {
    /// Check the fields of a record, starting at field `start_field`
    ///
    /// Before each field after the first one, the time left until `deadline` is compared
    /// with the minimum time per field; when it is lower the check stops and returns a
    /// resume token. Stale URL history is only cleared once every field was checked.
    #[tracing::instrument(name = "checker::check_record", skip(self, deadline))]
    pub async fn check_record(
        &self,
        record_id: RecordId,
        start_field: usize,
        deadline: Instant,
    ) -> Result<RecordCheckOutcome, CheckerError> {
        let Some(fields) = self.records.record_fields(record_id).await? else {
            self.store.forget_record(record_id).await?;
            tracing::info!("record no longer exists, history dropped");
            return Ok(RecordCheckOutcome::Forgotten);
        };

        let min_time = self.settings.min_time_per_field();
        let mut urls_checked = 0;

        for (index, field) in fields.iter().enumerate().skip(start_field) {
            if index > start_field && deadline.saturating_duration_since(Instant::now()) < min_time {
                tracing::debug!(next_field = index, "time budget low, yielding");
                return Ok(RecordCheckOutcome::Yield(ResumeToken {
                    record_id,
                    next_field: index,
                }));
            }

            for url in field.urls() {
                self.check_url(&CheckableUrl::new(record_id, field.field_id, url))
                    .await?;
                urls_checked += 1;
            }
        }

        let current: HashSet<CheckableUrl> = fields
            .iter()
            .flat_map(|field| {
                field
                    .urls()
                    .into_iter()
                    .map(|url| CheckableUrl::new(record_id, field.field_id, url))
            })
            .collect();
        let stale: Vec<CheckableUrl> = self
            .store
            .url_history_for_record(record_id)
            .await?
            .into_iter()
            .map(|entry| entry.key)
            .filter(|key| !current.contains(key))
            .collect();
        if !stale.is_empty() {
            let deleted = self.store.delete_url_history(&stale).await?;
            tracing::debug!(deleted, "dropped history of urls no longer in the record");
        }

        self.store.record_checked(record_id, self.clock.now()).await?;

        Ok(RecordCheckOutcome::Completed { urls_checked })
    }
}
