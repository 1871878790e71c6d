use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::{
    classify::Verdict,
    domain::{
        CheckableUrl, FieldKind, FieldValue, RecordHistoryEntry, RecordId, UrlHistoryEntry,
    },
    store::{
        ClassifyFn, FailingUrlFilter, HistoryStore, HistorySummary, RecordSource, Severity,
        StatusCodeCount, StoreError, UrlDueFilter,
    },
};

const URL_HISTORY_COLUMNS: &str = "record_id, field_id, url, times_invalid, hidden, check_date, \
     check_duration_ms, status_code, reason_phrase, final_url, final_status_code, \
     final_reason_phrase, is_final_url_invalid";

/// Binds $1 threshold, $2 severity, $3 include_hidden, $4 status_code
const FAILING_URL_FILTER: &str = r#"
    ($2 = 'all'
        OR ($2 = 'invalid' AND times_invalid >= $1)
        OR ($2 = 'possibly_invalid' AND times_invalid < $1))
    AND ($3 OR NOT hidden)
    AND ($4::int IS NULL OR status_code = $4)
"#;

/// Binds $1 threshold, $2 valid cutoff, $3 invalid cutoff
const URL_DUE_FILTER: &str = r#"
    (times_invalid < $1 AND check_date <= $2)
    OR (times_invalid >= $1 AND check_date <= $3)
"#;

#[derive(FromRow)]
struct UrlHistoryRow {
    record_id: i64,
    field_id: i64,
    url: String,
    times_invalid: i32,
    hidden: bool,
    check_date: OffsetDateTime,
    check_duration_ms: i64,
    status_code: i32,
    reason_phrase: String,
    final_url: String,
    final_status_code: i32,
    final_reason_phrase: String,
    is_final_url_invalid: bool,
}

impl TryFrom<UrlHistoryRow> for UrlHistoryEntry {
    type Error = anyhow::Error;

    fn try_from(row: UrlHistoryRow) -> Result<Self, Self::Error> {
        Ok(UrlHistoryEntry {
            key: CheckableUrl::new(row.record_id, row.field_id, row.url),
            times_invalid: row.times_invalid,
            hidden: row.hidden,
            check_date: row.check_date,
            check_duration_ms: row.check_duration_ms,
            status_code: u16::try_from(row.status_code).context("stored status code out of range")?,
            reason_phrase: row.reason_phrase,
            final_url: row.final_url,
            final_status_code: u16::try_from(row.final_status_code)
                .context("stored final status code out of range")?,
            final_reason_phrase: row.final_reason_phrase,
            is_final_url_invalid: row.is_final_url_invalid,
        })
    }
}

fn into_entries(rows: Vec<UrlHistoryRow>) -> Result<Vec<UrlHistoryEntry>, StoreError> {
    rows.into_iter()
        .map(|row| UrlHistoryEntry::try_from(row).map_err(StoreError::Other))
        .collect()
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Invalid => "invalid",
        Severity::PossiblyInvalid => "possibly_invalid",
        Severity::All => "all",
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// History and records kept in PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSource for PgStore {
    #[tracing::instrument(name = "store::record_fields", skip(self))]
    async fn record_fields(
        &self,
        record_id: RecordId,
    ) -> Result<Option<Vec<FieldValue>>, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM records WHERE id = $1)")
            .bind(record_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Ok(None);
        }

        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT f.id, f.kind, COALESCE(v.value, '')
            FROM records r
            JOIN metadata_fields f
                ON f.schema_id = r.schema_id AND f.enabled AND f.kind IN ('url', 'rich_text')
            LEFT JOIN record_field_values v
                ON v.record_id = r.id AND v.field_id = f.id
            WHERE r.id = $1
            ORDER BY f.id
            "#,
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        let fields = rows
            .into_iter()
            .filter_map(|(field_id, kind, value)| {
                FieldKind::parse(&kind).map(|kind| FieldValue::new(field_id, kind, value))
            })
            .collect();

        Ok(Some(fields))
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn count_never_checked(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM records r
            WHERE EXISTS (
                SELECT 1 FROM metadata_fields f
                WHERE f.schema_id = r.schema_id AND f.enabled AND f.kind IN ('url', 'rich_text')
            )
            AND NOT EXISTS (
                SELECT 1 FROM url_checker_record_history h WHERE h.record_id = r.id
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn never_checked_records(
        &self,
        after: Option<RecordId>,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT r.id
            FROM records r
            WHERE ($1::bigint IS NULL OR r.id > $1)
            AND EXISTS (
                SELECT 1 FROM metadata_fields f
                WHERE f.schema_id = r.schema_id AND f.enabled AND f.kind IN ('url', 'rich_text')
            )
            AND NOT EXISTS (
                SELECT 1 FROM url_checker_record_history h WHERE h.record_id = r.id
            )
            ORDER BY r.id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn count_records_due(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM url_checker_record_history WHERE check_date < $1",
        )
        .bind(before)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn records_due(
        &self,
        before: OffsetDateTime,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RecordId>, StoreError> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT record_id
            FROM url_checker_record_history
            WHERE check_date < $1
            ORDER BY check_date, record_id
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(before)
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn count_urls_due(&self, filter: &UrlDueFilter) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM url_checker_url_history WHERE {URL_DUE_FILTER}"
        ))
        .bind(filter.threshold)
        .bind(filter.valid_cutoff)
        .bind(filter.invalid_cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn urls_due(
        &self,
        filter: &UrlDueFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CheckableUrl>, StoreError> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(&format!(
            r#"
            SELECT record_id, field_id, url
            FROM url_checker_url_history
            WHERE {URL_DUE_FILTER}
            ORDER BY check_date, record_id, field_id, url
            OFFSET $4
            LIMIT $5
            "#
        ))
        .bind(filter.threshold)
        .bind(filter.valid_cutoff)
        .bind(filter.invalid_cutoff)
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(record_id, field_id, url)| CheckableUrl::new(record_id, field_id, url))
            .collect())
    }

    #[tracing::instrument(name = "store::update_url_history", skip(self, classify))]
    async fn update_url_history(
        &self,
        key: &CheckableUrl,
        classify: &ClassifyFn<'_>,
    ) -> Result<Verdict, StoreError> {
        let mut tx = self.pool.begin().await?;

        // serializes concurrent checks of the same URL until commit
        sqlx::query("LOCK TABLE url_checker_url_history IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let previous: Option<UrlHistoryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {URL_HISTORY_COLUMNS}
            FROM url_checker_url_history
            WHERE record_id = $1 AND field_id = $2 AND url = $3
            "#
        ))
        .bind(key.record_id)
        .bind(key.field_id)
        .bind(&key.url)
        .fetch_optional(&mut *tx)
        .await?;
        let previous = previous
            .map(UrlHistoryEntry::try_from)
            .transpose()
            .map_err(StoreError::Other)?;

        let verdict = classify(previous.as_ref());

        sqlx::query(
            "DELETE FROM url_checker_url_history WHERE record_id = $1 AND field_id = $2 AND url = $3",
        )
        .bind(key.record_id)
        .bind(key.field_id)
        .bind(&key.url)
        .execute(&mut *tx)
        .await?;

        if let Verdict::Failing(entry) = &verdict {
            sqlx::query(&format!(
                r#"
                INSERT INTO url_checker_url_history ({URL_HISTORY_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#
            ))
            .bind(entry.key.record_id)
            .bind(entry.key.field_id)
            .bind(&entry.key.url)
            .bind(entry.times_invalid)
            .bind(entry.hidden)
            .bind(entry.check_date)
            .bind(entry.check_duration_ms)
            .bind(i32::from(entry.status_code))
            .bind(&entry.reason_phrase)
            .bind(&entry.final_url)
            .bind(i32::from(entry.final_status_code))
            .bind(&entry.final_reason_phrase)
            .bind(entry.is_final_url_invalid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(verdict)
    }

    async fn record_checked(
        &self,
        record_id: RecordId,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO url_checker_record_history (record_id, check_date)
            VALUES ($1, $2)
            ON CONFLICT (record_id) DO UPDATE SET check_date = EXCLUDED.check_date
            "#,
        )
        .bind(record_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_history(
        &self,
        record_id: RecordId,
    ) -> Result<Option<RecordHistoryEntry>, StoreError> {
        let check_date: Option<OffsetDateTime> = sqlx::query_scalar(
            "SELECT check_date FROM url_checker_record_history WHERE record_id = $1",
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(check_date.map(|check_date| RecordHistoryEntry {
            record_id,
            check_date,
        }))
    }

    async fn url_history_for_record(
        &self,
        record_id: RecordId,
    ) -> Result<Vec<UrlHistoryEntry>, StoreError> {
        let rows: Vec<UrlHistoryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {URL_HISTORY_COLUMNS}
            FROM url_checker_url_history
            WHERE record_id = $1
            ORDER BY field_id, url
            "#
        ))
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    async fn url_history(
        &self,
        key: &CheckableUrl,
    ) -> Result<Option<UrlHistoryEntry>, StoreError> {
        let row: Option<UrlHistoryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {URL_HISTORY_COLUMNS}
            FROM url_checker_url_history
            WHERE record_id = $1 AND field_id = $2 AND url = $3
            "#
        ))
        .bind(key.record_id)
        .bind(key.field_id)
        .bind(&key.url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UrlHistoryEntry::try_from)
            .transpose()
            .map_err(StoreError::Other)
    }

    async fn delete_url_history(&self, keys: &[CheckableUrl]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let record_ids: Vec<i64> = keys.iter().map(|k| k.record_id).collect();
        let field_ids: Vec<i64> = keys.iter().map(|k| k.field_id).collect();
        let urls: Vec<&str> = keys.iter().map(|k| k.url.as_str()).collect();

        let result = sqlx::query(
            r#"
            DELETE FROM url_checker_url_history h
            USING UNNEST($1::bigint[], $2::bigint[], $3::text[]) AS k(record_id, field_id, url)
            WHERE h.record_id = k.record_id AND h.field_id = k.field_id AND h.url = k.url
            "#,
        )
        .bind(&record_ids)
        .bind(&field_ids)
        .bind(&urls)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "store::forget_record", skip(self))]
    async fn forget_record(&self, record_id: RecordId) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let urls = sqlx::query("DELETE FROM url_checker_url_history WHERE record_id = $1")
            .bind(record_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let records = sqlx::query("DELETE FROM url_checker_record_history WHERE record_id = $1")
            .bind(record_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        Ok(urls + records > 0)
    }

    async fn set_hidden(&self, key: &CheckableUrl, hidden: bool) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE url_checker_url_history
            SET hidden = $4
            WHERE record_id = $1 AND field_id = $2 AND url = $3
            "#,
        )
        .bind(key.record_id)
        .bind(key.field_id)
        .bind(&key.url)
        .bind(hidden)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn failing_urls(
        &self,
        filter: &FailingUrlFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UrlHistoryEntry>, StoreError> {
        let rows: Vec<UrlHistoryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {URL_HISTORY_COLUMNS}
            FROM url_checker_url_history
            WHERE {FAILING_URL_FILTER}
            ORDER BY record_id, field_id, url
            OFFSET $5
            LIMIT $6
            "#
        ))
        .bind(filter.threshold)
        .bind(severity_str(filter.severity))
        .bind(filter.include_hidden)
        .bind(filter.status_code.map(i32::from))
        .bind(to_i64(offset))
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    async fn count_failing_urls(&self, filter: &FailingUrlFilter) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM url_checker_url_history WHERE {FAILING_URL_FILTER}"
        ))
        .bind(filter.threshold)
        .bind(severity_str(filter.severity))
        .bind(filter.include_hidden)
        .bind(filter.status_code.map(i32::from))
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn status_code_counts(
        &self,
        filter: &FailingUrlFilter,
    ) -> Result<Vec<StatusCodeCount>, StoreError> {
        let rows: Vec<(i32, i32, i64)> = sqlx::query_as(&format!(
            r#"
            SELECT status_code, final_status_code, COUNT(*) AS n
            FROM url_checker_url_history
            WHERE {FAILING_URL_FILTER}
            GROUP BY status_code, final_status_code
            ORDER BY n DESC, status_code, final_status_code
            "#
        ))
        .bind(filter.threshold)
        .bind(severity_str(filter.severity))
        .bind(filter.include_hidden)
        .bind(filter.status_code.map(i32::from))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status_code, final_status_code, count)| -> Result<_, StoreError> {
                Ok(StatusCodeCount {
                    status_code: u16::try_from(status_code)
                        .context("stored status code out of range")?,
                    final_status_code: u16::try_from(final_status_code)
                        .context("stored final status code out of range")?,
                    count: count as u64,
                })
            })
            .collect()
    }

    #[tracing::instrument(name = "store::summary", skip(self))]
    async fn summary(&self, threshold: i32) -> Result<HistorySummary, StoreError> {
        let (records_checked, last_record_check, failing_urls, invalid_urls, hidden_urls): (
            i64,
            Option<OffsetDateTime>,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM url_checker_record_history),
                (SELECT MAX(check_date) FROM url_checker_record_history),
                COUNT(*),
                COUNT(*) FILTER (WHERE times_invalid >= $1),
                COUNT(*) FILTER (WHERE hidden)
            FROM url_checker_url_history
            "#,
        )
        .bind(threshold)
        .fetch_one(&self.pool)
        .await?;

        Ok(HistorySummary {
            records_checked: records_checked as u64,
            last_record_check,
            failing_urls: failing_urls as u64,
            invalid_urls: invalid_urls as u64,
            hidden_urls: hidden_urls as u64,
        })
    }

    async fn prune_orphans(&self, limit: usize) -> Result<u64, StoreError> {
        let urls: i64 = sqlx::query_scalar(
            r#"
            WITH orphans AS (
                SELECT h.record_id, h.field_id, h.url
                FROM url_checker_url_history h
                WHERE NOT EXISTS (SELECT 1 FROM records r WHERE r.id = h.record_id)
                ORDER BY h.record_id
                LIMIT $1
            ),
            deleted AS (
                DELETE FROM url_checker_url_history h
                USING orphans o
                WHERE h.record_id = o.record_id AND h.field_id = o.field_id AND h.url = o.url
                RETURNING 1
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(to_i64(limit))
        .fetch_one(&self.pool)
        .await?;

        let remaining = limit.saturating_sub(urls as usize);
        if remaining == 0 {
            return Ok(urls as u64);
        }

        let records: i64 = sqlx::query_scalar(
            r#"
            WITH orphans AS (
                SELECT h.record_id
                FROM url_checker_record_history h
                WHERE NOT EXISTS (SELECT 1 FROM records r WHERE r.id = h.record_id)
                ORDER BY h.record_id
                LIMIT $1
            ),
            deleted AS (
                DELETE FROM url_checker_record_history h
                USING orphans o
                WHERE h.record_id = o.record_id
                RETURNING 1
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(to_i64(remaining))
        .fetch_one(&self.pool)
        .await?;

        Ok((urls + records) as u64)
    }
}
