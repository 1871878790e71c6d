use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type RecordId = i64;
pub type FieldId = i64;

/// A URL found in one field of one record
///
/// The same URL string in another field or record is tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckableUrl {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub url: String,
}

impl CheckableUrl {
    pub fn new(record_id: RecordId, field_id: FieldId, url: impl Into<String>) -> Self {
        Self {
            record_id,
            field_id,
            url: url.into(),
        }
    }
}

/// Failure history of a URL that is currently failing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlHistoryEntry {
    #[serde(flatten)]
    pub key: CheckableUrl,
    /// Consecutive failures with the same outcome, never below 1
    pub times_invalid: i32,
    pub hidden: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub check_date: OffsetDateTime,
    pub check_duration_ms: i64,
    pub status_code: u16,
    pub reason_phrase: String,
    pub final_url: String,
    pub final_status_code: u16,
    pub final_reason_phrase: String,
    /// The final URL answered 200 with an error page
    pub is_final_url_invalid: bool,
}

impl UrlHistoryEntry {
    /// Reported as invalid rather than possibly invalid
    pub fn is_invalid(&self, threshold: i32) -> bool {
        self.times_invalid >= threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHistoryEntry {
    pub record_id: RecordId,
    #[serde(with = "time::serde::rfc3339")]
    pub check_date: OffsetDateTime,
}
