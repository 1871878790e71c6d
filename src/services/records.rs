use crate::{checker::UrlChecker, domain::RecordId, services::ServiceError};

/// Queue a record ahead of scheduled checks
///
/// Returns `false` if a check of the record is already outstanding.
#[tracing::instrument(name = "services::check_record_now", skip(checker))]
pub fn check_record_now(checker: &UrlChecker, record_id: RecordId) -> bool {
    checker.queue_record(record_id)
}

/// Drop URL and record history of a record
#[tracing::instrument(name = "services::forget_record", skip(checker))]
pub async fn forget_record(checker: &UrlChecker, record_id: RecordId) -> Result<(), ServiceError> {
    if checker.store().forget_record(record_id).await? {
        Ok(())
    } else {
        Err(ServiceError::NotFound)
    }
}
