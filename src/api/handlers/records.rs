use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{api::ApiError, app::AppState, domain::RecordId, services};

#[derive(Serialize, Deserialize)]
pub struct CheckRecordResponse {
    /// `false` when a check of the record was already outstanding
    pub queued: bool,
}

impl IntoResponse for CheckRecordResponse {
    fn into_response(self) -> Response {
        (StatusCode::ACCEPTED, Json(self)).into_response()
    }
}

/// POST /api/records/{id}/check
pub async fn check_record(
    State(app): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> CheckRecordResponse {
    let queued = services::check_record_now(&app.checker, record_id);
    CheckRecordResponse { queued }
}

/// DELETE /api/records/{id}/history
pub async fn forget_record(
    State(app): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> Result<StatusCode, ApiError> {
    services::forget_record(&app.checker, record_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
