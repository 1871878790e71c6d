use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::ApiError,
    app::AppState,
    domain::{CheckableUrl, FieldId, RecordId},
    services::{self, FailingUrlPage, FailingUrlQuery},
    store::StatusCodeCount,
};

#[derive(Serialize, Deserialize)]
pub struct HideRequest {
    pub record_id: RecordId,
    pub field_id: FieldId,
    pub url: String,
    #[serde(default = "default_hidden")]
    pub hidden: bool,
}

fn default_hidden() -> bool {
    true
}

/// GET /api/urls
pub async fn list_urls(
    State(app): State<AppState>,
    Query(query): Query<FailingUrlQuery>,
) -> Result<Json<FailingUrlPage>, ApiError> {
    let page = services::list_failing_urls(&app.checker, &query).await?;
    Ok(Json(page))
}

/// GET /api/urls/status-codes
pub async fn status_codes(
    State(app): State<AppState>,
    Query(query): Query<FailingUrlQuery>,
) -> Result<Json<Vec<StatusCodeCount>>, ApiError> {
    let counts = services::status_code_summary(&app.checker, &query).await?;
    Ok(Json(counts))
}

/// POST /api/urls/hide
pub async fn hide_url(
    State(app): State<AppState>,
    Json(req): Json<HideRequest>,
) -> Result<StatusCode, ApiError> {
    let key = CheckableUrl::new(req.record_id, req.field_id, req.url);

    services::set_url_hidden(&app.checker, &key, req.hidden)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, record_id = key.record_id, "hide failed");
            ApiError::from(e)
        })?;

    Ok(StatusCode::NO_CONTENT)
}
