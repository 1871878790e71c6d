use axum::{Json, extract::State};
use serde::Serialize;

use crate::{
    api::ApiError,
    app::AppState,
    services::{self, CheckerStats},
};

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
}

/// GET /api/health
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET /api/status
///
/// History counts and the state of the scheduler.
pub async fn status(State(app): State<AppState>) -> Result<Json<CheckerStats>, ApiError> {
    let stats = services::checker_stats(&app.checker).await?;
    Ok(Json(stats))
}
