use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::{api::handlers, app::AppState};

pub fn build_router(state: AppState) -> Router {
    let urls_api = Router::new()
        .route("/", get(handlers::list_urls))
        .route("/status-codes", get(handlers::status_codes))
        .route("/hide", post(handlers::hide_url));

    let records_api = Router::new()
        .route("/{id}/check", post(handlers::check_record))
        .route("/{id}/history", delete(handlers::forget_record));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .nest("/urls", urls_api)
        .nest("/records", records_api);

    Router::new().nest("/api", api).with_state(state)
}
