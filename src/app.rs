use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{
    checker::UrlChecker, clock::SystemClock, config::CheckerSettings, probe::HttpProber,
    store::PgStore,
};

#[derive(Clone)]
pub struct AppState {
    pub checker: Arc<UrlChecker>,
}

impl AppState {
    pub fn new(checker: Arc<UrlChecker>) -> Self {
        Self { checker }
    }
}

pub async fn connect_to_db(database_url: &str) -> Result<PgPool> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    // Run SQL migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("SQL migrations failed")?;

    Ok(pool)
}

/// Checker backed by PostgreSQL, probing over the network on the system clock
pub fn build_checker(pool: PgPool, settings: &CheckerSettings) -> Result<UrlChecker> {
    let store = Arc::new(PgStore::new(pool));
    let prober = HttpProber::new(settings).context("Failed to build the HTTP prober")?;

    Ok(UrlChecker::new(
        store.clone(),
        store,
        Arc::new(prober),
        Arc::new(SystemClock),
        settings.clone(),
    ))
}
