use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;

use crate::{
    api,
    app::{self, AppState},
    checker::UrlChecker,
    config::Settings,
    scheduler::Scheduler,
    tasks,
};

const SHUTDOWN_TIMEOUT_S: u64 = 30;

/// Start the scheduling, checking and pruning loops of a checker
pub fn spawn_checker_tasks(scheduler: &mut Scheduler, checker: Arc<UrlChecker>) {
    let retry_delay = checker.settings().retry_delay();

    scheduler.spawn_task(
        "schedule_checks",
        retry_delay,
        checker.clone(),
        tasks::schedule_checks_task,
    );
    scheduler.spawn_task(
        "run_checks",
        retry_delay,
        checker.clone(),
        tasks::run_checks_task,
    );
    scheduler.spawn_task(
        "prune_history",
        retry_delay,
        checker,
        tasks::prune_history_task,
    );
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

pub async fn run(config: Settings) -> Result<()> {
    let pool = app::connect_to_db(config.database_url.as_str()).await?;
    let checker = Arc::new(app::build_checker(pool, &config.checker)?);

    let mut scheduler = Scheduler::new();
    spawn_checker_tasks(&mut scheduler, checker.clone());

    let router = api::build_router(AppState::new(checker));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("App running on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown(SHUTDOWN_TIMEOUT_S).await;

    Ok(())
}
