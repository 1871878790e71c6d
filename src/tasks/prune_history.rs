use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::Instant;

use crate::checker::UrlChecker;

const BATCH_SIZE: usize = 5_000;

/// Delete history of records that no longer exist, in bounded batches
pub async fn prune_history_task(checker: Arc<UrlChecker>) -> Result<Duration> {
    tracing::info!("Running history prune task...");

    let mut entries_deleted = 0u64;
    let start = Instant::now();
    loop {
        let deleted = checker.store().prune_orphans(BATCH_SIZE).await?;
        entries_deleted += deleted;

        if deleted < BATCH_SIZE as u64 {
            break;
        }
    }

    if entries_deleted > 0 {
        tracing::info!(
            "Deleted {} entries in {} ms",
            entries_deleted,
            start.elapsed().as_millis()
        );
    } else {
        tracing::info!("Nothing to delete");
    }

    Ok(checker.settings().prune_interval())
}
