use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::Instant;

use crate::checker::UrlChecker;

/// Delay between looks at an empty queue
pub const POLL_DELAY: Duration = Duration::from_secs(5);

/// Work through the check queue until it is empty
pub async fn run_checks_task(checker: Arc<UrlChecker>) -> Result<Duration> {
    let start = Instant::now();
    let mut ran = 0usize;

    while checker.run_next().await? {
        ran += 1;
    }

    if ran > 0 {
        tracing::info!(
            "Ran {} checks in {} ms",
            ran,
            start.elapsed().as_millis()
        );
    }

    Ok(POLL_DELAY)
}
