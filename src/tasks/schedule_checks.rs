use std::{sync::Arc, time::Duration};

use anyhow::Result;

use crate::checker::UrlChecker;

pub async fn schedule_checks_task(checker: Arc<UrlChecker>) -> Result<Duration> {
    let delay = checker.run_scheduling_pass().await?;
    tracing::debug!(next_in_s = delay.as_secs(), "scheduling pass done");

    Ok(delay)
}
