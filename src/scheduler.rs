use std::time::Duration;

use tokio::{
    task::JoinSet,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

pub type Task = (&'static str, anyhow::Result<()>);

pub struct Scheduler {
    cancel_token: CancellationToken,
    tasks: JoinSet<Task>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a background task, running it immediately and then again after the delay it returns
    ///
    /// A failed run is logged and retried after `retry_delay`.
    pub fn spawn_task<P, F, Fut>(
        &mut self,
        name: &'static str,
        retry_delay: Duration,
        params: P,
        mut task: F,
    ) where
        P: Clone + Send + Sync + 'static,
        F: FnMut(P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Duration>> + Send + 'static,
    {
        let cancel = self.cancel_token.clone();
        self.tasks.spawn(async move {
            let mut delay = Duration::ZERO;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = time::sleep(delay) => {
                        delay = match task(params.clone()).await {
                            Ok(next) => next,
                            Err(e) => {
                                tracing::error!(error = %e, "Task {name} failed");
                                retry_delay
                            }
                        };
                    }
                }
            }

            (name, Ok(()))
        });
    }

    /// Shutdowns the scheduler, cancelling all tasks and waiting on them to finish within provided timeout in seconds
    ///
    /// Note: upon timeout, remaining tasks are NOT aborted nor drained (currently assuming the app quits afterwards)
    pub async fn shutdown(mut self, timeout_s: u64) {
        self.cancel_token.cancel();

        let timeout = Instant::now() + Duration::from_secs(timeout_s);

        // drain tasks until timeout
        while !self.tasks.is_empty() {
            let remaining = timeout.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match time::timeout(remaining, self.tasks.join_next()).await {
                Ok(Some(join_result)) => match join_result {
                    Ok((name, Ok(()))) => {
                        tracing::info!("Task {name} finished successfully");
                    }
                    Ok((name, Err(e))) => {
                        tracing::error!(error = %e, "Task {name} error");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Task join error");
                    }
                },
                // no tasks left
                Ok(None) => break,
                Err(_) => {
                    tracing::error!("Scheduler timed out when shutting down");
                }
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reruns_after_returned_delay_and_stops_on_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));

        let mut scheduler = Scheduler::new();
        scheduler.spawn_task("count", Duration::from_secs(1), runs.clone(), |runs| async move {
            let n = runs.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                anyhow::bail!("second run fails");
            }
            Ok(Duration::from_secs(10))
        });

        // first run is immediate, the failure is retried after one second
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        scheduler.shutdown(5).await;
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
