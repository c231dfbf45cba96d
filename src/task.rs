//! Periodic background tasks.
//!
//! [`PeriodicTask`] runs an async job on a fixed interval until stopped.
//! A busy flag guarantees the job never overlaps itself, whether the
//! overlapping run comes from the next tick or from a manual
//! [`trigger`](PeriodicTask::trigger). Missed ticks are skipped rather than
//! replayed in a burst.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

type Job = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handle to a running periodic job.
pub struct PeriodicTask {
    name: &'static str,
    job: Job,
    busy: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `job` every `period`. The first run happens one period after
    /// start, not immediately.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(job())
        });
        let busy = Arc::new(AtomicBool::new(false));
        let (shutdown, mut stop_rx) = watch::channel(false);

        let handle = {
            let job = Arc::clone(&job);
            let busy = Arc::clone(&busy);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(
                    tokio::time::Instant::now() + period,
                    period.max(Duration::from_millis(1)),
                );
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            run_guarded(name, &job, &busy).await;
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
                debug!(task = name, "periodic task stopped");
            })
        };

        Self {
            name,
            job,
            busy,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the job now. Returns `false` if a run was already in progress.
    pub async fn trigger(&self) -> bool {
        run_guarded(self.name, &self.job, &self.busy).await
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the schedule and wait for an in-flight run to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Clears the busy flag when a run ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn run_guarded(name: &'static str, job: &Job, busy: &AtomicBool) -> bool {
    if busy
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!(task = name, "previous run still in progress, skipping");
        return false;
    }
    let _busy = BusyGuard(busy);
    // a panicking run surfaces as a JoinError instead of killing the loop
    if let Err(e) = tokio::spawn(job()).await {
        warn!(task = name, error = %e, "periodic run failed");
    }
    true
}
