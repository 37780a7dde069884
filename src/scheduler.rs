//! # Cooperative Scheduler
//!
//! Runs the repeating jobs of a measurement (draw ticks, electrode polling,
//! countdown) as tokio tasks. Every job owns a `CancelToken`; cancelling the
//! scheduler cancels all of them in one call.
//!
//! A job checks its token before every invocation, so once `cancel_all`
//! returns no job starts another run.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

struct ScheduledJob {
    name: &'static str,
    token: CancelToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Run `job` every `period`, first run one period from now
    ///
    /// The job stops itself by returning `ControlFlow::Break`.
    /// Must be called from within a tokio runtime.
    pub fn every<F>(&mut self, name: &'static str, period: Duration, mut job: F) -> CancelToken
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let token = CancelToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        if job().is_break() {
                            break;
                        }
                    }
                }
            }
            log::debug!("Scheduled job '{}' finished", name);
        });

        self.jobs.push(ScheduledJob {
            name,
            token: token.clone(),
            handle,
        });
        token
    }

    /// Cancel every job started by this scheduler
    pub fn cancel_all(&mut self) {
        for job in self.jobs.drain(..) {
            log::debug!("Cancelling scheduled job '{}'", job.name);
            job.token.cancel();
            job.handle.abort();
        }
    }

    /// Number of jobs still running
    pub fn active_jobs(&self) -> usize {
        self.jobs.iter().filter(|job| !job.handle.is_finished()).count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_every_runs_at_period() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.every("count", Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_jobs() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.every("count", Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.active_jobs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_can_stop_itself() {
        let mut scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        scheduler.every("twice", Duration::from_millis(10), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        task.await.unwrap();
        assert!(token.is_cancelled());
    }
}
