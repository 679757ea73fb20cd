//! Cancellable periodic task scheduling.
//!
//! Every timer in the engine (render loop, chunk flush, stats, level
//! monitoring) is owned through a [`TaskHandle`]. Dropping or cancelling
//! the handle stops the task, so restarting a component never leaves an
//! orphaned timer behind.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub use tokio_util::sync::CancellationToken;

/// One firing of a periodic task.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// Zero-based tick counter.
    pub index: u64,
    /// When this tick was scheduled to fire.
    pub scheduled: Instant,
}

impl Tick {
    /// How late the tick fired relative to its schedule.
    pub fn lateness(&self) -> Duration {
        Instant::now().saturating_duration_since(self.scheduled)
    }
}

/// Owned handle to a spawned task. The task is aborted when the handle
/// is cancelled or dropped.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task. Safe to call more than once.
    pub fn cancel(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::trace!(task = %self.name, "Task cancelled");
        }
    }

    /// Token cancelled together with this task.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the task has exited on its own or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Spawn `f` every `period`, starting one period from now.
///
/// The closure returns [`ControlFlow::Break`] to end the task. Missed
/// ticks are skipped rather than burst-fired. Must be called from within
/// a Tokio runtime.
pub fn spawn_periodic<F>(name: impl Into<String>, period: Duration, mut f: F) -> TaskHandle
where
    F: FnMut(Tick) -> ControlFlow<()> + Send + 'static,
{
    let name = name.into();
    let token = CancellationToken::new();
    let task_token = token.clone();
    let task_name = name.clone();
    let period = period.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut index = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => break,
                scheduled = interval.tick() => {
                    if f(Tick { index, scheduled }).is_break() {
                        tracing::debug!(task = %task_name, ticks = index + 1, "Periodic task finished");
                        break;
                    }
                    index += 1;
                }
            }
        }
    });

    TaskHandle {
        name,
        token,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn periodic_task_stops_when_cancelled() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let mut handle = spawn_periodic("count", Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn periodic_task_can_break_itself() {
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let handle = spawn_periodic("three", Duration::from_millis(2), move |tick| {
            counter.fetch_add(1, Ordering::SeqCst);
            if tick.index == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn dropping_the_handle_cancels_its_token() {
        let handle = spawn_periodic("idle", Duration::from_secs(60), |_| ControlFlow::Continue(()));
        let token = handle.token();
        let waiter = tokio::spawn(async move { token.cancelled().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
