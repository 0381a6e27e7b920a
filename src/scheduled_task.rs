use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A task scheduled for a specific point in the future.
/// It will automatically execute at that point unless aborted first.
pub struct ScheduledTask<T> {
    task_handle: JoinHandle<T>,
    wait_handle: JoinHandle<()>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Schedule the given task to execute at time `run_at`.
    /// If `run_at` is in the past, the task will execute immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let signal = Arc::new(Notify::new());

        // The task waits on the signal...
        let task_signal = signal.clone();
        let task_handle = tokio::spawn(async move {
            task_signal.notified().await;
            task.await
        });

        // ...which another task gives at the appointed time.
        let sleep_duration = datetime_to_duration(run_at);
        let wait_handle = tokio::spawn(async move {
            tokio::time::sleep(sleep_duration).await;
            signal.notify_one();
        });

        Self {
            task_handle,
            wait_handle,
        }
    }

    /// Stop the task from running, without waiting for it. A task that is
    /// already running stops at its next suspension point.
    pub fn abort(&self) {
        self.wait_handle.abort();
        self.task_handle.abort();
    }
}

/// Implement `Future` for `ScheduledTask` so we can directly `await` it.
impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task_handle).poll(cx)
    }
}

/// Convert a `DateTime` into a duration from the current instant.
/// A `DateTime` in the past will produce a duration of zero.
fn datetime_to_duration(datetime: DateTime<Utc>) -> Duration {
    let target_timestamp = datetime.timestamp_millis();
    let now_timestamp = Utc::now().timestamp_millis();
    let time_diff = u64::try_from(target_timestamp - now_timestamp).unwrap_or(0);
    Duration::from_millis(time_diff)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    #[rocket::async_test]
    async fn runs_at_the_scheduled_time() {
        let start = Utc::now();
        let task = ScheduledTask::new(async { Utc::now() }, start + chrono::Duration::milliseconds(200));
        let ran_at = task.await.unwrap();
        assert!(ran_at - start >= chrono::Duration::milliseconds(150));
    }

    #[rocket::async_test]
    async fn past_times_run_immediately() {
        let task = ScheduledTask::new(async { 42 }, Utc::now() - chrono::Duration::days(1));
        assert_eq!(task.await.unwrap(), 42);
    }

    #[rocket::async_test]
    async fn aborted_tasks_never_run() {
        let ran = Arc::new(AtomicBool::new(false));
        let task_ran = ran.clone();
        let task = ScheduledTask::new(
            async move { task_ran.store(true, Ordering::SeqCst) },
            Utc::now() + chrono::Duration::milliseconds(100),
        );
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
