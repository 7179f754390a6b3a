//! The public handle for scheduling delayed work.
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::Instant,
};
use tracing::{debug, warn};

use crate::{
    cancellation::CancellationSet,
    config::Config,
    coordinator::{Command, Coordinator, ShutdownReport, Snapshot},
    spawn,
    task::{IdSource, Task, TaskId},
};

const CONTROL_CAPACITY: usize = 8;

// Delays too large to represent are treated as this far away.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Errors returned by a `DelayQueue`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The queue was shut down.
    #[error("The delay queue has been shut down")]
    Closed,

    /// The request queue is at capacity.
    #[error("The request queue is full")]
    Full,

    /// The queue stopped before it replied.
    #[error("The delay queue stopped before replying")]
    Stopped,
}

impl<T> From<TrySendError<T>> for Error {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::Full,
            TrySendError::Closed(_) => Self::Closed,
        }
    }
}

/// Schedule callbacks to run once after a delay.
///
/// Cloning the handle is cheap; all clones share the same queue.
#[derive(Debug, Clone)]
pub struct DelayQueue {
    add_tx: mpsc::Sender<Task>,
    remove_tx: mpsc::Sender<TaskId>,
    control_tx: mpsc::Sender<Command>,
    ids: Arc<IdSource>,
}

impl DelayQueue {
    /// Create a queue and start its coordinator.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let add_capacity = non_zero(config.add_capacity, "add_capacity");
        let remove_capacity = non_zero(config.remove_capacity, "remove_capacity");

        let (add_tx, add_rx) = mpsc::channel(add_capacity);
        let (remove_tx, remove_rx) = mpsc::channel(remove_capacity);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let ids = Arc::new(IdSource::new());

        let coordinator = Coordinator::new(
            ids.clone(),
            CancellationSet::new(config.cancellation_ttl()),
            add_rx,
            remove_rx,
            control_rx,
        );
        spawn("coordinator", coordinator.run());

        Self {
            add_tx,
            remove_tx,
            control_tx,
            ids,
        }
    }

    /// Create a queue with the default configuration.
    #[must_use]
    pub fn default_queue() -> Self {
        Self::new(&Config::default())
    }

    fn task(&self, fire_time: Instant, work: impl FnOnce() + Send + 'static) -> Task {
        Task::new(self.ids.next_id(), fire_time, Box::new(work))
    }

    /// Run `work` once `delay` has elapsed.
    ///
    /// Waits if the add queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was shut down.
    pub async fn push(
        &self,
        delay: Duration,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<TaskId, Error> {
        self.push_at(fire_time_after(delay), work).await
    }

    /// Run `work` once `fire_time` has been reached.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was shut down.
    pub async fn push_at(
        &self,
        fire_time: Instant,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<TaskId, Error> {
        let permit = self.add_tx.reserve().await.map_err(|_| Error::Closed)?;
        let task = self.task(fire_time, work);
        let id = task.id.clone();
        permit.send(task);
        debug!("{id}: pushed");
        Ok(id)
    }

    /// Like `push`, but fails instead of waiting when the add queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Error::Full` if the add queue is at capacity, or `Error::Closed` if the queue was
    /// shut down.
    pub fn try_push(
        &self,
        delay: Duration,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<TaskId, Error> {
        // No id is issued unless the task can be queued.
        let permit = self.add_tx.try_reserve()?;
        let task = self.task(fire_time_after(delay), work);
        let id = task.id.clone();
        permit.send(task);
        Ok(id)
    }

    /// Like `push`, but blocks the current thread. Must not be called from async code.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was shut down.
    pub fn blocking_push(
        &self,
        delay: Duration,
        work: impl FnOnce() + Send + 'static,
    ) -> Result<TaskId, Error> {
        let task = self.task(fire_time_after(delay), work);
        let id = task.id.clone();
        self.add_tx.blocking_send(task).map_err(|_| Error::Closed)?;
        Ok(id)
    }

    /// Ask for the task with this id not to run.
    ///
    /// Unknown and already fired ids are silently accepted. Waits if the remove queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was shut down.
    pub async fn delete(&self, id: &TaskId) -> Result<(), Error> {
        self.remove_tx
            .send(id.clone())
            .await
            .map_err(|_| Error::Closed)?;
        debug!("{id}: delete requested");
        Ok(())
    }

    /// Like `delete`, but fails instead of waiting when the remove queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Error::Full` if the remove queue is at capacity, or `Error::Closed` if the queue
    /// was shut down.
    pub fn try_delete(&self, id: &TaskId) -> Result<(), Error> {
        self.remove_tx.try_send(id.clone())?;
        Ok(())
    }

    /// Like `delete`, but blocks the current thread. Must not be called from async code.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was shut down.
    pub fn blocking_delete(&self, id: &TaskId) -> Result<(), Error> {
        self.remove_tx
            .blocking_send(id.clone())
            .map_err(|_| Error::Closed)
    }

    /// Get the pending state as the coordinator currently sees it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was shut down, or `Error::Stopped` if it stopped
    /// before replying.
    pub async fn snapshot(&self) -> Result<Snapshot, Error> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Stopped)
    }

    /// Stop the queue. Pending tasks are dropped without running.
    ///
    /// Callbacks that were already dispatched are not affected.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` if the queue was already shut down, or `Error::Stopped` if it
    /// stopped before replying.
    pub async fn shutdown(&self) -> Result<ShutdownReport, Error> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(Command::Shutdown(tx))
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Stopped)
    }
}

fn fire_time_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

fn non_zero(capacity: usize, name: &str) -> usize {
    if capacity == 0 {
        warn!("{name} of 0 is not allowed, using 1");
        1
    } else {
        capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_try_push_full() {
        let config = Config {
            add_capacity: 1,
            ..Config::default()
        };
        let queue = DelayQueue::new(&config);

        // Without yielding the coordinator never gets to drain the add queue.
        queue.try_push(Duration::from_secs(1), || {}).unwrap();
        let result = queue.try_push(Duration::from_secs(1), || {});
        assert_eq!(result, Err(Error::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_push_issues_no_id() {
        let config = Config {
            add_capacity: 1,
            ..Config::default()
        };
        let queue = DelayQueue::new(&config);

        let first = queue.try_push(Duration::from_secs(1), || {}).unwrap();
        assert_eq!(
            queue.try_push(Duration::from_secs(1), || {}),
            Err(Error::Full)
        );

        // The rejected push did not use up a sequence number.
        let next = queue.ids.next_id();
        assert_eq!(&first.as_str()[..8], &next.as_str()[..8]);
        assert_eq!(&next.as_str()[8..], format!("{:016x}", 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_delete_full() {
        let config = Config {
            remove_capacity: 1,
            ..Config::default()
        };
        let queue = DelayQueue::new(&config);

        // While idle the coordinator does not read remove requests.
        queue.try_delete(&TaskId::new("a")).unwrap();
        tokio::task::yield_now().await;
        let result = queue.try_delete(&TaskId::new("b"));
        assert_eq!(result, Err(Error::Full));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_after_shutdown() {
        let queue = DelayQueue::default_queue();
        let report = queue.shutdown().await.unwrap();
        assert_eq!(report.dropped, 0);

        queue.control_tx.closed().await;
        let result = queue.push(Duration::from_millis(1), || {}).await;
        assert_eq!(result, Err(Error::Closed));
        let result = queue.delete(&TaskId::new("a")).await;
        assert_eq!(result, Err(Error::Closed));
        assert_eq!(queue.snapshot().await, Err(Error::Closed));
        assert_eq!(queue.shutdown().await, Err(Error::Closed));
    }

    #[test]
    fn test_huge_delay_does_not_overflow() {
        let now = Instant::now();
        let fire_time = fire_time_after(Duration::MAX);
        assert!(fire_time > now);
    }
}
