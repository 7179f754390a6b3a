//! The event loop that owns all scheduling state.
//!
//! The coordinator is the only code that touches the pending store and the cancellation set.
//! Everybody else talks to it through bounded channels.
use std::sync::Arc;

use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    cancellation::CancellationSet,
    store::PendingStore,
    task::{IdSource, Task, TaskId},
};

/// The pending state as seen by the coordinator between two events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Fire times of pending tasks, in the order they will be evaluated.
    pub fire_times: Vec<Instant>,

    /// Number of cancellations waiting for their task.
    pub cancellations: usize,
}

/// What was left behind when the queue was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pending tasks that were dropped without firing.
    pub dropped: usize,

    /// Cancellations that were never matched.
    pub cancellations: usize,
}

pub(crate) enum Command {
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<ShutdownReport>),
}

enum Event {
    Expired(Instant),
    Add(Option<Task>),
    Remove(Option<TaskId>),
    Control(Option<Command>),
}

pub(crate) struct Coordinator {
    store: PendingStore,
    cancellations: CancellationSet,
    ids: Arc<IdSource>,
    add_rx: mpsc::Receiver<Task>,
    remove_rx: mpsc::Receiver<TaskId>,
    control_rx: mpsc::Receiver<Command>,
    adds_open: bool,
    removes_open: bool,
    control_open: bool,
}

impl Coordinator {
    pub(crate) const fn new(
        ids: Arc<IdSource>,
        cancellations: CancellationSet,
        add_rx: mpsc::Receiver<Task>,
        remove_rx: mpsc::Receiver<TaskId>,
        control_rx: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            store: PendingStore::new(),
            cancellations,
            ids,
            add_rx,
            remove_rx,
            control_rx,
            adds_open: true,
            removes_open: true,
            control_open: true,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("delay queue: starting");

        loop {
            let next_fire_time = self.store.front().map(|task| task.fire_time);

            let event = if let Some(fire_time) = next_fire_time {
                select! {
                    () = sleep_until(fire_time) => Event::Expired(Instant::now()),
                    task = self.add_rx.recv(), if self.adds_open => Event::Add(task),
                    id = self.remove_rx.recv(), if self.removes_open => Event::Remove(id),
                    command = self.control_rx.recv(), if self.control_open => Event::Control(command),
                }
            } else {
                // Remove requests stay queued until there is something to remove.
                select! {
                    task = self.add_rx.recv(), if self.adds_open => Event::Add(task),
                    command = self.control_rx.recv(), if self.control_open => Event::Control(command),
                    else => break,
                }
            };

            self.cancellations.expire(Instant::now());

            match event {
                Event::Expired(now) => self.fire(now),
                Event::Add(Some(task)) => {
                    debug!("{}: adding task", task.id);
                    if self.cancellations.pin(&task.id) {
                        debug!("{}: already cancelled, will be discarded when due", task.id);
                    }
                    self.store.insert(task);
                }
                Event::Add(None) => {
                    debug!("delay queue: add requests closed");
                    self.adds_open = false;
                }
                Event::Remove(Some(id)) => self.remove(id, Instant::now()),
                Event::Remove(None) => {
                    debug!("delay queue: remove requests closed");
                    self.removes_open = false;
                }
                Event::Control(Some(Command::Snapshot(tx))) => {
                    let snapshot = Snapshot {
                        fire_times: self.store.fire_times().collect(),
                        cancellations: self.cancellations.len(),
                    };
                    if tx.send(snapshot).is_err() {
                        debug!("delay queue: snapshot requester went away");
                    }
                }
                Event::Control(Some(Command::Shutdown(tx))) => {
                    let report = ShutdownReport {
                        dropped: self.store.len(),
                        cancellations: self.cancellations.len(),
                    };
                    info!("delay queue: shutting down, {report:?}");
                    if tx.send(report).is_err() {
                        debug!("delay queue: shutdown requester went away");
                    }
                    return;
                }
                Event::Control(None) => {
                    debug!("delay queue: control requests closed");
                    self.control_open = false;
                }
            }
        }

        debug!("delay queue: all handles dropped and nothing pending, exiting");
    }

    fn fire(&mut self, now: Instant) {
        let Some(task) = self.store.pop_front() else {
            return;
        };

        if self.cancellations.take(&task.id) {
            debug!("{}: cancelled before it fired, discarding", task.id);
            return;
        }

        dispatch(task, now);
    }

    fn remove(&mut self, id: TaskId, now: Instant) {
        if self.store.remove_by_id(&id).is_some() {
            debug!("{id}: removed pending task");
            return;
        }

        if !self.ids.issued(&id) {
            debug!("{id}: never issued by this queue, ignoring cancellation");
            return;
        }

        // The add may still be in flight, or the task already fired.
        debug!("{id}: not pending, remembering cancellation");
        self.cancellations.insert(id, now);
    }
}

/// Run the task's callback without holding up the coordinator.
///
/// A callback that panics only takes down its own dispatch.
fn dispatch(task: Task, fired_at: Instant) {
    let Task {
        id,
        fire_time,
        work,
    } = task;

    debug!("{id}: dispatching");

    let handle = tokio::task::spawn_blocking(move || {
        if fire_time > fired_at {
            return false;
        }
        work();
        true
    });

    tokio::spawn(async move {
        match handle.await {
            Ok(true) => debug!("{id}: callback finished"),
            Ok(false) => warn!("{id}: dispatched before its fire time, skipping"),
            Err(err) => error!("{id}: callback failed: {err}"),
        }
    });
}
