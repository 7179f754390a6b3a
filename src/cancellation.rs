//! Cancellations that arrived before their task could be found.
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// Waiting for its task, may expire.
    Requested(Instant),

    /// Its task is pending, so it is kept until the task reaches the front.
    Pinned,
}

/// Ids whose cancellation could not be matched against a pending task.
///
/// Entries are consumed when the matching task reaches the front of the store and its timer
/// fires. With a time to live, entries whose task never turned up are expired instead of kept
/// forever. Entries pinned to a pending task never expire.
#[derive(Debug, Default)]
pub struct CancellationSet {
    entries: HashMap<TaskId, Entry>,
    // Insertion order, only kept when there is a time to live.
    by_age: VecDeque<(Instant, TaskId)>,
    ttl: Option<Duration>,
}

impl CancellationSet {
    /// Create an empty set.
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            by_age: VecDeque::new(),
            ttl,
        }
    }

    /// Record a cancellation requested at `now`.
    pub fn insert(&mut self, id: TaskId, now: Instant) {
        if self.ttl.is_some() {
            self.by_age.push_back((now, id.clone()));
        }
        self.entries.insert(id, Entry::Requested(now));
    }

    /// The task for this id is now pending; keep its cancellation until it fires.
    ///
    /// Returns true if there was a cancellation for it.
    pub fn pin(&mut self, id: &TaskId) -> bool {
        self.entries.get_mut(id).is_some_and(|entry| {
            *entry = Entry::Pinned;
            true
        })
    }

    /// Consume the cancellation for this id, returning true if there was one.
    pub fn take(&mut self, id: &TaskId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop unpinned entries older than the time to live.
    pub fn expire(&mut self, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };

        while let Some((requested, _)) = self.by_age.front() {
            if now.saturating_duration_since(*requested) < ttl {
                break;
            }
            let Some((requested, id)) = self.by_age.pop_front() else {
                break;
            };

            // Taken, pinned or requested again since are left alone.
            if self.entries.get(&id) == Some(&Entry::Requested(requested)) {
                debug!("{id}: cancellation expired");
                self.entries.remove(&id);
            }
        }
    }

    /// Number of outstanding cancellations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Are there no outstanding cancellations?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
