//! Delayed tasks and their identifiers.
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::time::Instant;

/// The work to run when a task fires.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Opaque identifier of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of delayed work.
pub struct Task {
    /// The id handed back to the caller.
    pub id: TaskId,

    /// When the task becomes eligible to run.
    pub fire_time: Instant,

    /// The callback.
    pub work: Work,
}

impl Task {
    /// Create a new task.
    #[must_use]
    pub const fn new(id: TaskId, fire_time: Instant, work: Work) -> Self {
        Self {
            id,
            fire_time,
            work,
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("fire_time", &self.fire_time)
            .finish_non_exhaustive()
    }
}

static INSTANCES: AtomicU32 = AtomicU32::new(0);

const INSTANCE_DIGITS: usize = 8;
const SEQUENCE_DIGITS: usize = 16;

/// Issues unique task ids for one queue instance.
///
/// Ids are 24 hex digits: the instance discriminator followed by a sequence number.
#[derive(Debug)]
pub struct IdSource {
    instance: u32,
    next: AtomicU64,
}

impl IdSource {
    /// Create an id source with a fresh instance discriminator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instance: INSTANCES.fetch_add(1, Ordering::Relaxed),
            next: AtomicU64::new(0),
        }
    }

    /// Issue the next id.
    #[must_use]
    pub fn next_id(&self) -> TaskId {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        TaskId(format!("{:08x}{sequence:016x}", self.instance))
    }

    /// Was this id ever issued by this source?
    #[must_use]
    pub fn issued(&self, id: &TaskId) -> bool {
        let Some((instance, sequence)) = parse(id.as_str()) else {
            return false;
        };
        instance == self.instance && sequence < self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}

fn parse(id: &str) -> Option<(u32, u64)> {
    if id.len() != INSTANCE_DIGITS + SEQUENCE_DIGITS
        || !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    {
        return None;
    }
    let (instance, sequence) = id.split_at(INSTANCE_DIGITS);
    let instance = u32::from_str_radix(instance, 16).ok()?;
    let sequence = u64::from_str_radix(sequence, 16).ok()?;
    Some((instance, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let source = IdSource::new();
        let a = source.next_id();
        let b = source.next_id();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 24);
    }

    #[test]
    fn test_issued() {
        let source = IdSource::new();
        let other = IdSource::new();
        let id = source.next_id();

        assert!(source.issued(&id));
        assert!(!other.issued(&id));
        assert!(!source.issued(&TaskId::new("not-an-id")));
        assert!(!source.issued(&TaskId::new(id.as_str().to_uppercase() + "0")));

        // Well formed, but not issued yet.
        let future = TaskId::new(format!("{}{:016x}", &id.as_str()[..8], 99));
        assert!(!source.issued(&future));
    }
}
