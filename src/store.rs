//! Pending tasks, sorted by fire time.
use std::collections::VecDeque;

use tokio::time::Instant;

use crate::task::{Task, TaskId};

/// Tasks waiting to fire, kept in ascending fire time order.
///
/// The relative order of tasks with exactly equal fire times is unspecified.
#[derive(Debug, Default)]
pub struct PendingStore {
    tasks: VecDeque<Task>,
}

impl PendingStore {
    /// Create an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Is the store empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The task that fires next.
    #[must_use]
    pub fn front(&self) -> Option<&Task> {
        self.tasks.front()
    }

    /// Remove and return the task that fires next.
    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Add a task, keeping the store sorted.
    pub fn insert(&mut self, task: Task) {
        let index = self.insert_index(task.fire_time);
        self.tasks.insert(index, task);
    }

    /// Remove the task with this id, returning it if it was found.
    pub fn remove_by_id(&mut self, id: &TaskId) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.id == *id)?;
        self.tasks.remove(index)
    }

    /// Fire times of all pending tasks, in store order.
    pub fn fire_times(&self) -> impl Iterator<Item = Instant> + '_ {
        self.tasks.iter().map(|task| task.fire_time)
    }

    /// Binary search for the slot that keeps the store sorted.
    fn insert_index(&self, fire_time: Instant) -> usize {
        if self.tasks.is_empty() {
            return 0;
        }

        let mut left = 0;
        let mut right = self.tasks.len() - 1;

        loop {
            if self.tasks[left].fire_time >= fire_time {
                return left;
            }

            if self.tasks[right].fire_time <= fire_time {
                return right + 1;
            }

            // Here tasks[left] < fire_time < tasks[right], so right > left.
            let length = right - left;
            if length == 1 {
                return left + 1;
            }

            let middle = left + length / 2;
            if fire_time <= self.tasks[middle].fire_time {
                right = middle;
            } else {
                left = middle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    fn task(id: &str, base: Instant, millis: u64) -> Task {
        Task::new(
            TaskId::new(id),
            base + Duration::from_millis(millis),
            Box::new(|| {}),
        )
    }

    fn store_with(base: Instant, millis: &[u64]) -> PendingStore {
        let mut store = PendingStore::new();
        for (i, m) in millis.iter().enumerate() {
            store.insert(task(&format!("t{i}"), base, *m));
        }
        store
    }

    fn offsets(store: &PendingStore, base: Instant) -> Vec<u128> {
        store
            .fire_times()
            .map(|t| (t - base).as_millis())
            .collect()
    }

    #[rstest]
    #[case(&[], 5, 0)]
    #[case(&[10], 5, 0)]
    #[case(&[10], 10, 0)]
    #[case(&[10], 15, 1)]
    #[case(&[10, 20], 15, 1)]
    #[case(&[10, 20], 25, 2)]
    #[case(&[10, 20], 20, 2)]
    #[case(&[10, 20, 30], 25, 2)]
    #[case(&[10, 20, 30], 15, 1)]
    #[case(&[10, 20, 30, 40, 50, 60, 70], 45, 4)]
    #[case(&[10, 20, 30, 40, 50, 60, 70], 11, 1)]
    #[case(&[10, 20, 30, 40, 50, 60, 70], 69, 6)]
    #[case(&[10, 20, 30, 40, 50, 60, 70], 40, 4)]
    fn test_insert_index(#[case] existing: &[u64], #[case] new: u64, #[case] expected: usize) {
        let base = Instant::now();
        let store = store_with(base, existing);
        let index = store.insert_index(base + Duration::from_millis(new));
        assert_eq!(index, expected);
    }

    #[test]
    fn test_insert_keeps_order() {
        let base = Instant::now();
        let millis = [50, 10, 90, 30, 30, 70, 0, 100, 20, 60, 60, 5];
        let mut store = PendingStore::new();
        for (i, m) in millis.iter().enumerate() {
            store.insert(task(&format!("t{i}"), base, *m));
            let offsets = offsets(&store, base);
            assert!(offsets.windows(2).all(|w| w[0] <= w[1]), "{offsets:?}");
        }
        assert_eq!(store.len(), millis.len());
    }

    #[test]
    fn test_remove_by_id() {
        let base = Instant::now();
        let mut store = store_with(base, &[30, 10, 20]);

        let removed = store.remove_by_id(&TaskId::new("t2"));
        assert_eq!(removed.map(|t| t.id), Some(TaskId::new("t2")));
        assert_eq!(offsets(&store, base), vec![10, 30]);

        assert!(store.remove_by_id(&TaskId::new("t2")).is_none());
        assert!(store.remove_by_id(&TaskId::new("unknown")).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_pop_front() {
        let base = Instant::now();
        let mut store = store_with(base, &[30, 10, 20]);

        assert_eq!(store.front().map(|t| t.id.clone()), Some(TaskId::new("t1")));
        assert_eq!(store.pop_front().map(|t| t.id), Some(TaskId::new("t1")));
        assert_eq!(store.pop_front().map(|t| t.id), Some(TaskId::new("t2")));
        assert_eq!(store.pop_front().map(|t| t.id), Some(TaskId::new("t0")));
        assert!(store.pop_front().is_none());
        assert!(store.is_empty());
    }
}
