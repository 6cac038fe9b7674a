use crate::types::{ActivityEntry, ActivityEvent};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity activity history, newest first.
///
/// Eviction is by arrival order only; the oldest entry goes when a push
/// would exceed capacity.
#[derive(Debug)]
pub struct ActivityBuffer {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl Default for ActivityBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ActivityBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the newest end and return the stored entry's id.
    pub fn push(&mut self, event: ActivityEvent) -> Uuid {
        if self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        let id = Uuid::new_v4();
        self.entries.push_front(ActivityEntry {
            id,
            received_at: Utc::now(),
            event,
        });
        id
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Independent copy of the current history, newest first.
    pub fn snapshot(&self) -> Arc<[ActivityEntry]> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;

    fn numbered(n: usize) -> ActivityEvent {
        classify(&format!(r#"{{"type":"info","message":"m{n}"}}"#)).unwrap()
    }

    #[test]
    fn keeps_last_hundred_newest_first() {
        let mut buffer = ActivityBuffer::default();
        for n in 0..250 {
            buffer.push(numbered(n));
        }
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 100);
        let messages: Vec<_> = snapshot.iter().map(|e| e.event.message().unwrap()).collect();
        let expected: Vec<_> = (150..250).rev().map(|n| format!("m{n}")).collect();
        assert_eq!(messages, expected);
    }

    #[test]
    fn below_capacity_nothing_is_evicted() {
        let mut buffer = ActivityBuffer::new(5);
        for n in 0..3 {
            buffer.push(numbered(n));
        }
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].event.message(), Some("m2"));
        assert_eq!(snapshot[2].event.message(), Some("m0"));
    }

    #[test]
    fn identical_events_are_all_retained() {
        let mut buffer = ActivityBuffer::default();
        let event = numbered(1);
        let first = buffer.push(event.clone());
        let second = buffer.push(event);
        assert_eq!(buffer.len(), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn clear_empties_every_later_snapshot() {
        let mut buffer = ActivityBuffer::default();
        for n in 0..10 {
            buffer.push(numbered(n));
        }
        buffer.clear();
        for _ in 0..3 {
            assert!(buffer.snapshot().is_empty());
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_pushes() {
        let mut buffer = ActivityBuffer::new(2);
        buffer.push(numbered(0));
        let before = buffer.snapshot();
        buffer.push(numbered(1));
        buffer.push(numbered(2));
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].event.message(), Some("m0"));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = ActivityBuffer::new(0);
        buffer.push(numbered(0));
        buffer.push(numbered(1));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot()[0].event.message(), Some("m1"));
    }
}
