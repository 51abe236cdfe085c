use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::domain::types::QueueSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Operator-requested re-checks.
    High,
    /// Blogs picked up by the scheduled sweep.
    Normal,
}

#[derive(Debug, Default)]
struct QueueState {
    high: VecDeque<i64>,
    normal: VecDeque<i64>,
    queued: HashSet<i64>,
    in_flight: HashSet<i64>,
}

/// Blog ids waiting for an auto-moderation pass. An id is held at most once,
/// whether it is still queued or currently being processed.
#[derive(Debug, Default)]
pub struct ModerationQueue {
    state: Mutex<QueueState>,
}

impl ModerationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the id is already queued or in flight.
    pub fn push(&self, priority: Priority, blog_id: i64) -> bool {
        let mut state = self.state.lock();
        if state.in_flight.contains(&blog_id) || !state.queued.insert(blog_id) {
            return false;
        }
        match priority {
            Priority::High => state.high.push_back(blog_id),
            Priority::Normal => state.normal.push_back(blog_id),
        }
        true
    }

    /// Takes everything queued, high priority first, and marks it in flight.
    pub fn drain_ordered(&self) -> Vec<i64> {
        let mut state = self.state.lock();
        let state = &mut *state;
        let drained: Vec<i64> = state.high.drain(..).chain(state.normal.drain(..)).collect();
        for id in &drained {
            state.queued.remove(id);
            state.in_flight.insert(*id);
        }
        drained
    }

    pub fn complete(&self, blog_id: i64) {
        self.state.lock().in_flight.remove(&blog_id);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            high_priority: state.high.len(),
            normal_priority: state.normal.len(),
            in_flight: state.in_flight.len(),
        }
    }
}
