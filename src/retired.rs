//! Bookkeeping of finished task identifiers.

use std::collections::{HashSet, VecDeque};

use crate::TaskId;

/// The number of finished tasks remembered per context.
pub(crate) const RETIRED_CAPACITY: usize = 4096;

/// The identifiers of the most recently finished tasks.
///
/// Used for rejecting reuse of a finished task's identifier. Only the
/// most recent [`RETIRED_CAPACITY`] identifiers are remembered, so the
/// memory of a long-running process stays bounded no matter how many
/// tasks it runs. Beyond that window reuse goes undetected.
#[derive(Debug)]
pub(crate) struct Retired {
    ids: HashSet<TaskId>,
    order: VecDeque<TaskId>,
    capacity: usize,
}

impl Default for Retired {
    fn default() -> Self {
        Self::with_capacity(RETIRED_CAPACITY)
    }
}

impl Retired {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Remembers `task_id`, forgetting the oldest identifier if full.
    pub(crate) fn insert(&mut self, task_id: TaskId) {
        if !self.ids.insert(task_id) {
            return;
        }

        self.order.push_back(task_id);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, task_id: &TaskId) -> bool {
        self.ids.contains(task_id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}
