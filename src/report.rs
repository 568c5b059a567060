//! A task's report.

use std::time::{Duration, SystemTime};

use crate::{ProgressEvent, TaskId};

/// The latest known state of a task, as merged from its events.
#[derive(Clone, PartialEq, Debug)]
pub struct Report {
    /// The associated task's identifier.
    pub task_id: TaskId,
    /// The associated task's label.
    pub name: String,
    /// The number of completed units of work.
    pub done: u64,
    /// The total number of units of work, or `None` if unknown.
    pub total: Option<u64>,
    /// The wall-clock time the task started at, once known.
    pub start_time: Option<SystemTime>,
    /// The number of events merged into this report so far.
    pub updates: usize,
}

impl Report {
    pub(crate) fn new(event: ProgressEvent) -> Self {
        Self {
            task_id: event.task_id,
            name: event.name,
            done: event.done,
            total: event.total,
            start_time: event.start_time,
            updates: 1,
        }
    }

    pub(crate) fn merge(&mut self, event: ProgressEvent) {
        self.name = event.name;
        self.done = event.done;
        self.total = event.total;
        // The start time is only ever sent once:
        if self.start_time.is_none() {
            self.start_time = event.start_time;
        }
        self.updates += 1;
    }

    /// Returns `true` if the task's total is unknown (or zero).
    pub fn is_indeterminate(&self) -> bool {
        !matches!(self.total, Some(total) if total > 0)
    }

    /// A fractional representation of progress within range of `0.0..=1.0`.
    ///
    /// Indeterminate tasks are treated as complete.
    pub fn fraction(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => (self.done.min(total) as f64) / (total as f64),
            _ => 1.0,
        }
    }

    /// Returns the time elapsed since the task started, if known.
    pub fn elapsed(&self, now: SystemTime) -> Option<Duration> {
        self.start_time
            .map(|start| now.duration_since(start).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(done: u64, total: Option<u64>) -> Report {
        let event = ProgressEvent::new(TaskId::new_unique(), "task", done, total, false, false);
        Report::new(event)
    }

    #[test]
    fn indeterminate() {
        for total in [None, Some(0)] {
            let report = report(3, total);

            assert!(report.is_indeterminate());
            assert_eq!(report.fraction(), 1.0);
        }
    }

    #[test]
    fn determinate() {
        let report = report(1, Some(10));

        assert!(!report.is_indeterminate());
        assert_eq!(report.fraction(), 0.1);
    }

    #[test]
    fn overshoot_is_clamped() {
        assert_eq!(report(12, Some(10)).fraction(), 1.0);
    }

    #[test]
    fn merge_keeps_first_start_time() {
        let id = TaskId::new_unique();
        let first = ProgressEvent::new(id, "task", 0, Some(2), true, false);
        let start_time = first.start_time;

        let mut report = Report::new(first);
        report.merge(ProgressEvent::new(id, "renamed", 2, Some(2), false, true));

        assert_eq!(report.start_time, start_time);
        assert_eq!(report.name, "renamed");
        assert_eq!(report.done, 2);
        assert_eq!(report.updates, 2);
    }
}
