//! Per-task bookkeeping of the collector.

use std::collections::{hash_map, HashMap};

use crate::{retired::Retired, ProgressEvent, Report, TaskId};

/// The per-cycle bundle of task state handed to a [`Presentation`](crate::Presentation).
#[derive(Clone, PartialEq, Default, Debug)]
pub struct Snapshot {
    /// Reports of tasks that are still running (including ones seen for the
    /// first time this cycle), in the order they were first seen.
    pub active: Vec<Report>,
    /// Reports of tasks that finished this cycle, in the order they finished.
    ///
    /// A task shows up here exactly once and never again afterwards.
    pub finishing: Vec<Report>,
}

impl Snapshot {
    /// Returns `true` if the snapshot has neither active nor finishing tasks.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.finishing.is_empty()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum Membership {
    New,
    Active,
    Finishing,
}

#[derive(Debug)]
struct Record {
    report: Report,
    membership: Membership,
}

/// The authoritative state of every live task, owned by the collector.
#[derive(Default, Debug)]
pub(crate) struct Board {
    records: HashMap<TaskId, Record>,
    /// Live tasks in first-seen order.
    order: Vec<TaskId>,
    /// Tasks that received their last event this cycle, in arrival order.
    finishing: Vec<TaskId>,
    /// Tasks that have been drawn as finishing.
    retired: Retired,
    dirty: bool,
}

impl Board {
    pub(crate) fn merge(&mut self, event: ProgressEvent) {
        let task_id = event.task_id;
        let last = event.last;

        if self.retired.contains(&task_id) {
            #[cfg(feature = "tracing")]
            tracing::warn!(%task_id, "Dropping event of an already finished task.");
            return;
        }

        if let Some(record) = self.records.get(&task_id) {
            if record.membership == Membership::Finishing {
                #[cfg(feature = "tracing")]
                tracing::warn!(%task_id, "Dropping event received after the task's last event.");
                return;
            }
        }

        let record = match self.records.entry(task_id) {
            hash_map::Entry::Occupied(occupied) => {
                let record = occupied.into_mut();
                record.report.merge(event);
                record
            }
            hash_map::Entry::Vacant(vacant) => {
                self.order.push(task_id);
                vacant.insert(Record {
                    report: Report::new(event),
                    membership: Membership::New,
                })
            }
        };

        if last {
            record.membership = Membership::Finishing;
            self.finishing.push(task_id);
        }

        self.dirty = true;
    }

    /// Returns `true` if anything changed since the last snapshot,
    /// or if there are running tasks whose timings need refreshing.
    pub(crate) fn needs_render(&self) -> bool {
        self.dirty || !self.order.is_empty()
    }

    /// Returns `true` if the board tracks no live tasks.
    pub(crate) fn is_idle(&self) -> bool {
        self.order.is_empty()
    }

    /// Takes a snapshot, then promotes new tasks to active and retires finishing ones.
    pub(crate) fn snapshot(&mut self) -> Snapshot {
        let active = self
            .order
            .iter()
            .filter_map(|task_id| self.records.get(task_id))
            .filter(|record| record.membership != Membership::Finishing)
            .map(|record| record.report.clone())
            .collect();

        let finishing = self
            .finishing
            .drain(..)
            .filter_map(|task_id| {
                self.retired.insert(task_id);
                self.records.remove(&task_id)
            })
            .map(|record| record.report)
            .collect();

        let records = &mut self.records;
        self.order.retain(|task_id| records.contains_key(task_id));

        for record in records.values_mut() {
            if record.membership == Membership::New {
                record.membership = Membership::Active;
            }
        }

        self.dirty = false;

        Snapshot { active, finishing }
    }
}
