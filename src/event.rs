//! A progress event.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    time::SystemTime,
};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::Generation;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// A task's unique identifier.
///
/// Identifiers are unique across processes on the same machine,
/// as they are qualified by the id of the process that created them.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Debug)]
pub struct TaskId {
    process: u32,
    sequence: usize,
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new_unique()
    }
}

impl TaskId {
    pub(crate) fn new_unique() -> Self {
        Self {
            process: std::process::id(),
            sequence: NEXT_ID.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Returns the id of the process the task was created in.
    pub fn process(&self) -> u32 {
        self.process
    }

    /// Returns the raw per-process sequence number.
    pub fn as_raw(&self) -> usize {
        self.sequence
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.process, self.sequence)
    }
}

/// A single progress report of a task, as emitted by a [`Reporter`](crate::Reporter).
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct ProgressEvent {
    /// The reporting task's identifier.
    pub task_id: TaskId,
    /// The task's human-readable label.
    pub name: String,
    /// The number of completed units of work.
    pub done: u64,
    /// The total number of units of work, or `None` if unknown.
    pub total: Option<u64>,
    /// `true` exactly on the task's first event.
    pub first: bool,
    /// `true` exactly on the task's final event.
    pub last: bool,
    /// The wall-clock time the task started at, set on its first event.
    #[serde(default)]
    pub start_time: Option<SystemTime>,
}

impl ProgressEvent {
    /// Creates an event, stamping `start_time` if `first` is set.
    pub fn new(
        task_id: TaskId,
        name: impl Into<String>,
        done: u64,
        total: Option<u64>,
        first: bool,
        last: bool,
    ) -> Self {
        let start_time = first.then(SystemTime::now);

        Self {
            task_id,
            name: name.into(),
            done,
            total,
            first,
            last,
            start_time,
        }
    }
}

/// What travels over the shared channel.
#[derive(Debug)]
pub(crate) enum Message {
    /// A task has reported progress.
    Event(ProgressEvent),
    /// Render everything received so far, then acknowledge.
    Flush(Sender<()>),
    /// Drain, render a final snapshot, and exit.
    ///
    /// Only honored by the collector of the given generation.
    Stop(Generation),
}
