//! Reporters and the handles used to pass them to other processes.

use std::{convert::Infallible, fmt, path::PathBuf, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{Error, ProgressEvent, TaskId};

/// Types for delivering progress events to a collector.
pub trait Transport: Send + Sync {
    /// Delivers an event without blocking on the collector.
    fn send(&self, event: ProgressEvent) -> Result<(), Error>;

    /// Blocks until every event sent so far has been handed to the collector's channel.
    fn flush(&self) -> Result<(), Error>;
}

/// A handle for emitting progress events of one or more tasks.
///
/// Reporters are cheap to clone and can be shared across threads.
/// To report from another process, obtain a [`ReporterHandle`] through
/// [`Context::current_reporter()`](crate::Context::current_reporter)
/// and register it there via
/// [`Context::register_reporter()`](crate::Context::register_reporter).
#[derive(Clone)]
pub struct Reporter {
    transport: Arc<dyn Transport>,
}

impl Reporter {
    /// Creates a reporter delivering its events through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Creates a reporter for the endpoint described by `handle`.
    ///
    /// The connection is established lazily, on first use.
    pub fn connect(handle: &ReporterHandle) -> Self {
        Self::new(Arc::new(crate::endpoint::RemoteTransport::new(handle)))
    }

    /// Emits a progress event for the task `task_id`.
    ///
    /// Set `first` exactly on the task's first event
    /// and `last` exactly on its final one.
    pub fn report(
        &self,
        task_id: TaskId,
        name: impl Into<String>,
        done: u64,
        total: Option<u64>,
        first: bool,
        last: bool,
    ) -> Result<(), Error> {
        self.send(ProgressEvent::new(task_id, name, done, total, first, last))
    }

    /// Emits a pre-built progress event.
    pub fn send(&self, event: ProgressEvent) -> Result<(), Error> {
        self.transport.send(event)
    }

    /// Blocks until every event reported so far has reached the collector's channel.
    pub fn flush(&self) -> Result<(), Error> {
        self.transport.flush()
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

/// A serializable descriptor of a reporter, resolvable in another process.
///
/// Handles describe a local endpoint; they are resolved to a live
/// connection the first time a reporter created from them is used.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Debug)]
pub struct ReporterHandle {
    endpoint: PathBuf,
}

impl ReporterHandle {
    /// The environment variable conventionally used to
    /// hand a reporter over to a child process.
    pub const ENV_KEY: &'static str = "PARBAR_REPORTER";

    pub(crate) fn new(endpoint: PathBuf) -> Self {
        Self { endpoint }
    }

    /// Returns the endpoint this handle resolves to.
    pub fn endpoint(&self) -> &PathBuf {
        &self.endpoint
    }

    /// Reads a handle from the `PARBAR_REPORTER` environment variable, if set.
    pub fn from_env() -> Option<Self> {
        let value = std::env::var_os(Self::ENV_KEY)?;

        if value.is_empty() {
            return None;
        }

        Some(Self::new(PathBuf::from(value)))
    }
}

impl fmt::Display for ReporterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint.display())
    }
}

impl FromStr for ReporterHandle {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(PathBuf::from(s)))
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct SpyTransport {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl Transport for SpyTransport {
        fn send(&self, event: ProgressEvent) -> Result<(), Error> {
            self.events.lock().push(event);
            Ok(())
        }

        fn flush(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn report_builds_event() {
        let spy = Arc::new(SpyTransport::default());
        let reporter = Reporter::new(spy.clone());
        let task_id = TaskId::new_unique();

        reporter
            .report(task_id, "task", 0, Some(4), true, false)
            .unwrap();
        reporter
            .report(task_id, "task", 4, Some(4), false, true)
            .unwrap();

        let events = spy.events.lock();

        assert_eq!(events.len(), 2);
        assert!(events[0].first && !events[0].last);
        assert!(events[0].start_time.is_some());
        assert!(!events[1].first && events[1].last);
        assert_eq!(events[1].done, 4);
    }

    #[test]
    fn handle_round_trips_through_string() {
        let handle = ReporterHandle::new(PathBuf::from("/tmp/parbar-1/reporter.sock"));

        let parsed: ReporterHandle = handle.to_string().parse().unwrap();

        assert_eq!(parsed, handle);
    }
}
