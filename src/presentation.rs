//! Consumers of collector snapshots.

use crate::Snapshot;

/// An output stream of the process.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Stream {
    /// The standard output stream.
    Stdout,
    /// The standard error stream.
    Stderr,
}

/// Types for rendering collector snapshots.
///
/// A presentation is only ever driven by one thread at a time:
/// the collector (for snapshots) or a writer of out-of-band text.
pub trait Presentation: Send {
    /// Renders the snapshot of a single refresh cycle.
    ///
    /// Finishing tasks are presented exactly once, active ones on
    /// every cycle until they finish.
    fn present(&mut self, snapshot: &Snapshot);

    /// Writes out-of-band `text` to `stream` without corrupting
    /// whatever progress is currently presented.
    fn write_out(&mut self, stream: Stream, text: &str);
}

/// Implementation of `Presentation` that discards everything.
#[derive(Copy, Clone, Default, Debug)]
pub struct NopPresentation;

impl Presentation for NopPresentation {
    fn present(&mut self, snapshot: &Snapshot) {
        std::hint::black_box(snapshot);
    }

    fn write_out(&mut self, _stream: Stream, _text: &str) {}
}

#[doc(hidden)]
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use std::{io, sync::Arc};

    use parking_lot::Mutex;

    use super::*;
    use crate::{Report, TaskId};

    /// A presentation recording every snapshot and out-of-band write.
    #[doc(hidden)]
    #[derive(Clone, Default)]
    pub struct RecordingPresentation {
        snapshots: Arc<Mutex<Vec<Snapshot>>>,
        writes: Arc<Mutex<Vec<(Stream, String)>>>,
    }

    impl RecordingPresentation {
        #[doc(hidden)]
        pub fn snapshots(&self) -> Vec<Snapshot> {
            self.snapshots.lock().clone()
        }

        #[doc(hidden)]
        pub fn writes(&self) -> Vec<(Stream, String)> {
            self.writes.lock().clone()
        }

        /// Every finishing report, across all snapshots, in presentation order.
        #[doc(hidden)]
        pub fn finished(&self) -> Vec<Report> {
            self.snapshots
                .lock()
                .iter()
                .flat_map(|snapshot| snapshot.finishing.iter().cloned())
                .collect()
        }

        /// Every report of `task_id`, across all snapshots.
        #[doc(hidden)]
        pub fn reports_of(&self, task_id: TaskId) -> Vec<Report> {
            self.snapshots
                .lock()
                .iter()
                .flat_map(|snapshot| snapshot.active.iter().chain(&snapshot.finishing))
                .filter(|report| report.task_id == task_id)
                .cloned()
                .collect()
        }

        /// The number of active lines of the most recent snapshot.
        #[doc(hidden)]
        pub fn active_lines(&self) -> usize {
            self.snapshots
                .lock()
                .last()
                .map_or(0, |snapshot| snapshot.active.len())
        }
    }

    impl Presentation for RecordingPresentation {
        fn present(&mut self, snapshot: &Snapshot) {
            self.snapshots.lock().push(snapshot.clone());
        }

        fn write_out(&mut self, stream: Stream, text: &str) {
            self.writes.lock().push((stream, text.to_owned()));
        }
    }

    /// An in-memory writer whose contents can be inspected from elsewhere.
    #[doc(hidden)]
    #[derive(Clone, Default)]
    pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        #[doc(hidden)]
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }

        #[doc(hidden)]
        pub fn clear(&self) {
            self.0.lock().clear();
        }
    }

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
