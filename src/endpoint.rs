//! Cross-process delivery of progress events.
//!
//! A context serving other processes binds an [`Endpoint`]: a Unix domain
//! socket inside a private temporary directory. Child processes connect to
//! it through a [`RemoteTransport`] and stream newline-delimited JSON frames,
//! which the endpoint forwards onto the context's channel, preserving the
//! per-connection order.

use serde::{Deserialize, Serialize};

use crate::{Error, ProgressEvent, ReporterHandle, Transport};

#[cfg(unix)]
pub(crate) use self::unix::Endpoint;

/// A frame sent from a remote reporter to an endpoint.
#[derive(Serialize, Deserialize, Debug)]
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) enum Frame {
    Event(ProgressEvent),
    /// Asks for a [`Reply::Synced`] once all preceding events are enqueued.
    Sync,
}

/// A frame sent from an endpoint back to a remote reporter.
#[derive(Serialize, Deserialize, Debug)]
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) enum Reply {
    Synced,
}

/// Implementation of `Transport` for reporting to another process' endpoint.
pub(crate) struct RemoteTransport {
    handle: ReporterHandle,
    #[cfg(unix)]
    connection: parking_lot::Mutex<Option<unix::Connection>>,
}

impl RemoteTransport {
    pub(crate) fn new(handle: &ReporterHandle) -> Self {
        Self {
            handle: handle.clone(),
            #[cfg(unix)]
            connection: parking_lot::Mutex::new(None),
        }
    }
}

#[cfg(unix)]
impl Transport for RemoteTransport {
    fn send(&self, event: ProgressEvent) -> Result<(), Error> {
        let mut guard = self.connection.lock();

        if guard.is_none() {
            *guard = Some(unix::Connection::open(&self.handle)?);
        }

        let result = match guard.as_mut() {
            Some(connection) => connection.write_frame(&Frame::Event(event)),
            None => Err(Error::Disconnected),
        };

        if result.is_err() {
            // Reconnect on next use rather than writing into a broken stream:
            *guard = None;
        }

        result
    }

    fn flush(&self) -> Result<(), Error> {
        let mut guard = self.connection.lock();

        // Nothing was ever sent:
        let Some(connection) = guard.as_mut() else {
            return Ok(());
        };

        let result = connection.sync();

        if result.is_err() {
            *guard = None;
        }

        result
    }
}

#[cfg(not(unix))]
impl Transport for RemoteTransport {
    fn send(&self, _event: ProgressEvent) -> Result<(), Error> {
        let _ = &self.handle;
        Err(Error::Unsupported("cross-process reporting"))
    }

    fn flush(&self) -> Result<(), Error> {
        Err(Error::Unsupported("cross-process reporting"))
    }
}

#[cfg(unix)]
mod unix {
    use std::{
        io::{BufRead, BufReader, Write},
        os::unix::net::{UnixListener, UnixStream},
        path::Path,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, JoinHandle},
    };

    use crossbeam_channel::Sender;
    use tempfile::TempDir;

    use super::{Frame, Reply};
    use crate::{event::Message, Error, ReporterHandle};

    const SOCKET_NAME: &str = "reporter.sock";

    /// A listening endpoint forwarding remote events onto a channel.
    pub(crate) struct Endpoint {
        handle: ReporterHandle,
        shutdown: Arc<AtomicBool>,
        acceptor: Option<JoinHandle<()>>,
        // Removes the socket once the endpoint is gone:
        _dir: TempDir,
    }

    impl Endpoint {
        pub(crate) fn bind(sender: Sender<Message>) -> Result<Self, Error> {
            let dir = tempfile::Builder::new().prefix("parbar-").tempdir()?;
            let path = dir.path().join(SOCKET_NAME);

            let listener = UnixListener::bind(&path)?;
            let shutdown = Arc::new(AtomicBool::new(false));

            let acceptor = thread::Builder::new()
                .name("parbar-endpoint".to_owned())
                .spawn({
                    let shutdown = Arc::clone(&shutdown);
                    move || accept(listener, sender, shutdown)
                })?;

            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %path.display(), "Bound reporter endpoint.");

            Ok(Self {
                handle: ReporterHandle::new(path),
                shutdown,
                acceptor: Some(acceptor),
                _dir: dir,
            })
        }

        pub(crate) fn handle(&self) -> &ReporterHandle {
            &self.handle
        }
    }

    impl Drop for Endpoint {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::SeqCst);

            // Wake up the blocking `accept()`:
            let _ = UnixStream::connect(self.handle.endpoint());

            if let Some(acceptor) = self.acceptor.take() {
                let _ = acceptor.join();
            }
        }
    }

    fn accept(listener: UnixListener, sender: Sender<Message>, shutdown: Arc<AtomicBool>) {
        for stream in listener.incoming() {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "Failed to accept reporter connection.");
                    continue;
                }
            };

            let sender = sender.clone();

            let spawned = thread::Builder::new()
                .name("parbar-connection".to_owned())
                .spawn(move || serve(stream, sender));

            if let Err(_err) = spawned {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "Failed to spawn reporter connection thread.");
            }
        }
    }

    fn serve(stream: UnixStream, sender: Sender<Message>) {
        let mut writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "Failed to set up reporter connection.");
                return;
            }
        };

        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else {
                break;
            };

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Frame>(&line) {
                Ok(Frame::Event(event)) => {
                    if sender.send(Message::Event(event)).is_err() {
                        break;
                    }
                }
                Ok(Frame::Sync) => {
                    if write_line(&mut writer, &Reply::Synced).is_err() {
                        break;
                    }
                }
                Err(_err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_err, "Ignoring malformed frame from reporter.");
                }
            }
        }
    }

    fn write_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> Result<(), Error> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// A remote reporter's connection to an endpoint.
    pub(crate) struct Connection {
        writer: UnixStream,
        reader: BufReader<UnixStream>,
    }

    impl Connection {
        pub(crate) fn open(handle: &ReporterHandle) -> Result<Self, Error> {
            Self::connect(handle.endpoint())
        }

        fn connect(path: &Path) -> Result<Self, Error> {
            let writer = UnixStream::connect(path)?;
            let reader = BufReader::new(writer.try_clone()?);
            Ok(Self { writer, reader })
        }

        pub(crate) fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
            write_line(&mut self.writer, frame)
        }

        pub(crate) fn sync(&mut self) -> Result<(), Error> {
            self.write_frame(&Frame::Sync)?;

            let mut line = String::new();

            if self.reader.read_line(&mut line)? == 0 {
                return Err(Error::Disconnected);
            }

            match serde_json::from_str::<Reply>(&line)? {
                Reply::Synced => Ok(()),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use std::time::Duration;

        use super::*;
        use crate::{ProgressEvent, Reporter, TaskId};

        fn recv_event(receiver: &crossbeam_channel::Receiver<Message>) -> ProgressEvent {
            match receiver.recv_timeout(Duration::from_secs(5)) {
                Ok(Message::Event(event)) => event,
                other => panic!("expected event, got {other:?}"),
            }
        }

        #[test]
        fn events_are_forwarded_in_order() {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let endpoint = Endpoint::bind(sender).unwrap();

            let reporter = Reporter::connect(endpoint.handle());
            let task_id = TaskId::new_unique();

            for done in 0..=3 {
                reporter
                    .report(task_id, "remote", done, Some(3), done == 0, done == 3)
                    .unwrap();
            }
            reporter.flush().unwrap();

            assert!(receiver.len() >= 4);

            for done in 0..=3 {
                let event = recv_event(&receiver);
                assert_eq!(event.task_id, task_id);
                assert_eq!(event.done, done);
            }
        }

        #[test]
        fn malformed_frames_are_skipped() {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let endpoint = Endpoint::bind(sender).unwrap();

            let mut connection = Connection::open(endpoint.handle()).unwrap();
            connection.writer.write_all(b"{\"garbage\":true}\n").unwrap();

            let event = ProgressEvent::new(TaskId::new_unique(), "ok", 1, Some(1), true, true);
            connection.write_frame(&Frame::Event(event.clone())).unwrap();
            connection.sync().unwrap();

            assert_eq!(recv_event(&receiver), event);
        }

        #[test]
        fn flush_without_events_does_not_connect() {
            let handle = ReporterHandle::new("/nonexistent/parbar.sock".into());

            Reporter::connect(&handle).flush().unwrap();
        }

        #[test]
        fn unreachable_endpoint_fails_fast() {
            let handle = ReporterHandle::new("/nonexistent/parbar.sock".into());
            let reporter = Reporter::connect(&handle);

            let result = reporter.report(TaskId::new_unique(), "x", 0, None, true, false);

            assert!(matches!(result, Err(Error::Io(_))));
        }
    }
}
