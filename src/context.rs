//! The process-wide reporting context.

use std::{collections::HashMap, fmt, io, mem, str, sync::Arc};

use parking_lot::Mutex;

use crate::{
    board::Board,
    channel::Channel,
    collector::{Collector, SharedPresentation},
    event::Message,
    retired::Retired,
    transport::ChannelTransport,
    BarTty, Config, Error, Generation, Presentation, Reporter, ReporterHandle, Stream, TaskId,
};

/// The lifecycle state of a context's collector.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PickupState {
    /// No collector is running.
    Idle,
    /// A collector is running.
    Running {
        /// The generation of the running collector.
        generation: Generation,
        /// The number of leases handed out for it and not yet returned.
        leases: usize,
    },
}

/// A capability obtained from [`Context::start()`] and returned via [`Context::stop()`].
///
/// Only the lease of the caller that actually started a collector
/// (the "owner") stops it; all other leases are no-ops when returned.
/// If other leases are still out when the owner's lease is returned,
/// the collector keeps running until the last of them is returned too.
#[must_use = "a collector keeps running until its owner's lease is returned via `Context::stop()`"]
#[derive(Debug)]
pub struct Lease {
    owner: bool,
    generation: Option<Generation>,
}

impl Lease {
    fn detached() -> Self {
        Self {
            owner: false,
            generation: None,
        }
    }

    /// Returns `true` if this lease started (and thus owns) its collector.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Returns the generation of the collector this lease was handed out for,
    /// or `None` if the context was detached.
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }
}

enum Pickup {
    Idle {
        /// Task state, kept between collector runs.
        board: Board,
    },
    Running {
        collector: Collector,
        leases: usize,
        /// The owner's lease was returned while others were still out.
        stop_pending: bool,
    },
}

/// The collector's state machine.
struct Machine {
    pickup: Pickup,
    generation: Generation,
    /// Explicitly detached via `Context::detach()`.
    detached: bool,
    /// The upstream reporter this context forwards to, if registered.
    upstream: Option<(Reporter, ReporterHandle)>,
}

impl Machine {
    fn is_detached(&self) -> bool {
        self.detached || self.upstream.is_some()
    }
}

struct LiveTask {
    name: String,
    done: u64,
    total: Option<u64>,
    reporter: Reporter,
    lease: Lease,
}

#[derive(Default)]
struct Tasks {
    live: HashMap<TaskId, LiveTask>,
    retired: Retired,
}

impl Tasks {
    fn get_mut(&mut self, task_id: TaskId) -> Result<&mut LiveTask, Error> {
        if self.retired.contains(&task_id) {
            return Err(Error::RetiredTask(task_id));
        }

        self.live
            .get_mut(&task_id)
            .ok_or(Error::UnknownTask(task_id))
    }

    fn retire(&mut self, task_id: TaskId) -> Result<LiveTask, Error> {
        if self.retired.contains(&task_id) {
            return Err(Error::RetiredTask(task_id));
        }

        let task = self
            .live
            .remove(&task_id)
            .ok_or(Error::UnknownTask(task_id))?;

        self.retired.insert(task_id);

        Ok(task)
    }
}

/// The reporting context of a process.
///
/// Owns the shared channel, the collector's state machine and the
/// presentation. Typically a single context is created per process and
/// shared (e.g. via `Arc`) with every thread that reports progress.
///
/// # Ownership
///
/// At most one collector runs per context at any time. Whoever starts it
/// (via [`start()`](Self::start), or implicitly via [`begin_task()`](Self::begin_task))
/// receives the owning [`Lease`]; every other caller receives a non-owning one.
/// Only returning the owning lease stops the collector.
///
/// # Child processes
///
/// A child process creates its own context and registers the parent's
/// [`ReporterHandle`] in it. From then on it forwards all events upstream
/// and never runs a collector of its own.
pub struct Context {
    config: Config,
    channel: Channel,
    local: Reporter,
    machine: Mutex<Machine>,
    tasks: Mutex<Tasks>,
    presentation: SharedPresentation,
    #[cfg(unix)]
    endpoint: Mutex<Option<crate::endpoint::Endpoint>>,
}

impl Context {
    /// Creates a context rendering to `presentation`.
    pub fn new(config: Config, presentation: impl Presentation + 'static) -> Self {
        let channel = Channel::new();
        let local = Reporter::new(Arc::new(ChannelTransport::from(channel.sender().clone())));
        let presentation: Box<dyn Presentation> = Box::new(presentation);

        Self {
            config,
            channel,
            local,
            machine: Mutex::new(Machine {
                pickup: Pickup::Idle {
                    board: Board::default(),
                },
                generation: Generation::MIN,
                detached: false,
                upstream: None,
            }),
            tasks: Mutex::new(Tasks::default()),
            presentation: Arc::new(Mutex::new(presentation)),
            #[cfg(unix)]
            endpoint: Mutex::new(None),
        }
    }

    /// Creates a context drawing progress bars onto the terminal.
    pub fn terminal(config: Config) -> Self {
        let presentation = BarTty::new(&config);
        Self::new(config, presentation)
    }

    /// Returns the context's config.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current state of the collector.
    pub fn state(&self) -> PickupState {
        match &self.machine.lock().pickup {
            Pickup::Idle { .. } => PickupState::Idle,
            Pickup::Running {
                collector, leases, ..
            } => PickupState::Running {
                generation: collector.generation(),
                leases: *leases,
            },
        }
    }

    /// Starts the collector, unless one is already running.
    ///
    /// Returns an owning lease if this call started the collector, otherwise
    /// (already running, or the context is detached) a non-owning one.
    pub fn start(&self) -> Result<Lease, Error> {
        let mut guard = self.machine.lock();
        self.lease(&mut guard)
    }

    fn lease(&self, machine: &mut Machine) -> Result<Lease, Error> {
        if machine.is_detached() {
            return Ok(Lease::detached());
        }

        if let Pickup::Running {
            collector, leases, ..
        } = &mut machine.pickup
        {
            *leases += 1;

            return Ok(Lease {
                owner: false,
                generation: Some(collector.generation()),
            });
        }

        let generation = self.spawn_collector(machine)?;

        Ok(Lease {
            owner: true,
            generation: Some(generation),
        })
    }

    /// Returns a lease, stopping the collector once its owner's lease
    /// and every other lease handed out for it have been returned.
    ///
    /// Stopping waits for the collector to drain the channel,
    /// present a final snapshot and exit.
    /// Returning an outdated lease is a no-op.
    pub fn stop(&self, lease: Lease) {
        let mut guard = self.machine.lock();
        let machine = &mut *guard;

        let Pickup::Running {
            collector,
            leases,
            stop_pending,
        } = &mut machine.pickup
        else {
            return;
        };

        if lease.generation != Some(collector.generation()) {
            #[cfg(feature = "tracing")]
            tracing::trace!(lease = ?lease, "Ignoring outdated lease.");
            return;
        }

        *leases = leases.saturating_sub(1);
        *stop_pending |= lease.owner;

        if !*stop_pending {
            #[cfg(feature = "tracing")]
            tracing::trace!(lease = ?lease, "Ignoring stop from non-owner.");
            return;
        }

        if *leases > 0 {
            #[cfg(feature = "tracing")]
            tracing::trace!(leases = *leases, "Deferring stop until all leases are returned.");
            return;
        }

        self.stop_collector(machine);
    }

    /// Stops the collector, if running, regardless of ownership.
    ///
    /// Leases handed out for it become outdated.
    pub fn shutdown(&self) {
        let mut guard = self.machine.lock();
        self.stop_collector(&mut guard);
    }

    /// Marks this context as never owning a collector.
    ///
    /// Subsequent calls to [`start()`](Self::start) hand out non-owning leases
    /// without starting anything. A collector that is already running keeps
    /// running until its owner stops it.
    pub fn detach(&self) {
        self.machine.lock().detached = true;
    }

    /// Returns `true` if this context never starts a collector,
    /// either because it was detached or because it forwards to a registered reporter.
    pub fn is_detached(&self) -> bool {
        self.machine.lock().is_detached()
    }

    fn spawn_collector(&self, machine: &mut Machine) -> Result<Generation, Error> {
        let generation = machine.generation.next();

        let board = match &mut machine.pickup {
            Pickup::Idle { board } => mem::take(board),
            Pickup::Running { collector, .. } => return Ok(collector.generation()),
        };

        let collector = Collector::spawn(
            generation,
            self.channel.receiver().clone(),
            board,
            Arc::clone(&self.presentation),
            self.config.interval,
        )?;

        #[cfg(feature = "tracing")]
        tracing::debug!(generation = generation.as_raw(), "Started collector.");

        machine.generation = generation;
        machine.pickup = Pickup::Running {
            collector,
            leases: 1,
            stop_pending: false,
        };

        Ok(generation)
    }

    fn stop_collector(&self, machine: &mut Machine) {
        let idle = Pickup::Idle {
            board: Board::default(),
        };

        let Pickup::Running { collector, .. } = mem::replace(&mut machine.pickup, idle) else {
            return;
        };

        let generation = collector.generation();

        // The context holds a receiver, so this cannot fail:
        let _ = self.channel.sender().send(Message::Stop(generation));

        let board = collector.join();

        #[cfg(feature = "tracing")]
        tracing::debug!(generation = generation.as_raw(), "Stopped collector.");

        machine.pickup = Pickup::Idle { board };
    }

    /// Blocks until every event enqueued so far has been presented at least once.
    ///
    /// If no collector is running but events are waiting,
    /// one is started just for draining them.
    /// In a context forwarding to a registered reporter this
    /// blocks until the upstream endpoint has received every event instead.
    ///
    /// Fails with [`Error::CollectorExited`] if the running collector died
    /// before presenting everything. The dead collector is reaped, so the
    /// next start spawns a fresh one.
    pub fn flush(&self) -> Result<(), Error> {
        let mut guard = self.machine.lock();
        let machine = &mut *guard;

        if let Some((upstream, _)) = &machine.upstream {
            return upstream.flush();
        }

        let pending = match &machine.pickup {
            Pickup::Running { collector, .. } => {
                if self.await_flush(collector)? {
                    return Ok(());
                }
                None
            }
            Pickup::Idle { board } => Some(!self.channel.is_empty() || board.needs_render()),
        };

        let Some(pending) = pending else {
            self.stop_collector(machine);
            return Err(Error::CollectorExited);
        };

        if machine.detached || !pending {
            return Ok(());
        }

        self.spawn_collector(machine)?;
        self.stop_collector(machine);

        Ok(())
    }

    /// Asks `collector` to present everything received so far.
    ///
    /// Returns `false` if it exited without answering.
    fn await_flush(&self, collector: &Collector) -> Result<bool, Error> {
        let (ack_sender, ack_receiver) = crossbeam_channel::bounded(1);

        self.channel
            .sender()
            .send(Message::Flush(ack_sender))
            .map_err(|_| Error::Disconnected)?;

        loop {
            match ack_receiver.recv_timeout(self.config.interval) {
                Ok(()) => return Ok(true),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if collector.is_finished() {
                        return Ok(false);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(false),
            }
        }
    }

    /// Returns the reporter tasks of this context report through:
    /// the registered upstream reporter, if any, otherwise the local one.
    pub fn reporter(&self) -> Reporter {
        match &self.machine.lock().upstream {
            Some((upstream, _)) => upstream.clone(),
            None => self.local.clone(),
        }
    }

    /// Returns a handle for reporting to this context from a child process.
    ///
    /// Binds the context's endpoint on first use. A context that itself
    /// forwards to a registered reporter hands out that reporter's handle.
    #[cfg(unix)]
    pub fn current_reporter(&self) -> Result<ReporterHandle, Error> {
        if let Some((_, handle)) = &self.machine.lock().upstream {
            return Ok(handle.clone());
        }

        let mut endpoint = self.endpoint.lock();

        if endpoint.is_none() {
            let bound = crate::endpoint::Endpoint::bind(self.channel.sender().clone())?;
            *endpoint = Some(bound);
        }

        endpoint
            .as_ref()
            .map(|endpoint| endpoint.handle().clone())
            .ok_or(Error::Disconnected)
    }

    /// Returns a handle for reporting to this context from a child process.
    #[cfg(not(unix))]
    pub fn current_reporter(&self) -> Result<ReporterHandle, Error> {
        Err(Error::Unsupported("cross-process reporting"))
    }

    /// Makes this context forward all of its tasks' events to `handle`.
    ///
    /// Must be called in a child process before any of its tasks report.
    /// The connection is established on the first report.
    pub fn register_reporter(&self, handle: &ReporterHandle) {
        let reporter = Reporter::connect(handle);
        self.machine.lock().upstream = Some((reporter, handle.clone()));
    }

    /// Stops forwarding to the registered reporter, flushing it first.
    pub fn unregister_reporter(&self) -> Result<(), Error> {
        let upstream = self.machine.lock().upstream.take();

        match upstream {
            Some((reporter, _)) => reporter.flush(),
            None => Ok(()),
        }
    }

    /// Begins a task of `total` units of work (or `None`, if unknown),
    /// emitting its first event.
    ///
    /// Starts the collector if none is running; in that case the
    /// task owns it and stops it again once it and every task begun
    /// while it was running have ended.
    pub fn begin_task(&self, name: impl Into<String>, total: Option<u64>) -> Result<TaskId, Error> {
        let (reporter, lease) = {
            let mut guard = self.machine.lock();
            let upstream = guard.upstream.as_ref().map(|(upstream, _)| upstream.clone());

            match upstream {
                Some(upstream) => (upstream, Lease::detached()),
                None => (self.local.clone(), self.lease(&mut guard)?),
            }
        };

        let task_id = TaskId::new_unique();
        let name = name.into();

        if let Err(err) = reporter.report(task_id, name.clone(), 0, total, true, false) {
            self.stop(lease);
            return Err(err);
        }

        let task = LiveTask {
            name,
            done: 0,
            total,
            reporter,
            lease,
        };

        self.tasks.lock().live.insert(task_id, task);

        Ok(task_id)
    }

    /// Reports `done` completed units of work for the task `task_id`.
    pub fn report_step(&self, task_id: TaskId, done: u64) -> Result<(), Error> {
        let (reporter, name, total) = {
            let mut tasks = self.tasks.lock();
            let task = tasks.get_mut(task_id)?;

            task.done = done;

            (task.reporter.clone(), task.name.clone(), task.total)
        };

        reporter.report(task_id, name, done, total, false, false)
    }

    /// Ends the task `task_id` as complete, emitting its last event.
    ///
    /// If the task's total is known its last event reports it as fully done.
    /// The task's identifier is retired and must not be used again.
    pub fn end_task(&self, task_id: TaskId) -> Result<(), Error> {
        let task = self.tasks.lock().retire(task_id)?;

        let done = task.total.unwrap_or(task.done).max(task.done);

        let result = task
            .reporter
            .report(task_id, task.name, done, task.total, false, true);

        self.stop(task.lease);

        result
    }

    /// Writes a line of text to standard output, around the progress bars.
    pub fn stdout_write(&self, text: &str) {
        self.presentation.lock().write_out(Stream::Stdout, text);
    }

    /// Writes a line of text to standard error, around the progress bars.
    pub fn stderr_write(&self, text: &str) {
        self.presentation.lock().write_out(Stream::Stderr, text);
    }

    /// Returns a writer forwarding complete lines to `stream`, around the progress bars.
    ///
    /// Suitable as the sink of a logger.
    pub fn writer(&self, stream: Stream) -> ContextWriter<'_> {
        ContextWriter {
            context: self,
            stream,
            buffer: vec![],
        }
    }
}

impl Default for Context {
    /// Returns a terminal context configured from the environment.
    fn default() -> Self {
        Self::terminal(Config::from_env())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some((upstream, _)) = self.machine.get_mut().upstream.take() {
            let _ = upstream.flush();
        }

        self.shutdown();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

/// An `io::Write` adapter for writing out-of-band text through a [`Context`].
///
/// Text is passed on line by line; a trailing partial line is
/// held back until it is completed, flushed or the writer is dropped.
/// Flushing holds back an incomplete trailing UTF-8 sequence.
pub struct ContextWriter<'a> {
    context: &'a Context,
    stream: Stream,
    buffer: Vec<u8>,
}

impl ContextWriter<'_> {
    fn write_out(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        self.context.presentation.lock().write_out(self.stream, &text);
    }
}

impl io::Write for ContextWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        if let Some(end) = self.buffer.iter().rposition(|&byte| byte == b'\n') {
            let rest = self.buffer.split_off(end + 1);
            let lines = mem::replace(&mut self.buffer, rest);
            self.write_out(&lines);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let complete = match str::from_utf8(&self.buffer) {
            // The character's remaining bytes have yet to be written:
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            _ => self.buffer.len(),
        };

        if complete > 0 {
            let rest = self.buffer.split_off(complete);
            let text = mem::replace(&mut self.buffer, rest);
            self.write_out(&text);
        }

        Ok(())
    }
}

impl Drop for ContextWriter<'_> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            let rest = mem::take(&mut self.buffer);
            self.write_out(&rest);
        }
    }
}
