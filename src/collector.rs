//! The background consumer of the shared channel.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::{board::Board, event::Message, Error, Generation, Presentation};

/// The shortest interval a collector wakes up at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) type SharedPresentation = Arc<Mutex<Box<dyn Presentation>>>;

/// A running collector thread.
///
/// The collector takes over the board for the duration of its run
/// and hands it back once joined, so task state survives restarts.
pub(crate) struct Collector {
    generation: Generation,
    handle: JoinHandle<Board>,
}

impl Collector {
    pub(crate) fn spawn(
        generation: Generation,
        receiver: Receiver<Message>,
        board: Board,
        presentation: SharedPresentation,
        interval: Duration,
    ) -> Result<Self, Error> {
        let interval = interval.max(MIN_INTERVAL);

        let handle = thread::Builder::new()
            .name(format!("parbar-collector-{}", generation.as_raw()))
            .spawn(move || run(generation, receiver, board, presentation, interval))?;

        Ok(Self { generation, handle })
    }

    pub(crate) fn generation(&self) -> Generation {
        self.generation
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the collector to exit, returning its board.
    ///
    /// The caller is expected to have sent a [`Message::Stop`] for this
    /// collector's generation beforehand.
    pub(crate) fn join(self) -> Board {
        match self.handle.join() {
            Ok(board) => board,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    generation = self.generation.as_raw(),
                    "Collector panicked. Discarding its task state."
                );
                Board::default()
            }
        }
    }
}

fn run(
    generation: Generation,
    receiver: Receiver<Message>,
    mut board: Board,
    presentation: SharedPresentation,
    interval: Duration,
) -> Board {
    loop {
        let deadline = Instant::now() + interval;

        loop {
            match receiver.recv_deadline(deadline) {
                Ok(Message::Event(event)) => board.merge(event),
                Ok(Message::Flush(ack)) => {
                    render(&mut board, &presentation);
                    let _ = ack.send(());
                }
                Ok(Message::Stop(target)) if target == generation => {
                    drain(&receiver, &mut board, &presentation);
                    render(&mut board, &presentation);
                    return board;
                }
                // Left behind by a collector that died before receiving it:
                Ok(Message::Stop(_)) => {}
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    render(&mut board, &presentation);
                    return board;
                }
            }
        }

        render(&mut board, &presentation);
    }
}

/// Processes whatever is still queued, without waiting for more.
fn drain(receiver: &Receiver<Message>, board: &mut Board, presentation: &SharedPresentation) {
    while let Ok(message) = receiver.try_recv() {
        match message {
            Message::Event(event) => board.merge(event),
            Message::Flush(ack) => {
                render(board, presentation);
                let _ = ack.send(());
            }
            Message::Stop(_) => {}
        }
    }
}

fn render(board: &mut Board, presentation: &SharedPresentation) {
    if !board.needs_render() {
        return;
    }

    let snapshot = board.snapshot();

    presentation.lock().present(&snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{presentation::test_utils::RecordingPresentation, ProgressEvent, TaskId};

    fn spawn(
        receiver: Receiver<Message>,
        interval: Duration,
    ) -> (Collector, RecordingPresentation) {
        let recorder = RecordingPresentation::default();
        let presentation: SharedPresentation =
            Arc::new(Mutex::new(Box::new(recorder.clone()) as Box<dyn Presentation>));

        let collector = Collector::spawn(
            Generation::MIN,
            receiver,
            Board::default(),
            presentation,
            interval,
        )
        .unwrap();

        (collector, recorder)
    }

    #[test]
    fn stop_drains_everything() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        // Long enough for the collector to never wake up on its own:
        let (collector, recorder) = spawn(receiver, Duration::from_secs(60));

        let task_id = TaskId::new_unique();

        for done in 0..=100 {
            let event = ProgressEvent::new(task_id, "t", done, Some(100), done == 0, done == 100);
            sender.send(Message::Event(event)).unwrap();
        }
        sender.send(Message::Stop(Generation::MIN)).unwrap();

        let board = collector.join();

        assert!(board.is_idle());

        let finished = recorder.finished();

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].done, 100);
        assert_eq!(finished[0].updates, 101);
    }

    #[test]
    fn flush_renders_and_acknowledges() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let (collector, recorder) = spawn(receiver, Duration::from_secs(60));

        let task_id = TaskId::new_unique();
        let event = ProgressEvent::new(task_id, "t", 1, Some(2), true, false);
        sender.send(Message::Event(event)).unwrap();

        let (ack_sender, ack_receiver) = crossbeam_channel::bounded(1);
        sender.send(Message::Flush(ack_sender)).unwrap();
        ack_receiver.recv().unwrap();

        assert_eq!(recorder.reports_of(task_id).len(), 1);
        assert_eq!(recorder.active_lines(), 1);

        sender.send(Message::Stop(Generation::MIN)).unwrap();
        let board = collector.join();

        // Still running, so it survives the collector:
        assert!(!board.is_idle());
    }

    #[test]
    fn refreshes_on_interval() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let (collector, recorder) = spawn(receiver, Duration::from_millis(5));

        let task_id = TaskId::new_unique();
        let event = ProgressEvent::new(task_id, "t", 0, Some(2), true, false);
        sender.send(Message::Event(event)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.snapshots().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(recorder.snapshots().len() >= 3);

        sender.send(Message::Stop(Generation::MIN)).unwrap();
        collector.join();
    }

    #[test]
    fn ignores_stop_of_other_generation() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let (collector, _recorder) = spawn(receiver, Duration::from_millis(5));

        sender.send(Message::Stop(Generation::MIN.next())).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert!(!collector.is_finished());

        sender.send(Message::Stop(Generation::MIN)).unwrap();
        collector.join();
    }

    #[test]
    fn exits_on_disconnect() {
        let (sender, receiver) = crossbeam_channel::unbounded::<Message>();
        let (collector, _recorder) = spawn(receiver, Duration::from_millis(5));

        drop(sender);

        assert!(collector.join().is_idle());
    }
}
