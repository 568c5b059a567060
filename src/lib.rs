#![warn(missing_docs)]

//! Progress bars for many concurrent tasks, redrawn in place.
//!
//! Tasks on any thread (or in child processes) report their progress
//! through a [`Reporter`] onto a single shared channel. A single
//! background collector per [`Context`] drains that channel, keeps the
//! authoritative state of every task, and hands a [`Snapshot`] to a
//! [`Presentation`] on every refresh, such as the terminal's [`BarTty`].

mod bar_tty;
mod board;
mod channel;
mod collector;
mod config;
mod context;
mod endpoint;
mod error;
mod event;
mod generation;
mod presentation;
mod report;
mod reporter;
mod retired;
mod transport;

pub use self::{
    bar_tty::{format_line, BarTty},
    board::Snapshot,
    config::{Config, DEFAULT_INTERVAL, MIN_TERMINAL_WIDTH},
    context::{Context, ContextWriter, Lease, PickupState},
    error::Error,
    event::{ProgressEvent, TaskId},
    generation::Generation,
    presentation::{NopPresentation, Presentation, Stream},
    report::Report,
    reporter::{Reporter, ReporterHandle, Transport},
};

#[cfg(any(test, feature = "test-utils"))]
pub use self::presentation::test_utils;
