//! Progress bars redrawn in place on a terminal.

use std::{
    io::{self, Stderr, Stdout, Write},
    time::{Duration, SystemTime},
};

use crate::{Config, Presentation, Report, Snapshot, Stream};

const BAR_WIDTH: usize = 40;
const BAR_CHAR: char = ':';

// Erase the whole line, then move the cursor to its beginning.
const ERASE_LINE: &str = "\x1b[2K\x1b[1G";
// Move the cursor up, then clear to the end of the line.
const ERASE_LINE_ABOVE: &str = "\x1b[A\x1b[K";

/// Implementation of `Presentation` drawing one bar per task onto a terminal.
///
/// Active tasks are redrawn in place on every refresh; finishing tasks
/// are printed once above them and scroll away with regular output.
pub struct BarTty<O = Stdout, E = Stderr> {
    out: O,
    err: E,
    /// The currently drawn active lines.
    lines: Vec<String>,
    width: usize,
}

impl BarTty {
    /// Creates a presentation drawing to the process' standard output,
    /// at the width resolved from `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_writers(io::stdout(), io::stderr(), config.resolve_width())
    }
}

impl<O, E> BarTty<O, E>
where
    O: Write,
    E: Write,
{
    /// Creates a presentation drawing to `out`, writing
    /// out-of-band error text to `err`, at a fixed `width`.
    pub fn with_writers(out: O, err: E, width: usize) -> Self {
        Self {
            out,
            err,
            lines: vec![],
            width,
        }
    }

    /// Returns the width every line is rendered at.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the number of active lines currently drawn.
    pub fn drawn_lines(&self) -> usize {
        self.lines.len()
    }

    fn erase(&mut self) -> io::Result<()> {
        let drawn = self.lines.len();

        if drawn >= 1 {
            self.out.write_all(ERASE_LINE.as_bytes())?;
        }

        if drawn >= 2 {
            self.out
                .write_all(ERASE_LINE_ABOVE.repeat(drawn - 1).as_bytes())?;
        }

        Ok(())
    }

    fn redraw(&mut self) -> io::Result<()> {
        self.out.write_all(self.lines.join("\n").as_bytes())?;
        self.out.flush()
    }

    fn try_present(&mut self, snapshot: &Snapshot) -> io::Result<()> {
        let now = SystemTime::now();

        self.erase()?;

        let finishing: Vec<_> = snapshot
            .finishing
            .iter()
            .map(|report| format_line(report, self.width, now))
            .collect();

        if !finishing.is_empty() {
            self.out.write_all(finishing.join("\n").as_bytes())?;
            self.out.write_all(b"\n")?;
        }

        self.lines = snapshot
            .active
            .iter()
            .map(|report| format_line(report, self.width, now))
            .collect();

        self.redraw()
    }

    fn try_write_out(&mut self, stream: Stream, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        self.erase()?;
        self.out.flush()?;

        let target: &mut dyn Write = match stream {
            Stream::Stdout => &mut self.out,
            Stream::Stderr => &mut self.err,
        };

        target.write_all(text.trim_end().as_bytes())?;
        target.write_all(b"\n")?;
        target.flush()?;

        self.redraw()
    }
}

impl<O, E> Presentation for BarTty<O, E>
where
    O: Write + Send,
    E: Write + Send,
{
    fn present(&mut self, snapshot: &Snapshot) {
        if let Err(_err) = self.try_present(snapshot) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "Failed to draw progress bars.");
        }
    }

    fn write_out(&mut self, stream: Stream, text: &str) {
        if let Err(_err) = self.try_write_out(stream, text) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "Failed to write around progress bars.");
        }
    }
}

/// Formats the progress line of `report`, truncated or padded to exactly `width` characters.
///
/// ```terminal
///   40.00% ::::::::::::::::                         |        2 /        5 |:  task A  | [00:01 / 00:01]
/// ```
pub fn format_line(report: &Report, width: usize, now: SystemTime) -> String {
    let fraction = report.fraction();

    let filled = ((fraction * BAR_WIDTH as f64) as usize).min(BAR_WIDTH);
    let bar: String = std::iter::repeat(BAR_CHAR).take(filled).collect();

    let mut line = format!(
        " {percent:6.2}% {bar:<bar_width$} | {done:8} / {total:8} |:  {name} ",
        percent = fraction * 100.0,
        bar_width = BAR_WIDTH,
        done = report.done,
        total = report.total.unwrap_or(0),
        name = report.name,
    );

    if let Some(elapsed) = report.elapsed(now) {
        line.push_str(&format!(
            " | [{} / {}]",
            format_duration(elapsed),
            format_remaining(elapsed, fraction)
        ));
    }

    fit(&line, width)
}

fn fit(line: &str, width: usize) -> String {
    let mut fitted: String = line.chars().take(width).collect();
    let len = fitted.chars().count();
    fitted.extend(std::iter::repeat(' ').take(width - len));
    fitted
}

fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let (hours, minutes, seconds) = (seconds / 3600, (seconds / 60) % 60, seconds % 60);

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

fn format_remaining(elapsed: Duration, fraction: f64) -> String {
    if fraction <= 0.0 {
        return "--:--".to_owned();
    }

    let remaining = elapsed.as_secs_f64() * (1.0 - fraction) / fraction;

    // Estimates for barely started tasks can exceed what a `Duration` holds:
    match Duration::try_from_secs_f64(remaining) {
        Ok(remaining) => format_duration(remaining),
        Err(_) => "--:--".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{presentation::test_utils::SharedBuffer, ProgressEvent, TaskId};

    const WIDTH: usize = 120;

    fn report(name: &str, done: u64, total: Option<u64>) -> Report {
        let event = ProgressEvent::new(TaskId::new_unique(), name, done, total, false, false);
        Report::new(event)
    }

    fn tty() -> (BarTty<SharedBuffer, SharedBuffer>, SharedBuffer, SharedBuffer) {
        let (out, err) = (SharedBuffer::default(), SharedBuffer::default());
        let tty = BarTty::with_writers(out.clone(), err.clone(), WIDTH);
        (tty, out, err)
    }

    #[test]
    fn line_layout() {
        let line = format_line(&report("task A", 2, Some(5)), WIDTH, SystemTime::now());

        let expected_prefix = format!(
            "  40.00% {}{} |        2 /        5 |:  task A ",
            ":".repeat(16),
            " ".repeat(24)
        );

        assert!(line.starts_with(&expected_prefix), "{line:?}");
        assert_eq!(line.chars().count(), WIDTH);
    }

    #[test]
    fn unknown_total_renders_full() {
        let line = format_line(&report("open-ended", 7, None), WIDTH, SystemTime::now());

        assert!(line.starts_with(" 100.00% "));
        assert!(line.contains(&":".repeat(BAR_WIDTH)));
    }

    #[test]
    fn timings_once_started() {
        let now = SystemTime::now();
        let mut report = report("timed", 1, Some(4));

        assert!(!format_line(&report, WIDTH, now).contains('['));

        report.start_time = Some(now - Duration::from_secs(30));

        let line = format_line(&report, WIDTH, now);

        assert!(line.contains(" | [00:30 / 01:30]"), "{line:?}");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(59)), "00:59");
        assert_eq!(format_duration(Duration::from_secs(61)), "01:01");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
        assert_eq!(format_remaining(Duration::from_secs(10), 0.0), "--:--");
    }

    #[test]
    fn unbounded_remaining_estimate() {
        let now = SystemTime::now();
        let mut report = report("tiny", 1, Some(1_000_000_000_000_000_000));
        report.start_time = Some(now - Duration::from_secs(60));

        let line = format_line(&report, WIDTH, now);

        assert!(line.contains(" | [01:00 / --:--]"), "{line:?}");
        assert_eq!(format_remaining(Duration::from_secs(1), f64::MIN_POSITIVE), "--:--");
    }

    #[test]
    fn width_invariant() {
        let now = SystemTime::now();
        let long_name = "x".repeat(500);

        let reports = [
            report("", 0, Some(1)),
            report("short", 3, Some(10)),
            report(&long_name, u64::MAX, Some(u64::MAX)),
            report("ünïcödé ✓", 123_456_789_012, None),
        ];

        for width in [90, WIDTH, 200] {
            for report in &reports {
                assert_eq!(format_line(report, width, now).chars().count(), width);
            }
        }
    }

    #[test]
    fn redraw_accounting() {
        let (mut tty, out, _err) = tty();

        let (a, b, c) = (report("a", 1, Some(3)), report("b", 0, Some(3)), report("c", 2, Some(2)));

        tty.present(&Snapshot {
            active: vec![a.clone(), b.clone()],
            finishing: vec![],
        });

        assert_eq!(tty.drawn_lines(), 2);
        let first = out.contents();
        assert!(!first.starts_with('\x1b'));
        assert!(!first.ends_with('\n'));
        assert_eq!(first.matches('\n').count(), 1);

        out.clear();

        tty.present(&Snapshot {
            active: vec![a.clone()],
            finishing: vec![c],
        });

        let second = out.contents();
        let expected_erase = format!("{ERASE_LINE}{ERASE_LINE_ABOVE}");
        assert!(second.starts_with(&expected_erase));
        let rest = &second[expected_erase.len()..];
        assert!(rest.starts_with("  100.00%") || rest.starts_with(" 100.00%"));
        // One finishing line (terminated), one active line (unterminated):
        assert_eq!(rest.matches('\n').count(), 1);
        assert_eq!(tty.drawn_lines(), 1);

        out.clear();

        tty.present(&Snapshot::default());

        assert_eq!(out.contents(), ERASE_LINE);
        assert_eq!(tty.drawn_lines(), 0);
    }

    #[test]
    fn out_of_band_writes_redraw() {
        let (mut tty, out, err) = tty();

        tty.present(&Snapshot {
            active: vec![report("a", 1, Some(3))],
            finishing: vec![],
        });
        out.clear();

        tty.write_out(Stream::Stderr, "something happened\n\n");

        assert_eq!(err.contents(), "something happened\n");
        let redrawn = out.contents();
        assert!(redrawn.starts_with(ERASE_LINE));
        assert_eq!(redrawn.chars().count(), ERASE_LINE.chars().count() + WIDTH);
        assert_eq!(tty.drawn_lines(), 1);

        out.clear();
        tty.write_out(Stream::Stdout, "");

        assert!(out.contents().is_empty());
    }
}
