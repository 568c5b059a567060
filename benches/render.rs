use criterion::{black_box, criterion_group, criterion_main, Criterion};

use std::time::{Duration, SystemTime};

use parbar::{
    format_line, test_utils::SharedBuffer, BarTty, Presentation, Report, Snapshot, TaskId,
};

const ITERATIONS: usize = 10_000;
const WIDTH: usize = 120;

fn make_report(index: u64) -> Report {
    Report {
        task_id: TaskId::default(),
        name: format!("task {index}"),
        done: index,
        total: Some(100),
        start_time: Some(SystemTime::now() - Duration::from_secs(index)),
        updates: 1,
    }
}

pub fn line(c: &mut Criterion) {
    c.bench_function("format_line()", |b| {
        let report = make_report(42);
        let now = SystemTime::now();

        b.iter(|| {
            for _ in 0..ITERATIONS {
                black_box(format_line(&report, WIDTH, now));
            }
        });
    });
}

pub fn redraw(c: &mut Criterion) {
    c.bench_function("present(): 10 active", |b| {
        let out = SharedBuffer::default();
        let mut tty = BarTty::with_writers(out.clone(), std::io::sink(), WIDTH);

        let snapshot = Snapshot {
            active: (0..10).map(make_report).collect(),
            finishing: vec![],
        };

        b.iter(|| {
            for _ in 0..(ITERATIONS / 10) {
                tty.present(&snapshot);
            }
            out.clear();
        });
    });
}

criterion_group!(benches, line, redraw);
criterion_main!(benches);
