use std::{process::Command, thread, time::Duration};

use parbar::{Config, Context, NopPresentation, ReporterHandle};

const WORKERS: u64 = 4;

fn main() -> Result<(), parbar::Error> {
    // Child processes get handed the parent's reporter through the environment:
    match ReporterHandle::from_env() {
        Some(handle) => worker(&handle),
        None => parent(),
    }
}

fn parent() -> Result<(), parbar::Error> {
    let context = Context::terminal(Config::from_env());

    let lease = context.start()?;
    let handle = context.current_reporter()?;
    let executable = std::env::current_exe()?;

    let mut children = vec![];

    for index in 0..WORKERS {
        let child = Command::new(&executable)
            .arg(index.to_string())
            .env(ReporterHandle::ENV_KEY, handle.to_string())
            .spawn()?;

        children.push(child);
    }

    for mut child in children {
        child.wait()?;
    }

    context.stop(lease);

    Ok(())
}

fn worker(handle: &ReporterHandle) -> Result<(), parbar::Error> {
    let index: u64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or_default();

    // Never draws anything itself:
    let context = Context::new(Config::default(), NopPresentation);
    context.register_reporter(handle);

    let total = 30 + index * 10;
    let name = format!("process {index} (pid {})", std::process::id());
    let task_id = context.begin_task(name, Some(total))?;

    for done in 1..=total {
        thread::sleep(Duration::from_millis(30 + index * 10));
        context.report_step(task_id, done)?;
    }

    context.end_task(task_id)?;

    context.unregister_reporter()
}
