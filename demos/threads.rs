use std::{sync::Arc, thread, time::Duration};

use parbar::{Config, Context};

fn main() {
    let context = Arc::new(Context::terminal(Config::from_env()));

    let handles: Vec<_> = (0..5_u64)
        .map(|index| {
            let context = Arc::clone(&context);

            thread::spawn(move || -> Result<(), parbar::Error> {
                let total = 40 + index * 15;
                let task_id = context.begin_task(format!("worker {index}"), Some(total))?;

                for done in 1..=total {
                    thread::sleep(Duration::from_millis(20 + index * 5));

                    context.report_step(task_id, done)?;

                    // Regular output interleaves with the bars:
                    if done % 50 == 0 {
                        context.stdout_write(&format!("worker {index} reached {done} units"));
                    }
                }

                context.end_task(task_id)
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // Make sure the final lines made it onto the terminal:
    context.flush().unwrap();
}
