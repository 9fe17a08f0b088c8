//! # AdaptOS Demo
//!
//! Drives the simulator with four tasks exhibiting different behaviours:
//!
//! | Task          | Priority | Policy      | Period | Deadline | Behaviour |
//! |---------------|----------|-------------|--------|----------|-----------|
//! | `periodic`    | 50       | Preemptive  | 100 ms | 90 ms    | 20 ms of simulated I/O per run |
//! | `cpu-heavy`   | 30       | Preemptive  | 200 ms | 100 ms   | 30 ms of work, 150 ms every 5th run |
//! | `recoverable` | 70       | Preemptive  | 300 ms | 50 ms    | fails every 3rd run, recovers |
//! | `cooperative` | 40       | Cooperative | 500 ms | —        | five 10 ms chunks, yielding between |
//!
//! The expected dynamics: the cpu-heavy task's long every-5th run blows
//! its 100 ms deadline, so its dynamic priority creeps up from 30; the
//! recoverable task demonstrates fault containment without taking the
//! kernel down; the cooperative task is never preempted mid-chunk.
//!
//! Scheduler state is printed every few seconds and sampled to
//! `scheduler_log.csv`; console output is teed to `adaptos_output.log`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, LevelFilter};

use adaptos::kernel::Kernel;
use adaptos::task::{SchedulePolicy, TaskFault, TaskSpec};
use adaptos::telemetry::Telemetry;
use adaptos::{logger, workloads};

const RUN_FOR: Duration = Duration::from_secs(20);
const STATUS_EVERY: Duration = Duration::from_secs(4);

fn main() {
    logger::init_with_file(LevelFilter::Info, "adaptos_output.log").ok();

    println!("AdaptOS demonstration");
    println!("---------------------");

    let kernel = Kernel::new();
    kernel.initialize();

    // Periodic I/O-ish task: comfortably inside its 90 ms deadline.
    kernel.create_task(
        "periodic",
        workloads::io_bound(Duration::from_millis(20)),
        TaskSpec {
            priority: 50,
            period: Duration::from_millis(100),
            deadline: Duration::from_millis(90),
            ..TaskSpec::default()
        },
    )
    .expect("failed to create periodic task");

    // CPU-intensive task whose every 5th run overshoots its deadline.
    let iterations = AtomicUsize::new(0);
    kernel.create_task(
        "cpu-heavy",
        Box::new(move || {
            let run = iterations.fetch_add(1, Ordering::Relaxed) + 1;
            let work = if run % 5 == 0 { 150 } else { 30 };
            thread::sleep(Duration::from_millis(work));
            Ok(())
        }),
        TaskSpec {
            priority: 30,
            period: Duration::from_millis(200),
            deadline: Duration::from_millis(100),
            ..TaskSpec::default()
        },
    )
    .expect("failed to create cpu-heavy task");

    // Recoverable task that fails every third invocation.
    kernel.create_task(
        "recoverable",
        workloads::failing_every(3, Duration::from_millis(10)),
        TaskSpec {
            priority: 70,
            period: Duration::from_millis(300),
            deadline: Duration::from_millis(50),
            recoverable: true,
            ..TaskSpec::default()
        },
    )
    .expect("failed to create recoverable task");

    // Cooperative task working in chunks, yielding between them.
    {
        let scheduler = Arc::downgrade(kernel.scheduler());
        kernel.create_task(
            "cooperative",
            Box::new(move || {
                for chunk in 0..5 {
                    thread::sleep(Duration::from_millis(10));
                    if chunk < 4 {
                        match scheduler.upgrade() {
                            Some(scheduler) => scheduler.yield_now(),
                            None => return Err(TaskFault::new("scheduler gone")),
                        }
                    }
                }
                Ok(())
            }),
            TaskSpec {
                priority: 40,
                policy: SchedulePolicy::Cooperative,
                period: Duration::from_millis(500),
                ..TaskSpec::default()
            },
        )
        .expect("failed to create cooperative task");
    }

    let telemetry = match Telemetry::new(Arc::clone(kernel.scheduler()), "scheduler_log.csv") {
        Ok(telemetry) => {
            telemetry.start();
            telemetry.log_event("SYSTEM", "demo started");
            Some(telemetry)
        }
        Err(err) => {
            log::warn!("telemetry disabled: {err}");
            None
        }
    };

    kernel.start();
    info!("running for {RUN_FOR:?}");

    let started = Instant::now();
    let mut last_status: Option<Instant> = None;
    while started.elapsed() < RUN_FOR {
        if last_status.map_or(true, |at| at.elapsed() >= STATUS_EVERY) {
            last_status = Some(Instant::now());
            println!("--------------------------------------------------");
            println!("{}", kernel.scheduler().task_state_visualization());
            println!("CPU utilization: {:.1}%", kernel.scheduler().cpu_utilization());
        }
        thread::sleep(Duration::from_millis(50));
    }

    // Shutdown order: stop sampling first so the last rows are coherent.
    if let Some(telemetry) = &telemetry {
        telemetry.log_event("SYSTEM", "demo stopping");
        telemetry.stop();
    }
    kernel.stop();

    println!("--------------------------------------------------");
    for task in kernel.scheduler().tasks() {
        let stats = task.stats();
        println!(
            "{:<12} runs {:>4}  misses {:>3}  avg {:>8.3} ms  priority {} -> {}",
            task.name(),
            stats.execution_count,
            stats.deadline_misses,
            stats.average_execution.as_micros() as f64 / 1000.0,
            task.base_priority(),
            task.dynamic_priority(),
        );
    }
    println!("Telemetry written to scheduler_log.csv");
    println!("Console log written to adaptos_output.log");
}
