//! # CSV Telemetry
//!
//! Periodic sampler that records scheduler state to a CSV file for
//! offline analysis. The writer is an external observer: it reads only
//! the public scheduler accessors and never touches internal queues, so
//! reimplementing or removing it cannot change scheduling behaviour.
//!
//! Each sample emits one row per task (`RUNNING` for the current task,
//! `STATE_UPDATE` for the rest) followed by a `CPU_UTILIZATION` row.
//! Free-form rows can be interleaved with [`Telemetry::log_event`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use parking_lot::Mutex;

use crate::config::DEFAULT_TELEMETRY_INTERVAL;
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Column layout of the telemetry file.
pub const CSV_HEADER: &str = "Timestamp,EventType,TaskName,TaskState,Priority,DeadlineMs,DeadlinePercent,ExecutionCount,MissCount,AvgExecTimeMs,CPUUtilization";

/// Unix epoch seconds with a millisecond fraction. Informative only;
/// the timestamp format is not a compatibility surface.
fn timestamp() -> String {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(now) => format!("{}.{:03}", now.as_secs(), now.subsec_millis()),
        Err(_) => "0.000".to_string(),
    }
}

pub struct Telemetry {
    scheduler: Arc<Scheduler>,
    sink: Arc<Mutex<BufWriter<File>>>,
    interval: Duration,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Telemetry {
    /// Open (truncating) the output file and write the header row.
    pub fn new(scheduler: Arc<Scheduler>, path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut sink = BufWriter::new(file);
        writeln!(sink, "{CSV_HEADER}")?;
        sink.flush()?;
        Ok(Self {
            scheduler,
            sink: Arc::new(Mutex::new(sink)),
            interval: DEFAULT_TELEMETRY_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Change the sampling interval. Takes effect at the next start.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Launch the sampling thread. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(&self.scheduler);
        let sink = Arc::clone(&self.sink);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let worker = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                sample(&scheduler, &sink);
                thread::sleep(interval);
            }
        });
        *self.worker.lock() = Some(worker);
    }

    /// Stop sampling, join the thread, and flush. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        self.flush();
    }

    /// Append a free-form event row (only the event type and a message
    /// in the task-name column are filled in).
    pub fn log_event(&self, event_type: &str, message: &str) {
        let mut sink = self.sink.lock();
        if let Err(err) = writeln!(sink, "{},{event_type},{message},,,,,,,,", timestamp()) {
            warn!("telemetry write failed: {err}");
        }
    }

    pub fn flush(&self) {
        if let Err(err) = self.sink.lock().flush() {
            warn!("telemetry flush failed: {err}");
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.stop();
        self.flush();
    }
}

/// Write one full sample: a row per task, then the utilisation row.
fn sample(scheduler: &Arc<Scheduler>, sink: &Arc<Mutex<BufWriter<File>>>) {
    let tasks = scheduler.tasks();
    let current = scheduler.current_task();

    let mut sink = sink.lock();
    for task in &tasks {
        let event = match &current {
            Some(running) if Arc::ptr_eq(running, task) => "RUNNING",
            _ => "STATE_UPDATE",
        };
        if let Err(err) = writeln!(sink, "{}", task_row(task, event)) {
            warn!("telemetry write failed: {err}");
            return;
        }
    }
    if let Err(err) = writeln!(
        sink,
        "{},CPU_UTILIZATION,,,,,,,,,{:.2}",
        timestamp(),
        scheduler.cpu_utilization()
    ) {
        warn!("telemetry write failed: {err}");
    }
}

fn task_row(task: &Arc<Task>, event: &str) -> String {
    let stats = task.stats();
    let deadline_ms = task.deadline().as_millis();
    let deadline_percent = if deadline_ms > 0 {
        100.0 * stats.deadline_counter.as_millis() as f32 / deadline_ms as f32
    } else {
        0.0
    };
    let avg_exec_ms = stats.average_execution.as_micros() as f32 / 1000.0;
    format!(
        "{},{event},{},{},{},{deadline_ms},{deadline_percent:.2},{},{},{avg_exec_ms:.3},",
        timestamp(),
        task.name(),
        task.state().as_str(),
        task.dynamic_priority(),
        stats.execution_count,
        stats.deadline_misses,
    )
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
