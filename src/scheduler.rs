//! # Scheduler
//!
//! Priority-based scheduler driving the AdaptOS task set. Two cooperating
//! worker threads form the core:
//!
//! - **Dispatcher** — pops the highest dynamic-priority ready task, runs
//!   its handler to completion inline, updates statistics and CPU
//!   accounting, and applies the preemption policy.
//! - **Deadline monitor** — every `MONITOR_TICK` advances the deadline
//!   counters of all tasks that are not running, records misses, and
//!   requests a reschedule when a higher-priority task's deadline is
//!   approaching.
//!
//! ## Dispatcher loop
//!
//! Each iteration, under the scheduler lock:
//! 1. Run the coarse deadline check over the task set.
//! 2. Pop the next ready task (stale entries are filtered; an empty queue
//!    is rebuilt from the task set once before giving up).
//! 3. Run the selected handler with the lock released, then fold the
//!    timed run into the task statistics and the run-time account. A
//!    terminated recoverable task goes through the recovery path.
//! 4. With nothing to run, park on the condition variable for up to
//!    `IDLE_WAIT` and account the interval as idle time.
//! 5. Apply preemption: on time-slice expiry or a reschedule request,
//!    return the current task (if still ready) to the queue.
//! 6. Once per `PRIORITY_ADJUST_INTERVAL`, recompute all dynamic
//!    priorities and rebuild the ready queue.
//!
//! "Preemption" is realised by returning the preempted task to the queue
//! before the next pop — handlers are never interrupted mid-flight. This
//! is the simulator's deliberate pedagogical simplification.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::{
    DEFAULT_TIME_SLICE, IDLE_WAIT, MAX_RECOVERY_ATTEMPTS, MONITOR_TICK, PRIORITY_ADJUST_INTERVAL,
};
use crate::task::{SchedulePolicy, Task, TaskState};

// ---------------------------------------------------------------------------
// Preemption policy
// ---------------------------------------------------------------------------

/// Which events may force the current task back into the ready queue.
/// Cooperative tasks are exempt from all of them; they only yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreemptionMode {
    /// Nothing preempts; a cooperative yield still reschedules.
    None = 0,
    /// Time-slice expiry only.
    TimeSlice = 1,
    /// Deadline-driven priority requests only.
    Priority = 2,
    /// Both time-slice expiry and priority requests.
    Hybrid = 3,
}

impl PreemptionMode {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PreemptionMode::None,
            1 => PreemptionMode::TimeSlice,
            2 => PreemptionMode::Priority,
            _ => PreemptionMode::Hybrid,
        }
    }

    fn time_slice_applies(self) -> bool {
        matches!(self, PreemptionMode::TimeSlice | PreemptionMode::Hybrid)
    }

    fn priority_applies(self) -> bool {
        matches!(self, PreemptionMode::Priority | PreemptionMode::Hybrid)
    }
}

// ---------------------------------------------------------------------------
// Ready queue
// ---------------------------------------------------------------------------

/// Heap entry. Orders by the dynamic priority captured when the task was
/// enqueued (higher first), then by enqueue sequence (earlier first), so
/// tasks of equal priority run FIFO. Capturing the priority keeps the
/// heap invariant stable while dynamic priorities move; the periodic
/// `adjust_priorities` pass rebuilds the queue with fresh values.
struct QueueEntry {
    priority: u8,
    seq: u64,
    task: Arc<Task>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-heap of runnable tasks keyed on dynamic priority. Entries may go
/// stale (the task suspended, terminated, or removed since it was
/// pushed); consumers filter on pop.
struct ReadyQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl ReadyQueue {
    fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }

    fn push(&mut self, task: Arc<Task>) {
        let entry = QueueEntry {
            priority: task.dynamic_priority(),
            seq: self.next_seq,
            task,
        };
        self.next_seq += 1;
        self.heap.push(entry);
    }

    fn pop(&mut self) -> Option<Arc<Task>> {
        self.heap.pop().map(|entry| entry.task)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn drain(&mut self) -> Vec<Arc<Task>> {
        self.heap.drain().map(|entry| entry.task).collect()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// State guarded by the scheduler-wide mutex: the task set, the ready
/// queue, the current-task slot, the symbol map, and time accounting.
struct SchedulerCore {
    tasks: Vec<Arc<Task>>,
    ready: ReadyQueue,
    current: Option<Arc<Task>>,
    symbols: HashMap<String, char>,
    total_run: Duration,
    total_idle: Duration,
    last_schedule: Instant,
    last_priority_adjust: Instant,
}

impl SchedulerCore {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            tasks: Vec::new(),
            ready: ReadyQueue::new(),
            current: None,
            symbols: HashMap::new(),
            total_run: Duration::ZERO,
            total_idle: Duration::ZERO,
            last_schedule: now,
            last_priority_adjust: now,
        }
    }

    /// Pop the next ready task, skipping stale entries. An empty (or
    /// fully stale) queue is rebuilt from the task set once; if nothing
    /// is ready after that, there is nothing to run.
    fn select_next(&mut self) -> Option<Arc<Task>> {
        for attempt in 0..2 {
            while let Some(task) = self.ready.pop() {
                if task.state() == TaskState::Ready {
                    return Some(task);
                }
                // Stale entry, dropped.
            }
            if attempt == 0 {
                for task in &self.tasks {
                    if task.state() == TaskState::Ready {
                        self.ready.push(task.clone());
                    }
                }
            }
        }
        None
    }

    /// Recompute every task's dynamic priority and rebuild the ready
    /// queue in the new order, dropping entries that are no longer
    /// ready.
    fn adjust_priorities(&mut self) {
        for task in &self.tasks {
            task.update_priority();
        }
        for task in self.ready.drain() {
            if task.state() == TaskState::Ready {
                self.ready.push(task);
            }
        }
    }

    /// Coarse miss detector: a periodic task whose last execution lies
    /// more than `period + deadline` in the past has overrun, whatever
    /// its tick-driven counter says. Both detectors may fire for the
    /// same overrun; that double accounting is accepted behaviour.
    fn check_deadlines(&self) {
        let now = Instant::now();
        for task in &self.tasks {
            if task.period().is_zero() {
                continue;
            }
            if let Some(last) = task.stats().last_execution {
                if now.duration_since(last) > task.period() + task.deadline() {
                    task.record_deadline_miss();
                }
            }
        }
    }
}

/// The scheduler. Owns the task set and the two worker threads; shared
/// as `Arc<Scheduler>` between the kernel, the workers, and read-only
/// observers such as the telemetry writer.
pub struct Scheduler {
    core: Mutex<SchedulerCore>,
    /// Wakes the dispatcher out of its idle wait. Signalled by `yield_now`,
    /// by the deadline monitor's preemption requests, and by `stop`.
    dispatcher_wakeup: Condvar,
    is_running: AtomicBool,
    force_reschedule: AtomicBool,
    preemption_mode: AtomicU8,
    time_slice_ms: AtomicU64,
    /// Latest utilisation snapshot, stored as f32 bits so observers can
    /// read it without taking the scheduler lock.
    cpu_utilization_bits: AtomicU32,
    /// Process-wide recovery budget, shared by all tasks.
    recovery_attempts: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_time_slice(DEFAULT_TIME_SLICE)
    }

    pub fn with_time_slice(time_slice: Duration) -> Self {
        Self {
            core: Mutex::new(SchedulerCore::new()),
            dispatcher_wakeup: Condvar::new(),
            is_running: AtomicBool::new(false),
            force_reschedule: AtomicBool::new(false),
            preemption_mode: AtomicU8::new(PreemptionMode::Hybrid as u8),
            time_slice_ms: AtomicU64::new(time_slice.as_millis() as u64),
            cpu_utilization_bits: AtomicU32::new(0.0f32.to_bits()),
            recovery_attempts: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Task management
    // -----------------------------------------------------------------------

    /// Register a task. Ready tasks are queued immediately. The task is
    /// assigned a display symbol (`A`–`Z` in insertion order, `#` once
    /// the alphabet runs out) for the state visualisation.
    pub fn add_task(&self, task: Arc<Task>) {
        const SYMBOLS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

        let mut core = self.core.lock();
        core.tasks.push(task.clone());
        if task.state() == TaskState::Ready {
            core.ready.push(task.clone());
        }
        let symbol = if core.tasks.len() <= SYMBOLS.len() {
            SYMBOLS[core.tasks.len() - 1] as char
        } else {
            '#'
        };
        core.symbols.insert(task.name().to_string(), symbol);
        debug!("registered task '{}' as '{}'", task.name(), symbol);
    }

    /// Terminate and unregister a task by name. Returns whether the name
    /// resolved. A stale ready-queue entry for the task is left behind
    /// and discarded on pop.
    pub fn remove_task(&self, name: &str) -> bool {
        let mut core = self.core.lock();
        if let Some(pos) = core.tasks.iter().position(|t| t.name() == name) {
            let task = core.tasks.remove(pos);
            task.terminate();
            core.symbols.remove(name);
            debug!("removed task '{name}'");
            true
        } else {
            false
        }
    }

    pub fn find_task(&self, name: &str) -> Option<Arc<Task>> {
        self.core.lock().tasks.iter().find(|t| t.name() == name).cloned()
    }

    /// The task currently holding the dispatcher, if any.
    pub fn current_task(&self) -> Option<Arc<Task>> {
        self.core.lock().current.clone()
    }

    /// Snapshot of the task set, in insertion order.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.core.lock().tasks.clone()
    }

    /// Display symbol assigned to a task, if it is registered.
    pub fn task_symbol(&self, name: &str) -> Option<char> {
        self.core.lock().symbols.get(name).copied()
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Launch the dispatcher and deadline monitor threads. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            core.last_schedule = now;
            core.last_priority_adjust = now;
        }

        let dispatcher = {
            let scheduler = Arc::clone(self);
            thread::spawn(move || scheduler.dispatcher_loop())
        };
        let monitor = {
            let scheduler = Arc::clone(self);
            thread::spawn(move || scheduler.monitor_loop())
        };
        *self.workers.lock() = vec![dispatcher, monitor];
        info!(
            "scheduler started (time slice {:?}, mode {:?})",
            self.time_slice(),
            self.preemption_mode()
        );
    }

    /// Signal both workers, wake the dispatcher, and join. Idempotent;
    /// an in-flight handler finishes before the dispatcher exits.
    pub fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.dispatcher_wakeup.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Request an immediate reschedule. The cooperative counterpart to
    /// preemption: the flag is honoured at the next scheduling point.
    pub fn yield_now(&self) {
        self.force_reschedule.store(true, Ordering::SeqCst);
        self.dispatcher_wakeup.notify_one();
    }

    pub fn set_preemption_mode(&self, mode: PreemptionMode) {
        self.preemption_mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn preemption_mode(&self) -> PreemptionMode {
        PreemptionMode::from_u8(self.preemption_mode.load(Ordering::SeqCst))
    }

    /// Change the time slice. Takes effect at the next scheduling point.
    pub fn set_time_slice(&self, time_slice: Duration) {
        self.time_slice_ms.store(time_slice.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms.load(Ordering::SeqCst))
    }

    /// Recompute all dynamic priorities and rebuild the ready queue.
    /// Runs automatically once per `PRIORITY_ADJUST_INTERVAL`; exposed
    /// for callers that want an immediate pass.
    pub fn adjust_priorities(&self) {
        self.core.lock().adjust_priorities();
    }

    /// Fraction of accounted time spent running handlers, in percent.
    /// Zero until the dispatcher has accounted any time at all.
    pub fn cpu_utilization(&self) -> f32 {
        f32::from_bits(self.cpu_utilization_bits.load(Ordering::Relaxed))
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Try to bring a terminated recoverable task back to Ready. The
    /// recovery budget is process-wide: once `MAX_RECOVERY_ATTEMPTS`
    /// recoveries have been performed, further attempts are declined
    /// and the task stays terminated.
    pub fn attempt_task_recovery(&self, task: &Arc<Task>) -> bool {
        let mut core = self.core.lock();
        self.recover_locked(&mut core, task)
    }

    fn recover_locked(&self, core: &mut SchedulerCore, task: &Arc<Task>) -> bool {
        if !task.is_recoverable() {
            return false;
        }
        let attempts = self.recovery_attempts.load(Ordering::SeqCst);
        if attempts >= MAX_RECOVERY_ATTEMPTS {
            warn!(
                "recovery budget exhausted ({MAX_RECOVERY_ATTEMPTS}); task '{}' stays terminated",
                task.name()
            );
            return false;
        }
        self.recovery_attempts.fetch_add(1, Ordering::SeqCst);
        info!(
            "recovering task '{}' (attempt {} of {MAX_RECOVERY_ATTEMPTS})",
            task.name(),
            attempts + 1
        );
        task.set_state(TaskState::Ready);
        core.ready.push(task.clone());
        true
    }

    // -----------------------------------------------------------------------
    // Worker threads
    // -----------------------------------------------------------------------

    fn dispatcher_loop(self: Arc<Self>) {
        while self.is_running.load(Ordering::SeqCst) {
            let mut core = self.core.lock();

            core.check_deadlines();

            let selected = core.select_next();
            core.current = selected.clone();

            if let Some(task) = selected {
                // Handlers run with the scheduler unlocked so that the
                // monitor and public mutators stay responsive.
                let started = Instant::now();
                MutexGuard::unlocked(&mut core, || task.execute());
                let elapsed = started.elapsed();

                task.update_statistics(elapsed);
                core.total_run += elapsed;

                if task.state() == TaskState::Terminated && task.is_recoverable() {
                    self.recover_locked(&mut core, &task);
                }

                self.refresh_cpu_utilization(&core);
                self.force_reschedule.store(false, Ordering::SeqCst);
            } else {
                let idle_started = Instant::now();
                let _ = self.dispatcher_wakeup.wait_for(&mut core, IDLE_WAIT);
                core.total_idle += idle_started.elapsed();
            }

            // Preemption accounting: on time-slice expiry or an explicit
            // reschedule request, the current task (if still ready) goes
            // back into the queue so the next pop can pick again.
            let now = Instant::now();
            let mode = self.preemption_mode();
            let time_slice_expired = match &core.current {
                Some(current) => {
                    current.policy() == SchedulePolicy::Preemptive
                        && mode.time_slice_applies()
                        && now.duration_since(core.last_schedule) >= self.time_slice()
                }
                None => false,
            };
            if time_slice_expired || self.force_reschedule.load(Ordering::SeqCst) {
                core.last_schedule = now;
                self.force_reschedule.store(false, Ordering::SeqCst);
                if let Some(current) = core.current.take() {
                    if current.state() == TaskState::Ready {
                        core.ready.push(current);
                    }
                }
            }

            if now.duration_since(core.last_priority_adjust) > PRIORITY_ADJUST_INTERVAL {
                core.adjust_priorities();
                core.last_priority_adjust = now;
            }
        }
    }

    fn monitor_loop(self: Arc<Self>) {
        let mut last_tick = Instant::now();
        while self.is_running.load(Ordering::SeqCst) {
            thread::sleep(MONITOR_TICK);
            let now = Instant::now();
            let elapsed = now.duration_since(last_tick);
            last_tick = now;

            let core = self.core.lock();
            let mode = self.preemption_mode();
            for task in &core.tasks {
                // The running task's counter is frozen; it restarts from
                // zero at the next handler entry.
                if task.state() != TaskState::Running {
                    task.update_deadline_counter(elapsed);
                }

                // A ready task that is about to miss and outranks the
                // current one gets the dispatcher's attention.
                if mode.priority_applies()
                    && task.is_deadline_approaching()
                    && task.state() == TaskState::Ready
                {
                    if let Some(current) = &core.current {
                        if task.dynamic_priority() > current.dynamic_priority() {
                            self.force_reschedule.store(true, Ordering::SeqCst);
                            self.dispatcher_wakeup.notify_one();
                        }
                    }
                }
            }
        }
    }

    fn refresh_cpu_utilization(&self, core: &SchedulerCore) {
        let total = core.total_run + core.total_idle;
        let percent = if total.is_zero() {
            0.0
        } else {
            core.total_run.as_secs_f32() / total.as_secs_f32() * 100.0
        };
        self.cpu_utilization_bits.store(percent.to_bits(), Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Visualisation
    // -----------------------------------------------------------------------

    /// Multi-line textual snapshot of the task set: a symbol header, the
    /// current state character per task (`.` ready, `R` running, `B`
    /// blocked, `S` suspended, `T` terminated), and a legend mapping
    /// each symbol to `name(dynamic_priority)`. The content is meant for
    /// humans; the exact layout is not a compatibility surface.
    pub fn task_state_visualization(&self) -> String {
        let core = self.core.lock();
        if core.tasks.is_empty() {
            return "No tasks registered in the scheduler.".to_string();
        }

        let symbol_of = |name: &str| core.symbols.get(name).copied().unwrap_or('?');

        let mut out = String::new();
        out.push_str("Time | ");
        for task in &core.tasks {
            out.push(symbol_of(task.name()));
            out.push(' ');
        }
        out.push_str("| Tasks\n");

        out.push_str("-----|-");
        for _ in &core.tasks {
            out.push_str("--");
        }
        out.push_str("|---------\n");

        out.push_str("now  | ");
        for task in &core.tasks {
            out.push(task.state().symbol());
            out.push(' ');
        }
        out.push_str("| ");

        for (i, task) in core.tasks.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push(symbol_of(task.name()));
            out.push(':');
            out.push_str(task.name());
            out.push('(');
            out.push_str(&task.dynamic_priority().to_string());
            out.push(')');
        }

        out
    }

    /// Print the state snapshot to stdout.
    pub fn print_task_states(&self) {
        println!("{}", self.task_state_visualization());
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Workers hold an Arc to the scheduler, so by the time drop runs
        // they are already gone; this is for schedulers stopped early.
        self.is_running.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskFault, TaskSpec};
    use std::sync::atomic::AtomicUsize;

    fn spawn_task(name: &str, priority: u8, handler: crate::task::TaskHandler) -> Arc<Task> {
        Arc::new(Task::new(name, handler, TaskSpec { priority, ..TaskSpec::default() }))
    }

    fn counting_task(name: &str, priority: u8, counter: Arc<AtomicUsize>, work: Duration) -> Arc<Task> {
        Arc::new(Task::new(
            name,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(work);
                Ok(())
            }),
            TaskSpec { priority, ..TaskSpec::default() },
        ))
    }

    #[test]
    fn ready_queue_orders_by_priority_with_fifo_ties() {
        let mut queue = ReadyQueue::new();
        queue.push(spawn_task("low", 10, Box::new(|| Ok(()))));
        queue.push(spawn_task("first-mid", 50, Box::new(|| Ok(()))));
        queue.push(spawn_task("high", 90, Box::new(|| Ok(()))));
        queue.push(spawn_task("second-mid", 50, Box::new(|| Ok(()))));

        assert_eq!(queue.pop().unwrap().name(), "high");
        assert_eq!(queue.pop().unwrap().name(), "first-mid");
        assert_eq!(queue.pop().unwrap().name(), "second-mid");
        assert_eq!(queue.pop().unwrap().name(), "low");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn select_skips_stale_entries() {
        let scheduler = Scheduler::new();
        let task = spawn_task("ghost", 50, Box::new(|| Ok(())));
        scheduler.add_task(task.clone());
        task.suspend();

        let mut core = scheduler.core.lock();
        assert!(core.select_next().is_none());
    }

    #[test]
    fn add_find_remove_task() {
        let scheduler = Scheduler::new();
        scheduler.add_task(spawn_task("alpha", 50, Box::new(|| Ok(()))));
        scheduler.add_task(spawn_task("beta", 60, Box::new(|| Ok(()))));

        assert!(scheduler.find_task("alpha").is_some());
        assert_eq!(scheduler.task_symbol("alpha"), Some('A'));
        assert_eq!(scheduler.task_symbol("beta"), Some('B'));

        let beta = scheduler.find_task("beta").unwrap();
        assert!(scheduler.remove_task("beta"));
        assert_eq!(beta.state(), TaskState::Terminated);
        assert!(scheduler.find_task("beta").is_none());
        assert!(!scheduler.remove_task("beta"));
    }

    #[test]
    fn visualization_lists_symbols_and_priorities() {
        let scheduler = Scheduler::new();
        assert_eq!(
            scheduler.task_state_visualization(),
            "No tasks registered in the scheduler."
        );

        scheduler.add_task(spawn_task("sensor", 50, Box::new(|| Ok(()))));
        scheduler.add_task(spawn_task("pump", 70, Box::new(|| Ok(()))));

        let vis = scheduler.task_state_visualization();
        let lines: Vec<&str> = vis.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Time | A B | Tasks");
        assert!(lines[1].starts_with("-----|-"));
        assert!(lines[2].starts_with("now  | . . | "));
        assert!(lines[2].contains("A:sensor(50)"));
        assert!(lines[2].contains("B:pump(70)"));
    }

    #[test]
    fn adjust_priorities_rekeys_ready_queue() {
        let scheduler = Scheduler::new();
        let slow = spawn_task("slow", 50, Box::new(|| Ok(())));
        let steady = spawn_task("steady", 52, Box::new(|| Ok(())));
        scheduler.add_task(slow.clone());
        scheduler.add_task(steady.clone());

        // Two misses lift the slow task to 55, but the queue still holds
        // it under the priority captured when it was enqueued (50), so
        // without a rebuild the steady task would pop first.
        slow.record_deadline_miss();
        slow.record_deadline_miss();
        assert_eq!(slow.dynamic_priority(), 55);

        scheduler.adjust_priorities();

        let mut core = scheduler.core.lock();
        assert_eq!(core.select_next().unwrap().name(), "slow");
        assert_eq!(core.select_next().unwrap().name(), "steady");
    }

    #[test]
    fn recovery_budget_is_process_wide() {
        let scheduler = Scheduler::new();
        let task = Arc::new(Task::new(
            "lazarus",
            Box::new(|| Ok(())),
            TaskSpec { priority: 50, recoverable: true, ..TaskSpec::default() },
        ));
        scheduler.add_task(task.clone());

        for _ in 0..MAX_RECOVERY_ATTEMPTS {
            task.terminate();
            assert!(scheduler.attempt_task_recovery(&task));
            assert_eq!(task.state(), TaskState::Ready);
        }

        task.terminate();
        assert!(!scheduler.attempt_task_recovery(&task));
        assert_eq!(task.state(), TaskState::Terminated);
    }

    #[test]
    fn recovery_declines_for_non_recoverable_task() {
        let scheduler = Scheduler::new();
        let task = spawn_task("oneshot", 50, Box::new(|| Ok(())));
        task.terminate();
        assert!(!scheduler.attempt_task_recovery(&task));
    }

    #[test]
    fn idle_scheduler_accounts_no_utilization() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.start();
        thread::sleep(Duration::from_millis(100));

        assert!(scheduler.cpu_utilization() < 1.0);
        assert!(scheduler.current_task().is_none());
        assert!(scheduler.is_running());

        let stopping = Instant::now();
        scheduler.stop();
        assert!(stopping.elapsed() < Duration::from_millis(200));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.start();
        scheduler.start();
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn periodic_task_runs_without_missing() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = Arc::new(Task::new(
            "steady",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                Ok(())
            }),
            TaskSpec {
                priority: 50,
                period: Duration::from_millis(100),
                deadline: Duration::from_millis(90),
                ..TaskSpec::default()
            },
        ));
        scheduler.add_task(task.clone());

        scheduler.start();
        thread::sleep(Duration::from_secs(1));
        scheduler.stop();

        let stats = task.stats();
        assert!(stats.execution_count >= 9, "ran {} times", stats.execution_count);
        assert_eq!(stats.deadline_misses, 0);
        // Handler sleeps 10 ms; allow generous scheduling overhead.
        assert!(stats.average_execution >= Duration::from_micros(8_000));
        assert!(stats.average_execution <= Duration::from_micros(40_000));

        let utilization = scheduler.cpu_utilization();
        assert!((0.0..=100.0).contains(&utilization));
    }

    #[test]
    fn higher_priority_task_dominates() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.set_preemption_mode(PreemptionMode::Priority);

        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));
        let a = counting_task("background", 30, a_count.clone(), Duration::from_millis(30));
        let b = Arc::new(Task::new(
            "urgent",
            {
                let counter = b_count.clone();
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    Ok(())
                })
            },
            TaskSpec {
                priority: 70,
                deadline: Duration::from_millis(10),
                ..TaskSpec::default()
            },
        ));
        scheduler.add_task(a.clone());
        scheduler.add_task(b.clone());

        scheduler.start();
        thread::sleep(Duration::from_millis(600));
        scheduler.stop();

        // The urgent task's dynamic priority never drops below its base,
        // which already outranks the background task's ceiling.
        assert!(b.dynamic_priority() >= 70);
        assert!(b.dynamic_priority() > a.dynamic_priority());
        assert!(a_count.load(Ordering::SeqCst) > 0);
        // The urgent task pops first whenever both are queued, so its
        // count stays at least level with the background task's.
        assert!(b_count.load(Ordering::SeqCst) >= a_count.load(Ordering::SeqCst));
    }

    #[test]
    fn overrunning_task_gains_priority() {
        let scheduler = Arc::new(Scheduler::new());
        let task = Arc::new(Task::new(
            "laggard",
            Box::new(|| {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            }),
            TaskSpec {
                priority: 40,
                period: Duration::from_millis(100),
                deadline: Duration::from_millis(50),
                ..TaskSpec::default()
            },
        ));
        scheduler.add_task(task.clone());

        scheduler.start();
        thread::sleep(Duration::from_millis(1_200));
        scheduler.stop();

        let stats = task.stats();
        assert!(stats.deadline_misses >= 2, "missed {} times", stats.deadline_misses);

        // 5% of base per miss, truncated, capped at 99.
        let boost = (40.0 * 0.05 * stats.deadline_misses as f32) as u32;
        let expected = (40 + boost).min(99) as u8;
        assert_eq!(task.dynamic_priority(), expected);
        assert!(task.dynamic_priority() >= 44);
    }

    #[test]
    fn recoverable_task_survives_periodic_failures() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let task = Arc::new(Task::new(
            "flaky",
            Box::new(move || {
                let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
                thread::sleep(Duration::from_millis(2));
                if run % 3 == 0 {
                    Err(TaskFault::new("every third run fails"))
                } else {
                    Ok(())
                }
            }),
            TaskSpec { priority: 50, recoverable: true, ..TaskSpec::default() },
        ));
        scheduler.add_task(task.clone());

        scheduler.start();
        while count.load(Ordering::SeqCst) < 10 {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();

        assert!(task.stats().execution_count >= 10);
        assert_ne!(task.state(), TaskState::Terminated);
    }

    #[test]
    fn cooperative_task_completes_chunks_unpreempted() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.set_preemption_mode(PreemptionMode::None);

        let chunks = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(Task::new(
            "chunked",
            {
                let scheduler = Arc::downgrade(&scheduler);
                let chunks = chunks.clone();
                Box::new(move || {
                    for chunk in 0..5 {
                        thread::sleep(Duration::from_millis(5));
                        chunks.fetch_add(1, Ordering::SeqCst);
                        if chunk < 4 {
                            if let Some(scheduler) = scheduler.upgrade() {
                                scheduler.yield_now();
                            }
                        }
                    }
                    Ok(())
                })
            },
            TaskSpec {
                priority: 40,
                policy: SchedulePolicy::Cooperative,
                ..TaskSpec::default()
            },
        ));
        scheduler.add_task(task.clone());

        scheduler.start();
        thread::sleep(Duration::from_millis(300));
        scheduler.stop();

        let stats = task.stats();
        assert!(stats.execution_count >= 1);
        // Handlers run to completion, so chunks always land in groups
        // of five and each invocation takes the full ~25 ms.
        assert_eq!(chunks.load(Ordering::SeqCst), 5 * stats.execution_count);
        assert!(stats.average_execution >= Duration::from_millis(25));
    }

    #[test]
    fn at_most_one_task_runs_at_a_time() {
        let scheduler = Arc::new(Scheduler::new());
        for (name, priority) in [("one", 40u8), ("two", 50), ("three", 60)] {
            scheduler.add_task(Arc::new(Task::new(
                name,
                Box::new(|| {
                    thread::sleep(Duration::from_millis(3));
                    Ok(())
                }),
                TaskSpec { priority, ..TaskSpec::default() },
            )));
        }

        scheduler.start();
        for _ in 0..100 {
            let running = scheduler
                .tasks()
                .iter()
                .filter(|t| t.state() == TaskState::Running)
                .count();
            assert!(running <= 1, "{running} tasks running simultaneously");
            thread::sleep(Duration::from_millis(2));
        }
        scheduler.stop();
    }

    #[test]
    fn suspended_task_is_not_dispatched() {
        let scheduler = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicUsize::new(0));
        let task = counting_task("dormant", 50, count.clone(), Duration::from_millis(1));
        scheduler.add_task(task.clone());
        task.suspend();

        scheduler.start();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        task.resume();
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();
        assert!(count.load(Ordering::SeqCst) > 0);
    }
}
