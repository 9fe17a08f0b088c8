//! # Task Model
//!
//! Defines the schedulable unit of AdaptOS. Each task owns a handler, a
//! static scheduling policy, a base priority, and a statistics block that
//! the scheduler and the deadline monitor update as the task runs.
//!
//! ## Adaptive Priority
//!
//! Every task carries two priorities on the 1–99 scale:
//! - **Base priority** — fixed at construction, clamped into range.
//! - **Dynamic priority** — starts at the base and is boosted by 5% of the
//!   base per accumulated deadline miss, truncated, capped at 99. When the
//!   miss count is zero the dynamic priority equals the base.
//!
//! The dynamic priority is what the ready queue orders on, so a task that
//! keeps missing deadlines is scheduled more aggressively over time.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::config::{
    DEADLINE_WARN_DEN, DEADLINE_WARN_NUM, DEFAULT_PRIORITY, DEFAULT_STACK_SIZE, PRIORITY_BOOST_PER_MISS,
    PRIORITY_MAX, PRIORITY_MIN,
};

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///   ┌──────────┐    dispatcher     ┌─────────┐
///   │  Ready   │ ────────────────► │ Running │
///   └──────────┘                   └─────────┘
///      ▲  ▲        normal return /      │
///      │  └──── recoverable failure ────┤
///      │                                │ non-recoverable
///   resume()                            ▼ failure
///      │                          ┌────────────┐
///   ┌──────────┐   suspend()      │ Terminated │
///   │Suspended │ ◄── (any state   └────────────┘
///   └──────────┘     but Terminated)
/// ```
///
/// The state lives in an atomic; readers may observe a transient value
/// (e.g. a task popped from the ready queue that has since been
/// suspended) and must re-check before acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Eligible to run, waiting in the ready queue.
    Ready = 0,
    /// Currently executing on the dispatcher thread.
    Running = 1,
    /// Waiting for a resource or event.
    Blocked = 2,
    /// Taken out of scheduling by external control.
    Suspended = 3,
    /// Finished or failed; never scheduled again (unless recovered).
    Terminated = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Blocked,
            3 => TaskState::Suspended,
            _ => TaskState::Terminated,
        }
    }

    /// Single-character representation used by the state visualisation.
    pub fn symbol(self) -> char {
        match self {
            TaskState::Ready => '.',
            TaskState::Running => 'R',
            TaskState::Blocked => 'B',
            TaskState::Suspended => 'S',
            TaskState::Terminated => 'T',
        }
    }

    /// Upper-case name used by the telemetry rows.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Ready => "READY",
            TaskState::Running => "RUNNING",
            TaskState::Blocked => "BLOCKED",
            TaskState::Suspended => "SUSPENDED",
            TaskState::Terminated => "TERMINATED",
        }
    }
}

/// How a task relates to preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// May be returned to the ready queue by time-slice expiry or by a
    /// priority-based reschedule request.
    Preemptive,
    /// Runs until its handler returns or calls the scheduler's yield;
    /// never preempted regardless of the preemption mode.
    Cooperative,
}

// ---------------------------------------------------------------------------
// Handler failures
// ---------------------------------------------------------------------------

/// The value a failing handler returns. A handler that panics is caught
/// at the task boundary and converted into a `TaskFault` as well, so a
/// fault never propagates to the dispatcher.
#[derive(Debug, Clone)]
pub struct TaskFault {
    reason: String,
}

impl TaskFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl fmt::Display for TaskFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Zero-argument callable a task runs on each dispatch.
pub type TaskHandler = Box<dyn Fn() -> Result<(), TaskFault> + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Construction parameters
// ---------------------------------------------------------------------------

/// Static configuration for a task, fixed after construction.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// Requested base priority; clamped into `[PRIORITY_MIN, PRIORITY_MAX]`.
    pub priority: u8,
    /// Preemptive or cooperative scheduling.
    pub policy: SchedulePolicy,
    /// Nominal activation period. Zero means aperiodic.
    pub period: Duration,
    /// Relative deadline. Zero means "same as the period".
    pub deadline: Duration,
    /// Advisory stack size hint in bytes. Handlers run on the dispatcher
    /// thread, so this reserves nothing; it is carried for API fidelity.
    pub stack_size: usize,
    /// Whether a failed execution may be automatically recovered.
    pub recoverable: bool,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            policy: SchedulePolicy::Preemptive,
            period: Duration::ZERO,
            deadline: Duration::ZERO,
            stack_size: DEFAULT_STACK_SIZE,
            recoverable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Point-in-time copy of a task's statistics block.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    /// Number of handler entries.
    pub execution_count: usize,
    /// Deadline misses recorded by either miss detector.
    pub deadline_misses: usize,
    /// Cumulative handler run time.
    pub total_execution: Duration,
    /// `total_execution / execution_count`, in whole microseconds.
    pub average_execution: Duration,
    /// Milliseconds elapsed since the last handler entry, advanced by the
    /// deadline monitor while the task is not running.
    pub deadline_counter: Duration,
    /// Wall-clock instant of the last handler entry.
    pub last_execution: Option<Instant>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A named schedulable unit.
///
/// Tasks are shared (`Arc<Task>`) between the scheduler's task set, the
/// ready queue, the kernel's name index, and any external observer, so
/// all mutable state is interior: the state and priorities are atomics,
/// the statistics counters are atomics, and the last-execution stamp
/// sits behind its own small lock.
pub struct Task {
    name: String,
    handler: TaskHandler,
    policy: SchedulePolicy,
    base_priority: u8,
    dynamic_priority: AtomicU8,
    period: Duration,
    deadline: Duration,
    stack_size: usize,
    recoverable: bool,
    state: AtomicU8,

    execution_count: AtomicUsize,
    deadline_misses: AtomicUsize,
    total_execution_us: AtomicU64,
    average_execution_us: AtomicU64,
    deadline_counter_ms: AtomicU64,
    last_execution: Mutex<Option<Instant>>,
}

impl Task {
    /// Create a task. The priority is clamped into `[1, 99]`; a zero
    /// deadline defaults to the period (aperiodic tasks end up with both
    /// at zero and are never deadline-checked).
    pub fn new(name: impl Into<String>, handler: TaskHandler, spec: TaskSpec) -> Self {
        let priority = spec.priority.clamp(PRIORITY_MIN, PRIORITY_MAX);
        let deadline = if spec.deadline > Duration::ZERO {
            spec.deadline
        } else {
            spec.period
        };
        Self {
            name: name.into(),
            handler,
            policy: spec.policy,
            base_priority: priority,
            dynamic_priority: AtomicU8::new(priority),
            period: spec.period,
            deadline,
            stack_size: spec.stack_size,
            recoverable: spec.recoverable,
            state: AtomicU8::new(TaskState::Ready as u8),
            execution_count: AtomicUsize::new(0),
            deadline_misses: AtomicUsize::new(0),
            total_execution_us: AtomicU64::new(0),
            average_execution_us: AtomicU64::new(0),
            deadline_counter_ms: AtomicU64::new(0),
            last_execution: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> SchedulePolicy {
        self.policy
    }

    pub fn base_priority(&self) -> u8 {
        self.base_priority
    }

    pub fn dynamic_priority(&self) -> u8 {
        self.dynamic_priority.load(Ordering::SeqCst)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// For scheduler use: force a state. External control should go
    /// through `suspend`/`resume`/`terminate`.
    pub fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Copy out the statistics block.
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            execution_count: self.execution_count.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            total_execution: Duration::from_micros(self.total_execution_us.load(Ordering::Relaxed)),
            average_execution: Duration::from_micros(self.average_execution_us.load(Ordering::Relaxed)),
            deadline_counter: Duration::from_millis(self.deadline_counter_ms.load(Ordering::Relaxed)),
            last_execution: *self.last_execution.lock(),
        }
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Run the handler to completion on the calling thread.
    ///
    /// Marks the task Running, stamps the execution, resets the deadline
    /// counter, and invokes the handler. A normal return puts the task
    /// back to Ready. A fault (returned or panicked) puts a recoverable
    /// task back to Ready and a non-recoverable one to Terminated; the
    /// fault itself never reaches the caller.
    pub fn execute(&self) {
        self.set_state(TaskState::Running);
        *self.last_execution.lock() = Some(Instant::now());
        self.execution_count.fetch_add(1, Ordering::Relaxed);
        self.deadline_counter_ms.store(0, Ordering::Relaxed);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)()));
        match outcome {
            Ok(Ok(())) => self.set_state(TaskState::Ready),
            Ok(Err(fault)) => self.fail(&fault.to_string()),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                self.fail(&reason);
            }
        }
    }

    fn fail(&self, reason: &str) {
        if self.recoverable {
            warn!("task '{}' failed ({reason}), marked ready for recovery", self.name);
            self.set_state(TaskState::Ready);
        } else {
            error!("task '{}' failed ({reason}), terminated", self.name);
            self.set_state(TaskState::Terminated);
        }
    }

    /// Take the task out of scheduling. No effect on a terminated task;
    /// idempotent otherwise.
    pub fn suspend(&self) {
        if self.state() != TaskState::Terminated {
            self.set_state(TaskState::Suspended);
        }
    }

    /// Put a suspended task back to Ready. No-op in any other state.
    pub fn resume(&self) {
        if self.state() == TaskState::Suspended {
            self.set_state(TaskState::Ready);
        }
    }

    /// Unconditionally terminate.
    pub fn terminate(&self) {
        self.set_state(TaskState::Terminated);
    }

    // -----------------------------------------------------------------------
    // Deadline accounting
    // -----------------------------------------------------------------------

    /// Record one deadline miss and recompute the dynamic priority.
    pub fn record_deadline_miss(&self) {
        self.deadline_misses.fetch_add(1, Ordering::Relaxed);
        self.update_priority();
        debug!(
            "task '{}' missed a deadline (total {}), dynamic priority now {}",
            self.name,
            self.deadline_misses.load(Ordering::Relaxed),
            self.dynamic_priority()
        );
    }

    /// Recompute the dynamic priority from the accumulated miss count:
    /// 5% of the base per miss, truncated, capped at 99. Zero misses
    /// resets to the base priority.
    pub fn update_priority(&self) {
        let misses = self.deadline_misses.load(Ordering::Relaxed);
        let next = if misses == 0 {
            self.base_priority
        } else {
            let boost = self.base_priority as f32 * PRIORITY_BOOST_PER_MISS * misses as f32;
            let boosted = self.base_priority as u32 + boost as u32;
            boosted.min(PRIORITY_MAX as u32) as u8
        };
        self.dynamic_priority.store(next, Ordering::SeqCst);
    }

    /// Fold one handler run into the cumulative and average times.
    /// Averages are computed in whole microseconds.
    pub fn update_statistics(&self, execution_time: Duration) {
        let total = self
            .total_execution_us
            .fetch_add(execution_time.as_micros() as u64, Ordering::Relaxed)
            + execution_time.as_micros() as u64;
        let count = self.execution_count.load(Ordering::Relaxed) as u64;
        if count > 0 {
            self.average_execution_us.store(total / count, Ordering::Relaxed);
        }
    }

    /// Advance the deadline counter by `elapsed`. Called by the deadline
    /// monitor while the task is not running. Crossing the deadline
    /// records a miss and restarts the counter from zero. Tasks without
    /// a deadline are never flagged.
    pub fn update_deadline_counter(&self, elapsed: Duration) {
        if self.deadline.is_zero() {
            return;
        }
        let counter = self.deadline_counter_ms.load(Ordering::Relaxed) + elapsed.as_millis() as u64;
        if counter > self.deadline.as_millis() as u64 {
            self.deadline_counter_ms.store(0, Ordering::Relaxed);
            self.record_deadline_miss();
        } else {
            self.deadline_counter_ms.store(counter, Ordering::Relaxed);
        }
    }

    /// True once 80% of the deadline has elapsed since the last handler
    /// entry. The deadline monitor uses this to request preemption for
    /// high-priority tasks that are about to miss.
    pub fn is_deadline_approaching(&self) -> bool {
        if self.deadline.is_zero() {
            return false;
        }
        let counter = self.deadline_counter_ms.load(Ordering::Relaxed);
        counter > self.deadline.as_millis() as u64 * DEADLINE_WARN_NUM / DEADLINE_WARN_DEN
    }

    /// Zero the statistics block and reset the dynamic priority to the
    /// base.
    pub fn reset_statistics(&self) {
        self.execution_count.store(0, Ordering::Relaxed);
        self.deadline_misses.store(0, Ordering::Relaxed);
        self.total_execution_us.store(0, Ordering::Relaxed);
        self.average_execution_us.store(0, Ordering::Relaxed);
        self.deadline_counter_ms.store(0, Ordering::Relaxed);
        *self.last_execution.lock() = None;
        self.dynamic_priority.store(self.base_priority, Ordering::SeqCst);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("base_priority", &self.base_priority)
            .field("dynamic_priority", &self.dynamic_priority())
            .field("period", &self.period)
            .field("deadline", &self.deadline)
            .field("recoverable", &self.recoverable)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
