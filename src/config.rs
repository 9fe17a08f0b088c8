//! # AdaptOS Configuration
//!
//! Compile-time constants governing the scheduler and task model.
//! Runtime-tunable knobs (time slice, preemption mode) start from the
//! defaults defined here and can be changed through the scheduler API.

use std::time::Duration;

/// Lowest valid task priority. Priorities below this are clamped up.
pub const PRIORITY_MIN: u8 = 1;

/// Highest valid task priority. Priorities above this are clamped down,
/// and the adaptive boost never pushes a dynamic priority past it.
pub const PRIORITY_MAX: u8 = 99;

/// Priority used when a caller does not choose one. Deliberately above
/// `PRIORITY_MAX` so that a default-priority task lands on the ceiling
/// after construction-time clamping.
pub const DEFAULT_PRIORITY: u8 = 128;

/// Fractional priority boost applied per accumulated deadline miss.
/// A task with base priority `b` and `n` misses runs at
/// `min(99, b + b * PRIORITY_BOOST_PER_MISS * n)`, truncated.
pub const PRIORITY_BOOST_PER_MISS: f32 = 0.05;

/// Default dispatcher time slice. Preemptive tasks that run longer than
/// this without yielding are returned to the ready queue when the
/// scheduler is in a time-slice preemption mode.
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(50);

/// Cadence of the deadline monitor thread. Each tick advances the
/// deadline counters of all tasks that are not currently running.
pub const MONITOR_TICK: Duration = Duration::from_millis(10);

/// How long the dispatcher parks on the condition variable when no task
/// is ready. Short enough that newly released tasks are picked up
/// promptly even without an explicit wake-up.
pub const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Cadence of the periodic priority adjustment pass. Every interval the
/// dispatcher recomputes all dynamic priorities and rebuilds the ready
/// queue in the new order.
pub const PRIORITY_ADJUST_INTERVAL: Duration = Duration::from_secs(1);

/// Process-wide cap on automatic task recoveries. Shared by all tasks:
/// once the scheduler has performed this many recoveries, failed
/// recoverable tasks stay terminated.
pub const MAX_RECOVERY_ATTEMPTS: usize = 3;

/// Advisory per-task stack size hint in bytes. The simulator runs task
/// handlers on the dispatcher thread and allocates no real stacks; the
/// hint is carried for API fidelity only.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// A deadline counts as "approaching" once this fraction of it has
/// elapsed, expressed as numerator/denominator to keep the arithmetic
/// in integer milliseconds.
pub const DEADLINE_WARN_NUM: u64 = 4;
pub const DEADLINE_WARN_DEN: u64 = 5;

/// Default interval of the kernel's auto-visualisation loop.
pub const DEFAULT_VISUALIZATION_INTERVAL: Duration = Duration::from_secs(1);

/// Default sampling interval of the CSV telemetry writer.
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_millis(100);
