//! # Workload Patterns
//!
//! Canned task handlers with recognisable execution profiles, used by
//! the demo binary and by scenario tests. Each constructor returns a
//! boxed handler ready to hand to `Kernel::create_task`.
//!
//! Intensity variation is deterministic (driven by the invocation
//! count) so demo runs are reproducible.

use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::task::{TaskFault, TaskHandler};

/// Broad classes of task behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPattern {
    /// Heavy computation, no waiting.
    CpuBound,
    /// Mostly waiting for (simulated) I/O.
    IoBound,
    /// Computation followed by a wait.
    Mixed,
    /// Alternates between heavy and light invocations.
    Bursty,
}

/// Default handler for a pattern, with moderate intensity.
pub fn handler_for(pattern: ExecutionPattern) -> TaskHandler {
    match pattern {
        ExecutionPattern::CpuBound => cpu_bound(200_000),
        ExecutionPattern::IoBound => io_bound(Duration::from_millis(15)),
        ExecutionPattern::Mixed => mixed(50_000, Duration::from_millis(5)),
        ExecutionPattern::Bursty => bursty(400_000, 20_000, 4),
    }
}

/// Spin through `iterations` of integer work.
pub fn cpu_bound(iterations: u64) -> TaskHandler {
    Box::new(move || {
        spin(iterations);
        Ok(())
    })
}

/// Sleep for `wait`, standing in for a blocking I/O operation.
pub fn io_bound(wait: Duration) -> TaskHandler {
    Box::new(move || {
        thread::sleep(wait);
        Ok(())
    })
}

/// Compute, then wait.
pub fn mixed(iterations: u64, wait: Duration) -> TaskHandler {
    Box::new(move || {
        spin(iterations);
        thread::sleep(wait);
        Ok(())
    })
}

/// Every `burst_cycle`-th invocation does `heavy` iterations of work,
/// the rest do `light`.
pub fn bursty(heavy: u64, light: u64, burst_cycle: usize) -> TaskHandler {
    let invocations = AtomicUsize::new(0);
    Box::new(move || {
        let run = invocations.fetch_add(1, Ordering::Relaxed) + 1;
        if burst_cycle > 0 && run % burst_cycle == 0 {
            spin(heavy);
        } else {
            spin(light);
        }
        Ok(())
    })
}

/// Does `work` per invocation and fails every `failure_cycle`-th one.
/// Pair with a recoverable task to exercise the recovery path.
pub fn failing_every(failure_cycle: usize, work: Duration) -> TaskHandler {
    let invocations = AtomicUsize::new(0);
    Box::new(move || {
        let run = invocations.fetch_add(1, Ordering::Relaxed) + 1;
        thread::sleep(work);
        if failure_cycle > 0 && run % failure_cycle == 0 {
            Err(TaskFault::new("simulated periodic failure"))
        } else {
            Ok(())
        }
    })
}

fn spin(iterations: u64) {
    let mut acc: u64 = 0;
    for i in 0..iterations {
        acc = hint::black_box(acc.wrapping_add(i));
    }
    hint::black_box(acc);
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
