//! # AdaptOS — Adaptive Deadline-Aware RTOS Simulator
//!
//! A user-space multitasking kernel for teaching real-time scheduling.
//! A configurable set of periodic tasks is driven by a priority-based
//! scheduler that tracks deadlines, adapts priorities when deadlines are
//! missed, and attempts recovery when a task handler fails.
//!
//! ## Overview
//!
//! The simulator runs task handlers inline on a dispatcher thread while
//! a second thread monitors deadlines in parallel:
//!
//! - **Deadline misses raise priority** — each miss boosts a task's
//!   dynamic priority by 5% of its base, so chronically late tasks get
//!   scheduled more aggressively.
//! - **Preemption is queue discipline, not interruption** — a preempted
//!   task is returned to the ready queue before the next pop; handlers
//!   always run to completion.
//! - **Failures are contained** — a faulting handler terminates its task
//!   (or re-readies it when recoverable); nothing propagates to the
//!   dispatcher, and a process-wide budget bounds automatic recoveries.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  Application Handlers                   │
//! ├────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                   │
//! │  initialize() · create_task() · suspend/resume · stop() │
//! ├───────────────────────────────┬────────────────────────┤
//! │   Scheduler (scheduler.rs)    │  Observers             │
//! │   ─ dispatcher thread         │  telemetry.rs (CSV)    │
//! │   ─ deadline monitor thread   │  logger.rs (console)   │
//! │   ─ ready queue (max-heap)    │  auto-visualisation    │
//! │   ─ preemption + recovery     │                        │
//! ├───────────────────────────────┴────────────────────────┤
//! │                Task Model (task.rs)                     │
//! │   TaskState · SchedulePolicy · TaskStats · TaskFault    │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Observers only read public accessors and call public mutators; the
//! scheduler's internals (queue, current-task slot, accounting) stay
//! behind one scheduler-wide lock plus a handful of atomics.
//!
//! ## Scheduling Model
//!
//! Exactly two worker threads form the core. The dispatcher pops the
//! highest dynamic-priority ready task, runs its handler to completion,
//! updates statistics, and applies the preemption policy (time slice,
//! priority, both, or neither). The deadline monitor advances per-task
//! deadline counters every 10 ms, records misses, and asks the
//! dispatcher to reschedule when a higher-priority task is close to
//! missing. Cooperative tasks are never preempted; they yield.

pub mod config;
pub mod kernel;
pub mod logger;
pub mod scheduler;
pub mod task;
pub mod telemetry;
pub mod workloads;
