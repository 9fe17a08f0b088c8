//! # Kernel
//!
//! Process-wide façade over one scheduler and one task name index. The
//! kernel translates named commands (`create`, `suspend`, `resume`,
//! `remove`) into task mutations and scheduler updates, and drives the
//! system lifecycle as a unit:
//!
//! ```text
//! Uninitialized ──initialize()──► Initialized ──start()──► Running
//!                                                             │
//!                                  (no restart) ◄──stop()─────┘
//!                                      Stopped
//! ```
//!
//! ## Locking
//!
//! The kernel mutex guards the name index and the lifecycle state. It
//! may be held while the scheduler takes its own lock, never the other
//! way around: the required order is kernel → scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lazy_static::lazy_static;
use log::{info, warn};
use parking_lot::Mutex;

use crate::config::DEFAULT_VISUALIZATION_INTERVAL;
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskHandler, TaskSpec};

/// Lifecycle of the kernel as a whole. Linear: once stopped, a kernel
/// cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// The kernel. Usually reached through [`instance`], but ordinary owned
/// instances can be built with [`Kernel::new`] — tests rely on that to
/// stay deterministic.
pub struct Kernel {
    scheduler: Arc<Scheduler>,
    tasks: Mutex<HashMap<String, Arc<Task>>>,
    state: Mutex<KernelState>,
    auto_visualization: Arc<AtomicBool>,
    visualization_interval: Mutex<Duration>,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new()),
            tasks: Mutex::new(HashMap::new()),
            state: Mutex::new(KernelState::Uninitialized),
            auto_visualization: Arc::new(AtomicBool::new(false)),
            visualization_interval: Mutex::new(DEFAULT_VISUALIZATION_INTERVAL),
        }
    }

    pub fn state(&self) -> KernelState {
        *self.state.lock()
    }

    /// The owned scheduler, for read-only observers (telemetry,
    /// dashboards) and for cooperative handlers that want to yield.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Move from Uninitialized to Initialized. Any other starting state
    /// is a logged no-op.
    pub fn initialize(&self) {
        let mut state = self.state.lock();
        if *state == KernelState::Uninitialized {
            info!("kernel initializing");
            *state = KernelState::Initialized;
        } else {
            warn!("kernel already initialized (state {:?})", *state);
        }
    }

    /// Start the scheduler and, if enabled, the auto-visualisation loop.
    /// Requires an initialized kernel; a stopped kernel cannot be
    /// restarted.
    pub fn start(&self) {
        let mut state = self.state.lock();
        match *state {
            KernelState::Initialized => {
                info!("kernel starting");
                self.scheduler.start();
                *state = KernelState::Running;
                if self.auto_visualization.load(Ordering::SeqCst) {
                    self.spawn_visualization_loop();
                }
            }
            KernelState::Uninitialized => warn!("kernel start refused: not initialized"),
            KernelState::Running => {}
            KernelState::Stopped => warn!("kernel start refused: restart is not supported"),
        }
    }

    /// Stop the scheduler and the visualisation loop. Idempotent; only a
    /// running kernel transitions, and it ends up Stopped for good.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state == KernelState::Running {
            info!("kernel stopping");
            self.auto_visualization.store(false, Ordering::SeqCst);
            self.scheduler.stop();
            *state = KernelState::Stopped;
        }
    }

    // -----------------------------------------------------------------------
    // Task management
    // -----------------------------------------------------------------------

    /// Create a task and register it with the scheduler. Duplicate names
    /// are rejected with a warning and `None`; the priority in `spec` is
    /// clamped into range by the task itself.
    pub fn create_task(
        &self,
        name: &str,
        handler: TaskHandler,
        spec: TaskSpec,
    ) -> Option<Arc<Task>> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(name) {
            warn!("task '{name}' already exists");
            return None;
        }

        let task = Arc::new(Task::new(name, handler, spec));
        tasks.insert(name.to_string(), task.clone());
        self.scheduler.add_task(task.clone());
        info!(
            "created task '{name}' (priority {}, {:?})",
            task.base_priority(),
            task.policy()
        );
        Some(task)
    }

    /// Terminate and drop a task by name. Returns whether the name
    /// resolved.
    pub fn remove_task(&self, name: &str) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.remove(name).is_none() {
            warn!("task '{name}' not found");
            return false;
        }
        self.scheduler.remove_task(name);
        info!("removed task '{name}'");
        true
    }

    pub fn find_task(&self, name: &str) -> Option<Arc<Task>> {
        self.tasks.lock().get(name).cloned()
    }

    pub fn suspend_task(&self, name: &str) -> bool {
        let tasks = self.tasks.lock();
        match tasks.get(name) {
            Some(task) => {
                task.suspend();
                info!("suspended task '{name}'");
                true
            }
            None => {
                warn!("task '{name}' not found");
                false
            }
        }
    }

    pub fn resume_task(&self, name: &str) -> bool {
        let tasks = self.tasks.lock();
        match tasks.get(name) {
            Some(task) => {
                task.resume();
                info!("resumed task '{name}'");
                true
            }
            None => {
                warn!("task '{name}' not found");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Visualisation
    // -----------------------------------------------------------------------

    /// Enable or disable the periodic state printout. When enabled on a
    /// running kernel the loop starts immediately; otherwise it starts
    /// with `start()`. An amenity for demos, not part of the scheduling
    /// contract.
    pub fn enable_auto_visualization(&self, enable: bool, interval: Duration) {
        *self.visualization_interval.lock() = interval;
        let was_enabled = self.auto_visualization.swap(enable, Ordering::SeqCst);
        if enable && !was_enabled && *self.state.lock() == KernelState::Running {
            self.spawn_visualization_loop();
        }
    }

    /// Print the scheduler's state snapshot once.
    pub fn visualize_task_states(&self) {
        self.scheduler.print_task_states();
    }

    fn spawn_visualization_loop(&self) {
        let scheduler = Arc::clone(&self.scheduler);
        let enabled = Arc::clone(&self.auto_visualization);
        let interval = *self.visualization_interval.lock();
        thread::spawn(move || {
            while enabled.load(Ordering::SeqCst) && scheduler.is_running() {
                thread::sleep(interval);
                scheduler.print_task_states();
            }
        });
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref KERNEL: Kernel = Kernel::new();
}

/// The process-wide kernel. A thin accessor over an owned instance;
/// anything it can do, a locally constructed [`Kernel`] can do too.
pub fn instance() -> &'static Kernel {
    &KERNEL
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use std::sync::atomic::AtomicUsize;

    fn ready_kernel() -> Kernel {
        let kernel = Kernel::new();
        kernel.initialize();
        kernel
    }

    #[test]
    fn lifecycle_is_linear() {
        let kernel = Kernel::new();
        assert_eq!(kernel.state(), KernelState::Uninitialized);

        // Starting before initialization is refused.
        kernel.start();
        assert_eq!(kernel.state(), KernelState::Uninitialized);

        kernel.initialize();
        assert_eq!(kernel.state(), KernelState::Initialized);
        kernel.initialize(); // no-op
        assert_eq!(kernel.state(), KernelState::Initialized);

        kernel.start();
        assert_eq!(kernel.state(), KernelState::Running);
        assert!(kernel.scheduler().is_running());

        kernel.stop();
        assert_eq!(kernel.state(), KernelState::Stopped);
        assert!(!kernel.scheduler().is_running());

        // Stop is idempotent and restart is not supported.
        kernel.stop();
        kernel.start();
        assert_eq!(kernel.state(), KernelState::Stopped);
        assert!(!kernel.scheduler().is_running());
    }

    #[test]
    fn duplicate_task_names_are_rejected() {
        let kernel = ready_kernel();
        let spec = TaskSpec { priority: 50, ..TaskSpec::default() };

        assert!(kernel.create_task("sensor", Box::new(|| Ok(())), spec).is_some());
        assert!(kernel.create_task("sensor", Box::new(|| Ok(())), spec).is_none());
    }

    #[test]
    fn created_task_is_registered_with_scheduler() {
        let kernel = ready_kernel();
        let task = kernel
            .create_task(
                "sensor",
                Box::new(|| Ok(())),
                TaskSpec { priority: 200, ..TaskSpec::default() },
            )
            .unwrap();

        // Clamped on the way in.
        assert_eq!(task.base_priority(), 99);
        assert!(kernel.find_task("sensor").is_some());
        assert!(kernel.scheduler().find_task("sensor").is_some());
    }

    #[test]
    fn suspend_and_resume_by_name() {
        let kernel = ready_kernel();
        let task = kernel
            .create_task(
                "sensor",
                Box::new(|| Ok(())),
                TaskSpec { priority: 50, ..TaskSpec::default() },
            )
            .unwrap();

        assert!(kernel.suspend_task("sensor"));
        assert_eq!(task.state(), TaskState::Suspended);
        assert!(kernel.resume_task("sensor"));
        assert_eq!(task.state(), TaskState::Ready);
    }

    #[test]
    fn unknown_names_are_logged_noops() {
        let kernel = ready_kernel();
        assert!(!kernel.suspend_task("phantom"));
        assert!(!kernel.resume_task("phantom"));
        assert!(!kernel.remove_task("phantom"));
        assert!(kernel.find_task("phantom").is_none());
    }

    #[test]
    fn remove_task_terminates_and_unregisters() {
        let kernel = ready_kernel();
        let task = kernel
            .create_task(
                "sensor",
                Box::new(|| Ok(())),
                TaskSpec { priority: 50, ..TaskSpec::default() },
            )
            .unwrap();

        assert!(kernel.remove_task("sensor"));
        assert_eq!(task.state(), TaskState::Terminated);
        assert!(kernel.find_task("sensor").is_none());
        assert!(kernel.scheduler().find_task("sensor").is_none());
    }

    #[test]
    fn kernel_schedules_created_tasks() {
        let kernel = ready_kernel();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        kernel.create_task(
            "worker",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(2));
                Ok(())
            }),
            TaskSpec { priority: 50, ..TaskSpec::default() },
        );

        kernel.start();
        thread::sleep(Duration::from_millis(100));
        kernel.stop();

        assert!(count.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn process_wide_instance_is_stable() {
        let first = instance() as *const Kernel;
        let second = instance() as *const Kernel;
        assert_eq!(first, second);
    }
}
