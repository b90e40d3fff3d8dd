//! Execution of streaming loops.
//!
//! Push sources and pull sinks drive data from a [`Task`]. Where a task runs
//! is decided by the [`Scheduler`] of the top-level pipeline:
//!
//! - [`Scheduler::Threaded`] gives every task its own OS thread.
//! - [`Scheduler::Cooperative`] interleaves all tasks as cothreads of one
//!   worker thread, switching between them after every iteration.
//!
//! Thread-boundary elements such as the queue always use a dedicated thread.

mod cooperative;
mod cothread;
mod task;

pub use cooperative::{CooperativeConfig, CooperativeScheduler};
pub use cothread::{CothreadContext, CothreadCx, CothreadId, CothreadStep, MAX_COTHREADS};
pub use task::{Task, TaskState, TaskStep};

/// How a pipeline runs its streaming tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulingMode {
    /// One OS thread per task.
    #[default]
    Threaded,
    /// All tasks on one cooperative worker thread.
    Cooperative,
}

/// Where tasks run.
#[derive(Debug, Clone, Default)]
pub enum Scheduler {
    /// One OS thread per task.
    #[default]
    Threaded,
    /// Cothreads on a shared worker.
    Cooperative(CooperativeScheduler),
}

impl Scheduler {
    /// Scheduler for `mode` with default settings.
    pub fn from_mode(mode: SchedulingMode) -> Self {
        match mode {
            SchedulingMode::Threaded => Scheduler::Threaded,
            SchedulingMode::Cooperative => Scheduler::Cooperative(CooperativeScheduler::default()),
        }
    }

    /// The mode of this scheduler.
    pub fn mode(&self) -> SchedulingMode {
        match self {
            Scheduler::Threaded => SchedulingMode::Threaded,
            Scheduler::Cooperative(_) => SchedulingMode::Cooperative,
        }
    }
}
