//! Streaming tasks: a loop function driven by a thread or a cooperative
//! scheduler.

use super::cooperative::CoopShared;
use super::Scheduler;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

/// What the loop function wants after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    /// Run again.
    Continue,
    /// Stop iterating until started again.
    Pause,
}

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not running; `join` has nothing to wait for once the loop left.
    Stopped,
    /// Iterating.
    Started,
    /// Attached to a thread or scheduler but not iterating.
    Paused,
}

type TaskFn = Box<dyn FnMut() -> TaskStep + Send>;

struct Control {
    state: TaskState,
    /// An iteration is executing.
    busy: bool,
    /// A thread is running the loop or a scheduler holds the task.
    attached: bool,
    /// Bumped by every `start`, so a pause requested by an iteration that
    /// overlapped a restart is ignored.
    generation: u64,
    owner: Option<ThreadId>,
    coop: Option<Arc<CoopShared>>,
}

struct TaskInner {
    name: String,
    func: Mutex<TaskFn>,
    control: Mutex<Control>,
    cond: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// A repeatedly invoked streaming function.
///
/// ```rust
/// use sluice::scheduler::{Scheduler, Task, TaskStep};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let count = Arc::new(AtomicUsize::new(0));
/// let c = Arc::clone(&count);
/// let task = Task::new("counter", move || {
///     if c.fetch_add(1, Ordering::SeqCst) == 9 {
///         TaskStep::Pause
///     } else {
///         TaskStep::Continue
///     }
/// });
/// task.start(&Scheduler::Threaded).unwrap();
/// while task.state() != sluice::scheduler::TaskState::Paused {
///     std::thread::yield_now();
/// }
/// task.join();
/// assert_eq!(count.load(Ordering::SeqCst), 10);
/// ```
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    /// Create a stopped task.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut() -> TaskStep + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                func: Mutex::new(Box::new(func)),
                control: Mutex::new(Control {
                    state: TaskState::Stopped,
                    busy: false,
                    attached: false,
                    generation: 0,
                    owner: None,
                    coop: None,
                }),
                cond: Condvar::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.control().state
    }

    /// Start iterating, attaching to `scheduler` on first start.
    pub fn start(&self, scheduler: &Scheduler) -> Result<()> {
        {
            let mut ctl = self.control();
            ctl.state = TaskState::Started;
            ctl.generation += 1;
            self.inner.cond.notify_all();
            if ctl.attached {
                let coop = ctl.coop.clone();
                drop(ctl);
                if let Some(coop) = coop {
                    coop.wake();
                }
                return Ok(());
            }
            ctl.attached = true;
        }

        // Reap a thread that already left its loop.
        let finished = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = finished {
            let _ = handle.join();
        }

        let attached = match scheduler {
            Scheduler::Threaded => self.spawn_thread(),
            Scheduler::Cooperative(coop) => coop.register(self).map(|(shared, worker)| {
                let mut ctl = self.control();
                ctl.coop = Some(shared);
                ctl.owner = Some(worker);
            }),
        };
        if let Err(err) = attached {
            let mut ctl = self.control();
            ctl.state = TaskState::Stopped;
            ctl.attached = false;
            warn!(task = %self.name(), error = %err, "task failed to start");
            return Err(err);
        }
        debug!(task = %self.name(), "started");
        Ok(())
    }

    fn spawn_thread(&self) -> Result<()> {
        let task = self.clone();
        let handle = thread::Builder::new()
            .name(format!("sluice-{}", self.name()))
            .spawn(move || task.thread_loop())
            .map_err(Error::Io)?;
        self.control().owner = Some(handle.thread().id());
        *self.inner.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn thread_loop(self) {
        loop {
            let generation = {
                let mut ctl = self.control();
                loop {
                    match ctl.state {
                        TaskState::Started => break,
                        TaskState::Paused => {
                            ctl = self
                                .inner
                                .cond
                                .wait(ctl)
                                .unwrap_or_else(|e| e.into_inner());
                        }
                        TaskState::Stopped => {
                            ctl.attached = false;
                            self.inner.cond.notify_all();
                            trace!(task = %self.name(), "thread leaving");
                            return;
                        }
                    }
                }
                ctl.busy = true;
                ctl.generation
            };
            self.run_once(generation);
        }
    }

    fn run_once(&self, generation: u64) {
        let step = {
            let mut func = self.inner.func.lock().unwrap_or_else(|e| e.into_inner());
            func()
        };
        let mut ctl = self.control();
        ctl.busy = false;
        if step == TaskStep::Pause
            && ctl.state == TaskState::Started
            && ctl.generation == generation
        {
            trace!(task = %self.name(), "paused itself");
            ctl.state = TaskState::Paused;
        }
        self.inner.cond.notify_all();
    }

    /// Run one iteration if started. Used by the cooperative scheduler.
    pub(crate) fn iterate(&self) -> bool {
        let generation = {
            let mut ctl = self.control();
            if ctl.state != TaskState::Started {
                return false;
            }
            ctl.busy = true;
            ctl.generation
        };
        self.run_once(generation);
        true
    }

    /// Stop iterating after the current iteration.
    pub fn pause(&self) {
        let mut ctl = self.control();
        if ctl.state != TaskState::Paused {
            ctl.state = TaskState::Paused;
            self.inner.cond.notify_all();
            trace!(task = %self.name(), "pause requested");
        }
    }

    /// Ask the loop to finish.
    pub fn stop(&self) {
        let mut ctl = self.control();
        ctl.state = TaskState::Stopped;
        self.inner.cond.notify_all();
    }

    /// Stop and wait for the current iteration to finish, detaching the task
    /// from its thread or scheduler.
    ///
    /// Called from inside the task itself this only stops it.
    pub fn join(&self) {
        self.stop();
        let (owner, coop) = {
            let ctl = self.control();
            (ctl.owner, ctl.coop.clone())
        };
        if owner == Some(thread::current().id()) {
            debug!(task = %self.name(), "join from own thread, not waiting");
            return;
        }

        match coop {
            Some(coop) => {
                let mut ctl = self.control();
                while ctl.busy {
                    ctl = self
                        .inner
                        .cond
                        .wait(ctl)
                        .unwrap_or_else(|e| e.into_inner());
                }
                drop(ctl);
                coop.unregister(self);
            }
            None => {
                let handle = self
                    .inner
                    .handle
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                if let Some(handle) = handle {
                    if handle.join().is_err() {
                        warn!(task = %self.name(), "task thread panicked");
                    }
                }
            }
        }

        let mut ctl = self.control();
        ctl.attached = false;
        ctl.owner = None;
        ctl.coop = None;
        debug!(task = %self.name(), "joined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting(limit: usize) -> (Task, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = Task::new("count", move || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            if n % limit == 0 {
                TaskStep::Pause
            } else {
                TaskStep::Continue
            }
        });
        (task, count)
    }

    fn wait_for(task: &Task, state: TaskState) {
        for _ in 0..500 {
            if task.state() == state {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("task never reached {state:?}");
    }

    #[test]
    fn test_pause_and_restart() {
        let (task, count) = counting(5);
        task.start(&Scheduler::Threaded).unwrap();
        wait_for(&task, TaskState::Paused);
        assert_eq!(count.load(Ordering::SeqCst), 5);

        task.start(&Scheduler::Threaded).unwrap();
        wait_for(&task, TaskState::Paused);
        assert_eq!(count.load(Ordering::SeqCst), 10);

        task.join();
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[test]
    fn test_join_from_inside_does_not_deadlock() {
        let slot: Arc<Mutex<Option<Task>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let task = Task::new("self-join", move || {
            if let Some(me) = inner.lock().unwrap().as_ref() {
                me.join();
            }
            TaskStep::Continue
        });
        *slot.lock().unwrap() = Some(task.clone());
        task.start(&Scheduler::Threaded).unwrap();
        wait_for(&task, TaskState::Stopped);
        task.join();
        slot.lock().unwrap().take();
    }
}
