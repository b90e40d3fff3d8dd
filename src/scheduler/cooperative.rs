//! Several streaming tasks interleaved on one OS thread.
//!
//! The scheduler owns a worker thread hosting a [`CothreadContext`]. Each
//! registered [`Task`] gets a slot. A round switches into the first
//! runnable slot; every slot runs one iteration of its task and hands
//! control to the next runnable slot, and the last one returns to the
//! master, which waits for work and starts the next round.

use super::cothread::{CothreadContext, CothreadCx, CothreadId, CothreadStep, MAX_COTHREADS};
use super::task::{Task, TaskState};
use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};

const ROUND_KEY: &str = "sluice.round";

/// Settings of a [`CooperativeScheduler`].
#[derive(Debug, Clone)]
pub struct CooperativeConfig {
    /// Slot table size, master included. At most this minus one tasks fit.
    pub max_cothreads: usize,
    /// How long the worker sleeps when no task is runnable before checking
    /// again.
    pub idle_timeout: Duration,
}

impl Default for CooperativeConfig {
    fn default() -> Self {
        Self {
            max_cothreads: MAX_COTHREADS,
            idle_timeout: Duration::from_millis(20),
        }
    }
}

impl CooperativeConfig {
    /// Set the slot table size.
    pub fn with_max_cothreads(mut self, max: usize) -> Self {
        self.max_cothreads = max;
        self
    }

    /// Set the idle wait.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

struct Shared {
    tasks: Vec<Task>,
    shutdown: bool,
    worker: Option<JoinHandle<()>>,
    worker_id: Option<ThreadId>,
}

/// State shared between scheduler handles, registered tasks and the worker.
pub(crate) struct CoopShared {
    config: CooperativeConfig,
    shared: Mutex<Shared>,
    cond: Condvar,
}

impl CoopShared {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake the worker, e.g. because a task was started.
    pub(crate) fn wake(&self) {
        let _shared = self.lock();
        self.cond.notify_all();
    }

    pub(crate) fn unregister(&self, task: &Task) {
        let mut shared = self.lock();
        shared.tasks.retain(|t| t != task);
        self.cond.notify_all();
        trace!(task = %task.name(), "unregistered from cooperative scheduler");
    }
}

struct Handle {
    shared: Arc<CoopShared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        let worker = {
            let mut shared = self.shared.lock();
            shared.shutdown = true;
            self.shared.cond.notify_all();
            shared.worker.take()
        };
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!("cooperative worker panicked");
            }
        }
    }
}

/// Runs tasks as cothreads of a single worker thread.
#[derive(Clone)]
pub struct CooperativeScheduler {
    handle: Arc<Handle>,
}

impl std::fmt::Debug for CooperativeScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.handle.shared.lock();
        f.debug_struct("CooperativeScheduler")
            .field("tasks", &shared.tasks.len())
            .field("running", &shared.worker.is_some())
            .finish()
    }
}

impl Default for CooperativeScheduler {
    fn default() -> Self {
        Self::new(CooperativeConfig::default())
    }
}

impl CooperativeScheduler {
    /// Create a scheduler. The worker thread starts with the first task.
    pub fn new(config: CooperativeConfig) -> Self {
        Self {
            handle: Arc::new(Handle {
                shared: Arc::new(CoopShared {
                    config,
                    shared: Mutex::new(Shared {
                        tasks: Vec::new(),
                        shutdown: false,
                        worker: None,
                        worker_id: None,
                    }),
                    cond: Condvar::new(),
                }),
            }),
        }
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.handle.shared.lock().tasks.len()
    }

    /// The worker thread, once started.
    pub fn worker_thread(&self) -> Option<ThreadId> {
        self.handle.shared.lock().worker_id
    }

    pub(crate) fn register(&self, task: &Task) -> Result<(Arc<CoopShared>, ThreadId)> {
        let core = &self.handle.shared;
        let mut shared = core.lock();
        if shared.shutdown {
            return Err(Error::InvalidConfig("cooperative scheduler shut down".into()));
        }
        if shared.tasks.len() + 1 >= core.config.max_cothreads {
            return Err(Error::CothreadTableFull(core.config.max_cothreads));
        }
        let worker_id = match shared.worker_id {
            Some(id) => id,
            None => {
                let worker_core = Arc::clone(core);
                let worker = thread::Builder::new()
                    .name("sluice-cooperative".to_string())
                    .spawn(move || worker_loop(worker_core))
                    .map_err(Error::Io)?;
                let id = worker.thread().id();
                shared.worker = Some(worker);
                shared.worker_id = Some(id);
                id
            }
        };
        shared.tasks.push(task.clone());
        core.cond.notify_all();
        debug!(task = %task.name(), tasks = shared.tasks.len(), "registered with cooperative scheduler");
        Ok((Arc::clone(core), worker_id))
    }
}

fn slot_function(task: Task) -> impl FnMut(&mut CothreadCx<'_>) -> CothreadStep + Send + 'static {
    move |cx| {
        task.iterate();
        if task.state() == TaskState::Stopped {
            return CothreadStep::Return;
        }
        let next = cx.get_data::<Vec<CothreadId>>(ROUND_KEY).and_then(|round| {
            let pos = round.iter().position(|id| *id == cx.id())?;
            round.get(pos + 1).copied()
        });
        CothreadStep::Switch(next.unwrap_or(CothreadId::MAIN))
    }
}

fn worker_loop(core: Arc<CoopShared>) {
    let mut ctx = CothreadContext::with_capacity(core.config.max_cothreads);
    let mut slots: Vec<(Task, CothreadId)> = Vec::new();
    debug!("cooperative worker running");

    loop {
        let tasks = {
            let mut shared = core.lock();
            loop {
                if shared.shutdown {
                    break;
                }
                if shared.tasks.iter().any(|t| t.state() == TaskState::Started) {
                    break;
                }
                shared = core
                    .cond
                    .wait_timeout(shared, core.config.idle_timeout)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
            if shared.shutdown {
                break;
            }
            shared.tasks.clone()
        };

        slots.retain(|(task, id)| {
            let keep = tasks.contains(task);
            if !keep {
                ctx.free(*id);
            }
            keep
        });
        for task in &tasks {
            if slots.iter().any(|(t, _)| t == task) {
                continue;
            }
            let created = ctx
                .create()
                .and_then(|id| ctx.set_function(id, slot_function(task.clone())).map(|()| id));
            match created {
                Ok(id) => slots.push((task.clone(), id)),
                Err(err) => warn!(task = %task.name(), error = %err, "no cothread for task"),
            }
        }

        let round: Vec<CothreadId> = slots
            .iter()
            .filter(|(task, _)| task.state() == TaskState::Started)
            .map(|(_, id)| *id)
            .collect();
        let Some(&first) = round.first() else {
            continue;
        };
        ctx.set_data(ROUND_KEY, round);
        ctx.switch_to(first);
    }

    debug!("cooperative worker leaving");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, TaskStep};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tasks_share_one_thread() {
        let scheduler = CooperativeScheduler::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<Task> = ["a", "b"]
            .into_iter()
            .map(|name| {
                let log = Arc::clone(&log);
                let runs = AtomicUsize::new(0);
                Task::new(name, move || {
                    log.lock().unwrap().push((name, thread::current().id()));
                    if runs.fetch_add(1, Ordering::SeqCst) == 2 {
                        TaskStep::Pause
                    } else {
                        TaskStep::Continue
                    }
                })
            })
            .collect();

        let sched = Scheduler::Cooperative(scheduler.clone());
        for task in &tasks {
            task.start(&sched).unwrap();
        }
        for task in &tasks {
            for _ in 0..500 {
                if task.state() == TaskState::Paused {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }
            assert_eq!(task.state(), TaskState::Paused);
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 6);
        let worker = scheduler.worker_thread().unwrap();
        assert!(log.iter().all(|(_, id)| *id == worker));
        assert_eq!(log.iter().filter(|(n, _)| *n == "a").count(), 3);
        drop(log);

        for task in &tasks {
            task.join();
        }
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn test_slot_limit() {
        let scheduler = CooperativeScheduler::new(CooperativeConfig::default().with_max_cothreads(2));
        let sched = Scheduler::Cooperative(scheduler.clone());
        let a = Task::new("a", || TaskStep::Pause);
        let b = Task::new("b", || TaskStep::Pause);
        a.start(&sched).unwrap();
        assert!(matches!(b.start(&sched), Err(Error::CothreadTableFull(2))));
        a.join();
    }
}
