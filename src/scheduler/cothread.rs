//! Cooperative execution slots sharing one OS thread.
//!
//! A [`CothreadContext`] holds a bounded table of slots. Slot 0 is the
//! master: the code that owns the context. Every other slot runs a function
//! bound with [`CothreadContext::set_function`].
//!
//! Control moves explicitly. The master calls [`CothreadContext::switch_to`];
//! the slot function runs until it hands control on by returning
//! [`CothreadStep::Switch`] or finishes with [`CothreadStep::Return`]. A slot
//! keeps an explicit resume point between entries, so a long-running
//! cothread is written as a state machine over
//! [`CothreadCx::resume_point`] rather than by saving machine registers.
//!
//! ```rust
//! use sluice::scheduler::{CothreadContext, CothreadId, CothreadStep};
//!
//! let mut ctx = CothreadContext::new();
//! let ping = ctx.create().unwrap();
//! let pong = ctx.create().unwrap();
//! ctx.set_function(ping, move |cx| {
//!     let n = cx.resume_point();
//!     cx.set_resume_point(n + 1);
//!     CothreadStep::Switch(pong)
//! }).unwrap();
//! ctx.set_function(pong, |_| CothreadStep::Switch(CothreadId::MAIN)).unwrap();
//!
//! ctx.switch_to(ping);
//! ctx.switch_to(ping);
//! assert_eq!(ctx.current(), CothreadId::MAIN);
//! assert!(ctx.is_started(ping));
//! ```
//!
//! The context is `&mut`-accessed, so only one thread can drive it at a time.

use crate::error::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tracing::{trace, warn};

/// Default slot table size, master included.
pub const MAX_COTHREADS: usize = 16;

/// Index of a slot in a [`CothreadContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CothreadId(usize);

impl CothreadId {
    /// The master slot.
    pub const MAIN: CothreadId = CothreadId(0);

    /// Table index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CothreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cothread{}", self.0)
    }
}

/// What a slot function does when it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CothreadStep {
    /// Hand control to another slot. Switching to the running slot enters
    /// it again; switching to [`CothreadId::MAIN`] returns to the master.
    Switch(CothreadId),
    /// Finish. The slot is reset to not-started and the master resumes.
    Return,
}

type CothreadFn = Box<dyn FnMut(&mut CothreadCx<'_>) -> CothreadStep + Send>;
type DataMap = HashMap<String, Box<dyn Any + Send>>;

struct Slot {
    func: Option<CothreadFn>,
    started: bool,
    resume_point: u32,
}

/// View of the context handed to a running slot function.
pub struct CothreadCx<'a> {
    id: CothreadId,
    resume_point: &'a mut u32,
    data: &'a mut DataMap,
}

impl CothreadCx<'_> {
    /// The running slot.
    pub fn id(&self) -> CothreadId {
        self.id
    }

    /// Resume point saved by the previous entry, zero on first entry.
    pub fn resume_point(&self) -> u32 {
        *self.resume_point
    }

    /// Save where to continue on the next entry.
    pub fn set_resume_point(&mut self, point: u32) {
        *self.resume_point = point;
    }

    /// Context-wide value stored under `key`.
    pub fn get_data<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref())
    }

    /// Store a context-wide value.
    pub fn set_data<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }
}

/// A bounded table of cooperatively scheduled slots.
pub struct CothreadContext {
    slots: Vec<Option<Slot>>,
    current: CothreadId,
    data: DataMap,
}

impl Default for CothreadContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CothreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CothreadContext")
            .field("capacity", &self.slots.len())
            .field("active", &self.active())
            .field("current", &self.current)
            .finish()
    }
}

impl CothreadContext {
    /// Context with [`MAX_COTHREADS`] slots.
    pub fn new() -> Self {
        Self::with_capacity(MAX_COTHREADS)
    }

    /// Context with `capacity` slots, master included.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots: Vec<Option<Slot>> = (0..capacity.max(1)).map(|_| None).collect();
        slots[0] = Some(Slot {
            func: None,
            started: true,
            resume_point: 0,
        });
        Self {
            slots,
            current: CothreadId::MAIN,
            data: HashMap::new(),
        }
    }

    /// Table size, master included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots in use, master included.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Allocate a slot.
    pub fn create(&mut self) -> Result<CothreadId> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(Error::CothreadTableFull(self.slots.len()));
        };
        self.slots[index] = Some(Slot {
            func: None,
            started: false,
            resume_point: 0,
        });
        trace!(cothread = index, "created");
        Ok(CothreadId(index))
    }

    /// Bind the function a slot runs. The slot restarts from scratch.
    pub fn set_function<F>(&mut self, id: CothreadId, f: F) -> Result<()>
    where
        F: FnMut(&mut CothreadCx<'_>) -> CothreadStep + Send + 'static,
    {
        if id == CothreadId::MAIN {
            return Err(Error::NoSuchCothread(id.0));
        }
        let slot = self
            .slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::NoSuchCothread(id.0))?;
        slot.func = Some(Box::new(f));
        slot.started = false;
        slot.resume_point = 0;
        Ok(())
    }

    /// Release a slot. The master and the running slot cannot be freed.
    pub fn free(&mut self, id: CothreadId) -> bool {
        if id == CothreadId::MAIN || id == self.current {
            return false;
        }
        match self.slots.get_mut(id.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                trace!(cothread = id.0, "freed");
                true
            }
            _ => false,
        }
    }

    /// Slot that currently has control.
    pub fn current(&self) -> CothreadId {
        self.current
    }

    /// True if the slot was entered and has not returned yet.
    pub fn is_started(&self, id: CothreadId) -> bool {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .is_some_and(|s| s.started)
    }

    /// Store a value visible to every slot.
    pub fn set_data<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.data.insert(key.into(), Box::new(value));
    }

    /// Value stored under `key`, if it has type `T`.
    pub fn get_data<T: Any>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref())
    }

    /// False if `id` exists but has no function bound yet.
    fn is_runnable(&self, id: CothreadId) -> bool {
        match self.slots.get(id.0) {
            Some(Some(slot)) => slot.func.is_some() || id == CothreadId::MAIN,
            Some(None) => panic!("switch to freed {id}"),
            None => panic!("switch to {id} outside the cothread table"),
        }
    }

    /// Give control to `target` and run until control is back at the master.
    ///
    /// Switching to the current slot does nothing. Switching to a slot with
    /// no function bound logs a warning and leaves control with the master.
    ///
    /// # Panics
    ///
    /// If `target`, or a slot a function switches to, was never created or
    /// has been freed.
    pub fn switch_to(&mut self, target: CothreadId) {
        if target == self.current {
            trace!(cothread = target.0, "switch to self");
            return;
        }
        if !self.is_runnable(target) {
            warn!(cothread = target.0, "switch to a slot with no function");
            self.current = CothreadId::MAIN;
            return;
        }

        let mut id = target;
        loop {
            self.current = id;
            let (mut func, mut resume_point) = match self.slots[id.0].as_mut() {
                Some(slot) => {
                    slot.started = true;
                    match slot.func.take() {
                        Some(func) => (func, slot.resume_point),
                        None => panic!("{id} is already running"),
                    }
                }
                None => panic!("switch to freed {id}"),
            };

            trace!(cothread = id.0, resume_point, "enter");
            let step = {
                let mut cx = CothreadCx {
                    id,
                    resume_point: &mut resume_point,
                    data: &mut self.data,
                };
                func(&mut cx)
            };

            if let Some(slot) = self.slots[id.0].as_mut() {
                slot.func = Some(func);
                slot.resume_point = resume_point;
            }

            match step {
                CothreadStep::Switch(next) if next == CothreadId::MAIN => break,
                CothreadStep::Switch(next) => {
                    if !self.is_runnable(next) {
                        warn!(from = id.0, cothread = next.0, "switch to a slot with no function");
                        break;
                    }
                    id = next;
                }
                CothreadStep::Return => {
                    if let Some(slot) = self.slots[id.0].as_mut() {
                        slot.started = false;
                        slot.resume_point = 0;
                    }
                    trace!(cothread = id.0, "returned");
                    break;
                }
            }
        }
        self.current = CothreadId::MAIN;
    }
}
