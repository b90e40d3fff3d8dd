//! Queue element for asynchronous buffering.
//!
//! Provides a bounded buffer queue between pipeline elements, enabling:
//! - Decoupling of producer and consumer rates
//! - Backpressure handling
//! - Thread boundary crossing
//!
//! The sink side is a chain function that blocks while the queue is full.
//! The source side is a streaming task on its own thread that pushes the
//! queued buffers and serialized events downstream in order.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, Pad, PadMode, PadTemplate, StateChange, StateChangeError,
    StateChangeResult, StateChangeSuccess,
};
use crate::event::{Event, EventKind, PipelineItem};
use crate::flow::{FlowError, FlowResult};
use crate::observability::{log_flow_error, pad_span};
use crate::scheduler::{Scheduler, Task, TaskStep};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use tracing::{debug, error, trace};

/// Leaky mode determines what happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Block until space is available (default).
    #[default]
    None,
    /// Drop new buffers when full (upstream leaky).
    Upstream,
    /// Drop old buffers when full (downstream leaky).
    Downstream,
}

/// Limits and overflow policy of a [`Queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Buffers held before the queue is full. Zero means no limit.
    pub max_buffers: usize,
    /// Payload bytes held before the queue is full. Zero means no limit.
    pub max_bytes: usize,
    /// What to do when full.
    pub leaky: LeakyMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_buffers: 200,
            max_bytes: 10 * 1024 * 1024,
            leaky: LeakyMode::None,
        }
    }
}

impl QueueConfig {
    /// Set the buffer limit.
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Set the byte limit.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Set the leaky mode.
    pub fn with_leaky(mut self, leaky: LeakyMode) -> Self {
        self.leaky = leaky;
        self
    }
}

/// Counters shared between a [`Queue`] element and the application.
#[derive(Debug, Default)]
pub struct QueueStats {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
    level: AtomicUsize,
}

impl QueueStats {
    /// Buffers accepted by the sink pad.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Buffers sent out of the source pad.
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }

    /// Buffers discarded by a leaky queue or a flush.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Buffers currently queued.
    pub fn level(&self) -> usize {
        self.level.load(Ordering::Relaxed)
    }
}

/// A queue element that buffers data between pipeline stages.
///
/// # Example
///
/// ```rust
/// use sluice::elements::{LeakyMode, Queue};
///
/// let queue = Queue::new().with_max_buffers(16).with_leaky(LeakyMode::Downstream);
/// let stats = queue.stats();
/// let element = queue.build("queue0");
/// assert_eq!(element.pads().len(), 2);
/// assert_eq!(stats.level(), 0);
/// ```
#[derive(Debug, Default)]
pub struct Queue {
    config: QueueConfig,
    stats: Arc<QueueStats>,
}

impl Queue {
    /// Queue with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the buffer limit.
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.config = self.config.with_max_buffers(max_buffers);
        self
    }

    /// Set the byte limit.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.config = self.config.with_max_bytes(max_bytes);
        self
    }

    /// Set the leaky mode.
    pub fn with_leaky(mut self, leaky: LeakyMode) -> Self {
        self.config = self.config.with_leaky(leaky);
        self
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        QueueImpl::new_element(name, self.config, self.stats)
    }
}

struct QueueState {
    items: VecDeque<PipelineItem>,
    buffers: usize,
    bytes: usize,
    /// Outcome of the last downstream push; chain returns it once it is an
    /// error.
    srcresult: FlowResult,
}

impl QueueState {
    fn new() -> Self {
        Self {
            items: VecDeque::new(),
            buffers: 0,
            bytes: 0,
            srcresult: Err(FlowError::Flushing),
        }
    }

    fn is_full(&self, config: &QueueConfig) -> bool {
        (config.max_buffers > 0 && self.buffers >= config.max_buffers)
            || (config.max_bytes > 0 && self.bytes >= config.max_bytes)
    }

    fn push(&mut self, item: PipelineItem) {
        if let PipelineItem::Buffer(buffer) = &item {
            self.buffers += 1;
            self.bytes += buffer.len();
        }
        self.items.push_back(item);
    }

    fn pop(&mut self) -> Option<PipelineItem> {
        let item = self.items.pop_front()?;
        if let PipelineItem::Buffer(buffer) = &item {
            self.buffers -= 1;
            self.bytes -= buffer.len();
        }
        Some(item)
    }

    /// Remove the oldest queued buffer, leaving events in place.
    fn drop_oldest_buffer(&mut self) -> bool {
        let Some(pos) = self.items.iter().position(PipelineItem::is_buffer) else {
            return false;
        };
        if let Some(PipelineItem::Buffer(buffer)) = self.items.remove(pos) {
            self.buffers -= 1;
            self.bytes -= buffer.len();
        }
        true
    }

    fn clear(&mut self) -> usize {
        let dropped = self.buffers;
        self.items.clear();
        self.buffers = 0;
        self.bytes = 0;
        dropped
    }
}

struct QueueImpl {
    this: Weak<Self>,
    config: QueueConfig,
    stats: Arc<QueueStats>,
    sinkpad: Pad,
    srcpad: Pad,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    task: Mutex<Option<Task>>,
}

impl QueueImpl {
    fn new_element(name: impl Into<String>, config: QueueConfig, stats: Arc<QueueStats>) -> Element {
        let imp = Self::new(config, stats);
        let pads = [imp.sinkpad.clone(), imp.srcpad.clone()];
        let element = Element::from_impl(name, imp);
        for pad in pads {
            if let Err(err) = element.add_pad(pad) {
                error!(element = %element.name(), error = %err, "cannot add queue pad");
            }
        }
        element
    }

    fn new(config: QueueConfig, stats: Arc<QueueStats>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let sinkpad = Pad::builder(PadTemplate::sink(Caps::any()))
                .chain_function({
                    let weak = weak.clone();
                    move |_pad, buffer| match weak.upgrade() {
                        Some(queue) => queue.chain(buffer),
                        None => Err(FlowError::Flushing),
                    }
                })
                .event_function({
                    let weak = weak.clone();
                    move |_pad, event| weak.upgrade().is_some_and(|queue| queue.sink_event(event))
                })
                .query_caps_function({
                    let weak = weak.clone();
                    move |_pad, filter| match weak.upgrade() {
                        Some(queue) => queue.srcpad.peer_query_caps(filter),
                        None => Caps::new_empty(),
                    }
                })
                .activate_function({
                    let weak = weak.clone();
                    move |_pad, mode, active| {
                        weak.upgrade()
                            .is_some_and(|queue| queue.activate_sink(mode, active))
                    }
                })
                .build();
            let srcpad = Pad::builder(PadTemplate::src(Caps::any()))
                .query_caps_function({
                    let weak = weak.clone();
                    move |_pad, filter| match weak.upgrade() {
                        Some(queue) => queue.sinkpad.peer_query_caps(filter),
                        None => Caps::new_empty(),
                    }
                })
                .activate_function({
                    let weak = weak.clone();
                    move |pad, mode, active| {
                        weak.upgrade()
                            .is_some_and(|queue| queue.activate_src(pad, mode, active))
                    }
                })
                .build();
            Self {
                this: weak.clone(),
                config,
                stats,
                sinkpad,
                srcpad,
                state: Mutex::new(QueueState::new()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                task: Mutex::new(None),
            }
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task(&self) -> MutexGuard<'_, Option<Task>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_level(&self, state: &QueueState) {
        self.stats.level.store(state.buffers, Ordering::Relaxed);
    }

    /// Fail pending and future chain calls with `result` and wake every
    /// waiter.
    fn set_flushing(&self, result: FlowError) -> usize {
        let mut state = self.state();
        state.srcresult = Err(result);
        let dropped = if result == FlowError::Flushing {
            state.clear()
        } else {
            0
        };
        self.set_level(&state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        dropped
    }

    fn chain(&self, buffer: Buffer) -> FlowResult {
        let mut state = self.state();
        state.srcresult?;

        while state.is_full(&self.config) {
            match self.config.leaky {
                LeakyMode::None => {
                    trace!(buffers = state.buffers, bytes = state.bytes, "queue full, waiting");
                    state = self
                        .not_full
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                    state.srcresult?;
                }
                LeakyMode::Upstream => {
                    trace!("queue full, dropping new buffer");
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                LeakyMode::Downstream => {
                    if !state.drop_oldest_buffer() {
                        break;
                    }
                    trace!("queue full, dropped oldest buffer");
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        state.push(PipelineItem::Buffer(buffer));
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.set_level(&state);
        self.not_empty.notify_one();
        Ok(())
    }

    fn sink_event(&self, event: Event) -> bool {
        match event.kind() {
            EventKind::FlushStart => {
                let dropped = self.set_flushing(FlowError::Flushing);
                self.stats.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
                let ok = self.srcpad.push_event(event);
                if let Some(task) = self.task().as_ref() {
                    task.pause();
                }
                ok
            }
            EventKind::FlushStop(_) => {
                let ok = self.srcpad.push_event(event);
                {
                    let mut state = self.state();
                    let dropped = state.clear();
                    self.stats.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
                    state.srcresult = Ok(());
                    self.set_level(&state);
                }
                if self.srcpad.mode() == PadMode::Push {
                    self.start_task();
                }
                ok
            }
            _ if event.is_serialized() => {
                let mut state = self.state();
                if state.srcresult.is_err() {
                    trace!(event = event.name(), "event refused after downstream failure");
                    return false;
                }
                state.push(PipelineItem::Event(event));
                self.not_empty.notify_one();
                true
            }
            _ => self.srcpad.push_event(event),
        }
    }

    fn activate_sink(&self, mode: PadMode, active: bool) -> bool {
        match (mode, active) {
            (PadMode::Pull, true) => false,
            (_, true) => true,
            (_, false) => {
                self.set_flushing(FlowError::Flushing);
                true
            }
        }
    }

    fn activate_src(&self, pad: &Pad, mode: PadMode, active: bool) -> bool {
        match (mode, active) {
            (PadMode::Pull, true) => false,
            (_, true) => {
                self.state().srcresult = Ok(());
                if self.task().is_none() {
                    let name = pad
                        .parent()
                        .map(|e| e.name().to_string())
                        .unwrap_or_else(|| "queue".to_string());
                    *self.task() = Some(self.make_task(&name));
                }
                self.start_task()
            }
            (_, false) => {
                self.set_flushing(FlowError::Flushing);
                if let Some(task) = self.task().as_ref() {
                    task.pause();
                }
                true
            }
        }
    }

    fn make_task(&self, name: &str) -> Task {
        let weak = self.this.clone();
        Task::new(format!("{name}:queue"), move || match weak.upgrade() {
            Some(queue) => queue.loop_iteration(),
            None => TaskStep::Pause,
        })
    }

    /// The queue always gets a dedicated thread.
    fn start_task(&self) -> bool {
        let task = self.task().clone();
        match task {
            Some(task) => match task.start(&Scheduler::Threaded) {
                Ok(()) => true,
                Err(err) => {
                    error!(error = %err, "cannot start queue task");
                    false
                }
            },
            None => false,
        }
    }

    fn loop_iteration(&self) -> TaskStep {
        let pad = &self.srcpad;
        let _span = pad_span(pad).entered();
        let _stream = pad.stream_lock();

        let item = {
            let mut state = self.state();
            loop {
                if state.srcresult.is_err() {
                    return TaskStep::Pause;
                }
                if let Some(item) = state.pop() {
                    self.set_level(&state);
                    self.not_full.notify_one();
                    break item;
                }
                state = self
                    .not_empty
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };

        let result = match item {
            PipelineItem::Buffer(buffer) => {
                self.stats.popped.fetch_add(1, Ordering::Relaxed);
                pad.push(buffer)
            }
            PipelineItem::Event(event) => {
                let eos = matches!(event.kind(), EventKind::Eos);
                if !pad.push_event(event) && pad.is_flushing() {
                    Err(FlowError::Flushing)
                } else if eos {
                    debug!(pad = %pad.full_name(), "EOS pushed, pausing");
                    Err(FlowError::Eos)
                } else {
                    Ok(())
                }
            }
        };

        match result {
            Ok(()) => TaskStep::Continue,
            Err(err) => {
                self.set_flushing(err);
                if let Some(element) = pad.parent() {
                    log_flow_error(element.name(), err);
                    if err.is_fatal() || err == FlowError::NotLinked {
                        element.post_error("Internal data stream error", Some(err.to_string()));
                        pad.push_event(Event::eos());
                    }
                }
                TaskStep::Pause
            }
        }
    }
}

impl ElementImpl for QueueImpl {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::ReadyToPaused => {
                if !element.activate_pads(true) {
                    return Err(StateChangeError {
                        element: element.name().to_string(),
                        transition,
                    });
                }
            }
            StateChange::PausedToReady => {
                element.activate_pads(false);
                let task = self.task().take();
                if let Some(task) = task {
                    task.join();
                }
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }
}

impl Drop for QueueImpl {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.stop();
        }
    }
}
