//! The element handle and its state machine.

use super::pad::{Pad, PadDirection, PadMode};
use super::state::{State, StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};
use super::traits::ElementImpl;
use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{Message, MessageKind};
use crate::observability::element_span;
use crate::scheduler::Scheduler;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct StateData {
    current: State,
    /// Adjacent state of the step in progress.
    next: Option<State>,
    /// Final target of the running `set_state`.
    target: Option<State>,
    last_return: StateChangeResult,
    /// `change_state` is executing.
    in_change: bool,
    /// The step returned `Async` and waits for `continue_state`.
    is_async: bool,
    /// `continue_state` result that arrived while `change_state` ran.
    early_commit: Option<StateChangeResult>,
}

pub(crate) struct ElementInner {
    name: String,
    imp: Arc<dyn ElementImpl>,
    pads: RwLock<Vec<Pad>>,
    state: Mutex<StateData>,
    state_cond: Condvar,
    state_change_lock: Mutex<()>,
    parent: Mutex<Weak<ElementInner>>,
    bus: Mutex<Option<Bus>>,
    scheduler: Mutex<Option<Scheduler>>,
    locked: AtomicBool,
}

impl Drop for ElementInner {
    fn drop(&mut self) {
        let pads = self.pads.get_mut().unwrap_or_else(|e| e.into_inner());
        for pad in pads.drain(..) {
            pad.unlink();
        }
    }
}

/// Handle to an element. Clones refer to the same element.
#[derive(Clone)]
pub struct Element(Arc<ElementInner>);

/// Non-owning reference to an [`Element`].
#[derive(Clone, Debug, Default)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// The element, if it is still alive.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(Element)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.0.name)
            .field("state", &self.current_state())
            .finish()
    }
}

impl Element {
    /// Wrap an implementation in a new element in the NULL state.
    pub fn new(name: impl Into<String>, imp: impl ElementImpl) -> Self {
        Self::from_impl(name, Arc::new(imp))
    }

    /// Like [`new`](Self::new) for an implementation that is already shared,
    /// typically because its pad functions hold weak references to it.
    pub fn from_impl(name: impl Into<String>, imp: Arc<dyn ElementImpl>) -> Self {
        Element(Arc::new(ElementInner {
            name: name.into(),
            imp,
            pads: RwLock::new(Vec::new()),
            state: Mutex::new(StateData {
                current: State::Null,
                next: None,
                target: None,
                last_return: Ok(StateChangeSuccess::Success),
                in_change: false,
                is_async: false,
                early_commit: None,
            }),
            state_cond: Condvar::new(),
            state_change_lock: Mutex::new(()),
            parent: Mutex::new(Weak::new()),
            bus: Mutex::new(None),
            scheduler: Mutex::new(None),
            locked: AtomicBool::new(false),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<ElementInner>) -> Self {
        Element(inner)
    }

    fn data(&self) -> MutexGuard<'_, StateData> {
        self.0.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Element name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// True if this element is a bin.
    pub fn is_bin(&self) -> bool {
        self.0.imp.is_bin()
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.0))
    }

    // ------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------

    /// Attach a pad. Pad names are unique per element.
    pub fn add_pad(&self, pad: Pad) -> Result<()> {
        let mut pads = self.0.pads.write().unwrap_or_else(|e| e.into_inner());
        if pads.iter().any(|p| p.name() == pad.name()) {
            return Err(Error::DuplicateName(format!("{}:{}", self.name(), pad.name())));
        }
        if !pad.set_parent(&self.0) {
            return Err(Error::AlreadyParented(pad.name().to_string()));
        }
        trace!(element = %self.name(), pad = %pad.name(), "pad added");
        pads.push(pad);
        Ok(())
    }

    /// All pads in the order they were added.
    pub fn pads(&self) -> Vec<Pad> {
        self.0
            .pads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pads of one direction.
    pub fn pads_by_direction(&self, direction: PadDirection) -> Vec<Pad> {
        self.pads()
            .into_iter()
            .filter(|p| p.direction() == direction)
            .collect()
    }

    /// Source pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads_by_direction(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.pads_by_direction(PadDirection::Sink)
    }

    /// Pad by name.
    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        self.0
            .pads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Activate every inactive pad in push mode, sink pads first, or
    /// deactivate every active pad, source pads first.
    pub fn activate_pads(&self, active: bool) -> bool {
        let (first, second) = if active {
            (self.sink_pads(), self.src_pads())
        } else {
            (self.src_pads(), self.sink_pads())
        };
        let mut ok = true;
        for pad in first.iter().chain(second.iter()) {
            let mode = pad.mode();
            ok &= match (active, mode) {
                (true, PadMode::None) => pad.activate_mode(PadMode::Push, true),
                (true, _) => true,
                (false, PadMode::None) => true,
                (false, mode) => pad.activate_mode(mode, false),
            };
        }
        if !ok {
            warn!(element = %self.name(), active, "pad activation failed");
        }
        ok
    }

    /// Link the first free compatible source pad of `self` to the first free
    /// compatible sink pad of `dest`.
    pub fn link(&self, dest: &Element) -> Result<()> {
        let mut last_err = None;
        for src in self.src_pads().iter().filter(|p| !p.is_linked()) {
            for sink in dest.sink_pads().iter().filter(|p| !p.is_linked()) {
                match src.link(sink) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                }
            }
        }
        match last_err {
            Some(e) => Err(e.into()),
            None => Err(Error::NoSuchPad {
                element: format!("{} -> {}", self.name(), dest.name()),
                pad: "unlinked pad".to_string(),
            }),
        }
    }

    /// Link named pads.
    pub fn link_pads(&self, src_pad: &str, dest: &Element, sink_pad: &str) -> Result<()> {
        let src = self.static_pad(src_pad).ok_or_else(|| Error::NoSuchPad {
            element: self.name().to_string(),
            pad: src_pad.to_string(),
        })?;
        let sink = dest.static_pad(sink_pad).ok_or_else(|| Error::NoSuchPad {
            element: dest.name().to_string(),
            pad: sink_pad.to_string(),
        })?;
        src.link(&sink)?;
        Ok(())
    }

    /// Link each element to the next.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Hierarchy
    // ------------------------------------------------------------------

    /// Containing bin.
    pub fn parent(&self) -> Option<Element> {
        self.0
            .parent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
            .map(Element)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) -> Result<()> {
        let mut slot = self.0.parent.lock().unwrap_or_else(|e| e.into_inner());
        match parent {
            Some(parent) => {
                if slot.upgrade().is_some() {
                    return Err(Error::AlreadyParented(self.name().to_string()));
                }
                *slot = Arc::downgrade(&parent.0);
            }
            None => *slot = Weak::new(),
        }
        Ok(())
    }

    /// Bus of this element or of the nearest ancestor that has one.
    pub fn bus(&self) -> Option<Bus> {
        let own = self.0.bus.lock().unwrap_or_else(|e| e.into_inner()).clone();
        own.or_else(|| self.parent().and_then(|p| p.bus()))
    }

    pub(crate) fn set_bus(&self, bus: Bus) {
        *self.0.bus.lock().unwrap_or_else(|e| e.into_inner()) = Some(bus);
    }

    /// Scheduler of the nearest ancestor that has one, threaded by default.
    pub fn scheduler(&self) -> Scheduler {
        let own = self
            .0
            .scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match own {
            Some(scheduler) => scheduler,
            None => self
                .parent()
                .map(|p| p.scheduler())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn set_scheduler(&self, scheduler: Scheduler) {
        *self.0.scheduler.lock().unwrap_or_else(|e| e.into_inner()) = Some(scheduler);
    }

    pub(crate) fn imp(&self) -> &Arc<dyn ElementImpl> {
        &self.0.imp
    }

    // ------------------------------------------------------------------
    // Messages and events
    // ------------------------------------------------------------------

    /// Post a message toward the application.
    ///
    /// The parent bin sees it first and may drop or rewrite it; top-level
    /// elements post to their bus. Returns false if nobody took it.
    pub fn post_message(&self, message: Message) -> bool {
        if let Some(parent) = self.parent() {
            match parent.0.imp.handle_child_message(&parent, message) {
                Some(message) => parent.post_message(message),
                None => true,
            }
        } else if let Some(bus) = self.0.bus.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            bus.post(message)
        } else {
            trace!(element = %self.name(), kind = ?message.message_type(), "no bus, message dropped");
            false
        }
    }

    /// Post an error message describing a failure in this element.
    pub fn post_error(&self, description: impl Into<String>, debug: Option<String>) -> bool {
        self.post_message(Message::error(self.name(), description, debug))
    }

    /// Send an event into the element from the application.
    pub fn send_event(&self, event: Event) -> bool {
        let imp = Arc::clone(&self.0.imp);
        imp.send_event(self, event)
    }

    /// Push upstream events out of the sink pads and all others out of the
    /// source pads. True if any pad accepted it.
    pub fn default_send_event(&self, event: Event) -> bool {
        let pads = if event.is_upstream() && !event.is_downstream() {
            self.sink_pads()
        } else {
            self.src_pads()
        };
        pads.iter()
            .fold(false, |any, pad| pad.push_event(event.clone()) || any)
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Committed state.
    pub fn current_state(&self) -> State {
        self.data().current
    }

    /// Target of a transition still in progress.
    pub fn pending_state(&self) -> Option<State> {
        self.data().target
    }

    /// Refuse (true) or allow (false) state changes. Returns the old value.
    pub fn set_locked_state(&self, locked: bool) -> bool {
        let old = self.0.locked.swap(locked, Ordering::SeqCst);
        if old != locked {
            debug!(element = %self.name(), locked, "locked state changed");
        }
        old
    }

    /// True if state changes are refused.
    pub fn is_locked_state(&self) -> bool {
        self.0.locked.load(Ordering::SeqCst)
    }

    /// Move to `target` one adjacent step at a time.
    ///
    /// Each committed step posts a state-changed message. A step answered
    /// with `Async` stops the walk and returns `Async`; the element finishes
    /// later with [`continue_state`](Self::continue_state).
    pub fn set_state(&self, target: State) -> StateChangeResult {
        if self.is_locked_state() {
            debug!(element = %self.name(), %target, "locked, state change ignored");
            return Ok(StateChangeSuccess::NoChange);
        }
        let _guard = self
            .0
            .state_change_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        {
            let mut data = self.data();
            if data.is_async {
                if let Some(next) = data.next.take() {
                    let old = data.current;
                    data.current = next;
                    data.is_async = false;
                    drop(data);
                    debug!(element = %self.name(), %old, %next, "outstanding async step committed");
                    self.post_message(Message::state_changed(self.name(), old, next, Some(target)));
                    self.post_message(Message::new(MessageKind::AsyncDone, Some(self.name())));
                    data = self.data();
                }
            }
            if data.current == target {
                data.target = None;
                data.last_return = Ok(StateChangeSuccess::NoChange);
                self.0.state_cond.notify_all();
                return Ok(StateChangeSuccess::NoChange);
            }
            data.target = Some(target);
        }

        let _span = element_span(self.name()).entered();
        debug!(element = %self.name(), %target, "setting state");
        let mut outcome = StateChangeSuccess::Success;
        loop {
            let transition = {
                let mut data = self.data();
                let Some(next) = data.current.next_toward(target) else {
                    break;
                };
                let Some(transition) = StateChange::new(data.current, next) else {
                    break;
                };
                data.next = Some(next);
                data.in_change = true;
                data.early_commit = None;
                transition
            };

            trace!(element = %self.name(), ?transition, "change_state");
            let imp = Arc::clone(&self.0.imp);
            let ret = imp.change_state(self, transition);

            let ret = match ret {
                Ok(StateChangeSuccess::Async) => match self.begin_async(transition) {
                    Some(result) => result,
                    None => return Ok(StateChangeSuccess::Async),
                },
                other => {
                    self.data().in_change = false;
                    other
                }
            };

            match ret {
                Err(err) => {
                    self.abort_state(&err);
                    return Err(err);
                }
                Ok(success) => {
                    if success == StateChangeSuccess::NoPreroll {
                        outcome = StateChangeSuccess::NoPreroll;
                    }
                    self.commit_step(transition, target);
                }
            }
        }

        let mut data = self.data();
        data.target = None;
        data.last_return = Ok(outcome);
        self.0.state_cond.notify_all();
        Ok(outcome)
    }

    /// Handle an `Async` answer. Returns the early result when
    /// `continue_state` already arrived, or `None` if the step now waits.
    fn begin_async(&self, transition: StateChange) -> Option<StateChangeResult> {
        debug!(element = %self.name(), ?transition, "state change is asynchronous");
        self.post_message(Message::new(MessageKind::AsyncStart, Some(self.name())));

        let mut data = self.data();
        data.in_change = false;
        match data.early_commit.take() {
            Some(result) => {
                drop(data);
                if result.is_ok() {
                    self.post_message(Message::new(MessageKind::AsyncDone, Some(self.name())));
                }
                Some(result)
            }
            None => {
                data.is_async = true;
                data.last_return = Ok(StateChangeSuccess::Async);
                self.0.state_cond.notify_all();
                None
            }
        }
    }

    fn commit_step(&self, transition: StateChange, target: State) {
        let old = transition.current();
        let new = transition.next();
        {
            let mut data = self.data();
            data.current = new;
            data.next = None;
            self.0.state_cond.notify_all();
        }
        let pending = (new != target).then_some(target);
        debug!(element = %self.name(), %old, %new, "state committed");
        self.post_message(Message::state_changed(self.name(), old, new, pending));
    }

    fn abort_state(&self, err: &StateChangeError) {
        let mut data = self.data();
        warn!(element = %self.name(), transition = ?err.transition, current = %data.current, "state change failed");
        data.next = None;
        data.target = None;
        data.is_async = false;
        data.last_return = Err(err.clone());
        self.0.state_cond.notify_all();
    }

    /// Complete a step that answered `Async`.
    ///
    /// On success the step is committed and, if the target lies further
    /// away, the walk continues in the calling thread.
    pub fn continue_state(&self, result: StateChangeResult) -> StateChangeResult {
        let mut data = self.data();
        if data.in_change {
            trace!(element = %self.name(), "completion arrived before async return");
            data.early_commit = Some(result.clone());
            return result;
        }
        if !data.is_async {
            debug!(element = %self.name(), "no async state change outstanding");
            return Ok(StateChangeSuccess::NoChange);
        }
        data.is_async = false;
        let current = data.current;
        let Some(next) = data.next.take() else {
            return Ok(StateChangeSuccess::NoChange);
        };
        let target = data.target.unwrap_or(next);

        match result {
            Err(err) => {
                drop(data);
                self.abort_state(&err);
                Err(err)
            }
            Ok(_) => {
                drop(data);
                if let Some(transition) = StateChange::new(current, next) {
                    self.commit_step(transition, target);
                }
                self.post_message(Message::new(MessageKind::AsyncDone, Some(self.name())));
                if next != target {
                    return self.set_state(target);
                }
                let mut data = self.data();
                data.target = None;
                data.last_return = Ok(StateChangeSuccess::Success);
                self.0.state_cond.notify_all();
                Ok(StateChangeSuccess::Success)
            }
        }
    }

    /// Wait up to `timeout` (forever if `None`) for an asynchronous
    /// transition to finish. Returns the last result with the current and
    /// pending states.
    pub fn get_state(&self, timeout: Option<Duration>) -> (StateChangeResult, State, Option<State>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut data = self.data();
        while data.is_async || data.next.is_some() {
            data = match deadline {
                None => self
                    .0
                    .state_cond
                    .wait(data)
                    .unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (Ok(StateChangeSuccess::Async), data.current, data.target);
                    }
                    self.0
                        .state_cond
                        .wait_timeout(data, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
            };
        }
        (data.last_return.clone(), data.current, data.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        seen: StdMutex<Vec<StateChange>>,
        fail_on: Option<StateChange>,
        async_on: Option<StateChange>,
    }

    impl ElementImpl for Arc<Recorder> {
        fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
            self.seen.lock().unwrap().push(transition);
            if self.fail_on == Some(transition) {
                return Err(StateChangeError {
                    element: element.name().to_string(),
                    transition,
                });
            }
            if self.async_on == Some(transition) {
                return Ok(StateChangeSuccess::Async);
            }
            Ok(StateChangeSuccess::Success)
        }
    }

    fn element_with_bus(recorder: &Arc<Recorder>) -> (Element, Bus) {
        let element = Element::new("rec", Arc::clone(recorder));
        let bus = Bus::new();
        element.set_bus(bus.clone());
        (element, bus)
    }

    #[test]
    fn test_walks_every_step() {
        let recorder = Arc::new(Recorder::default());
        let (element, bus) = element_with_bus(&recorder);

        assert_eq!(element.set_state(State::Playing), Ok(StateChangeSuccess::Success));
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                StateChange::NullToReady,
                StateChange::ReadyToPaused,
                StateChange::PausedToPlaying
            ]
        );
        let mut changes = 0;
        while let Some(msg) = bus.pop_filtered(MessageType::StateChanged.into()) {
            if let MessageKind::StateChanged { new, pending, .. } = msg.kind() {
                changes += 1;
                if *new == State::Playing {
                    assert_eq!(*pending, None);
                } else {
                    assert_eq!(*pending, Some(State::Playing));
                }
            }
        }
        assert_eq!(changes, 3);
        assert_eq!(element.set_state(State::Playing), Ok(StateChangeSuccess::NoChange));
    }

    #[test]
    fn test_failure_stops_walk() {
        let recorder = Arc::new(Recorder {
            fail_on: Some(StateChange::ReadyToPaused),
            ..Default::default()
        });
        let (element, _bus) = element_with_bus(&recorder);

        let err = element.set_state(State::Playing).unwrap_err();
        assert_eq!(err.transition, StateChange::ReadyToPaused);
        let (result, current, pending) = element.get_state(Some(Duration::ZERO));
        assert!(result.is_err());
        assert_eq!(current, State::Ready);
        assert_eq!(pending, None);
    }

    #[test]
    fn test_locked_element_ignores_changes() {
        let recorder = Arc::new(Recorder::default());
        let (element, _bus) = element_with_bus(&recorder);
        assert!(!element.set_locked_state(true));
        assert_eq!(element.set_state(State::Ready), Ok(StateChangeSuccess::NoChange));
        assert_eq!(element.current_state(), State::Null);
        assert!(recorder.seen.lock().unwrap().is_empty());
        element.set_locked_state(false);
        assert_eq!(element.set_state(State::Ready), Ok(StateChangeSuccess::Success));
    }

    #[test]
    fn test_async_step_continues_to_target() {
        let recorder = Arc::new(Recorder {
            async_on: Some(StateChange::ReadyToPaused),
            ..Default::default()
        });
        let (element, bus) = element_with_bus(&recorder);

        assert_eq!(element.set_state(State::Playing), Ok(StateChangeSuccess::Async));
        let (result, current, pending) = element.get_state(Some(Duration::from_millis(10)));
        assert_eq!(result, Ok(StateChangeSuccess::Async));
        assert_eq!(current, State::Ready);
        assert_eq!(pending, Some(State::Playing));
        assert!(bus.have_pending(MessageType::AsyncStart.into()));

        let completer = element.clone();
        std::thread::spawn(move || completer.continue_state(Ok(StateChangeSuccess::Success)))
            .join()
            .unwrap()
            .unwrap();

        let (result, current, pending) = element.get_state(Some(Duration::from_secs(1)));
        assert_eq!(result, Ok(StateChangeSuccess::Success));
        assert_eq!(current, State::Playing);
        assert_eq!(pending, None);
        assert!(bus.have_pending(MessageType::AsyncDone.into()));
    }

    #[test]
    fn test_pads_are_unique() {
        use super::super::pad::PadTemplate;
        use crate::caps::Caps;

        let element = Element::new("e", Arc::new(Recorder::default()));
        let pad = Pad::builder(PadTemplate::src(Caps::any())).build();
        element.add_pad(pad.clone()).unwrap();
        assert!(element.add_pad(Pad::builder(PadTemplate::src(Caps::any())).build()).is_err());
        assert_eq!(element.static_pad("src"), Some(pad.clone()));
        assert_eq!(pad.parent(), Some(element.clone()));
        assert_eq!(pad.full_name(), "e:src");
    }
}
