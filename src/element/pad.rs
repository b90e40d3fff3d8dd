//! Pads: the directional, typed ports of an element.
//!
//! A source pad is linked to at most one sink pad. Buffers travel from source
//! to sink either pushed by the upstream element ([`Pad::push`] into the
//! peer's chain function) or pulled by the downstream element
//! ([`Pad::pull_range`] into the peer's get-range function). Events travel
//! in both directions.
//!
//! Behaviour is supplied as closures when the pad is built:
//!
//! ```rust
//! use sluice::caps::Caps;
//! use sluice::element::{Pad, PadTemplate};
//!
//! let sink = Pad::builder(PadTemplate::sink(Caps::any()))
//!     .chain_function(|_pad, buffer| {
//!         println!("got {} bytes", buffer.len());
//!         Ok(())
//!     })
//!     .build();
//! assert!(sink.peer().is_none());
//! ```

use super::handle::{Element, ElementInner};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::event::{Event, EventKind, Segment};
use crate::flow::{FlowError, FlowResult};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data.
    Src,
    /// Consumes data.
    Sink,
}

impl PadDirection {
    /// The other direction.
    pub fn opposite(self) -> Self {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Whether a pad is always present or created on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Present for the element's whole life.
    Always,
    /// Appears when the stream reveals it (demuxers).
    Sometimes,
    /// Created when the application asks for it.
    Request,
}

/// Describes the pads an element can have and every format they may carry.
#[derive(Debug, Clone)]
pub struct PadTemplate {
    /// Name or name pattern (`src`, `src_%u`).
    pub name: String,
    /// Direction of pads made from this template.
    pub direction: PadDirection,
    /// Presence of pads made from this template.
    pub presence: PadPresence,
    /// Superset of formats pads from this template can carry.
    pub caps: Caps,
}

impl PadTemplate {
    /// Create a template.
    pub fn new(
        name: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Always-present source pad called `src`.
    pub fn src(caps: Caps) -> Self {
        Self::new("src", PadDirection::Src, PadPresence::Always, caps)
    }

    /// Always-present sink pad called `sink`.
    pub fn sink(caps: Caps) -> Self {
        Self::new("sink", PadDirection::Sink, PadPresence::Always, caps)
    }
}

/// How a pad moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Inactive.
    #[default]
    None,
    /// Upstream calls the downstream chain function.
    Push,
    /// Downstream calls the upstream get-range function.
    Pull,
}

/// Observable link state of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadLinkState {
    /// No peer.
    Unlinked,
    /// Linked, no format agreed yet.
    LinkedUnnegotiated,
    /// Linked with a current format.
    LinkedNegotiated,
    /// Active but discarding data.
    Flushing,
}

/// Reason a link attempt was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadLinkError {
    /// Pads are not a source and a sink.
    #[error("pads have wrong direction")]
    WrongDirection,
    /// One of the pads already has a peer.
    #[error("pad already linked")]
    AlreadyLinked,
    /// The pads share no format.
    #[error("pads have no common format")]
    NoFormat,
    /// The pads are not linked to each other.
    #[error("pads are not linked")]
    NotLinked,
    /// The pads' elements cannot be linked directly.
    #[error("pads are in different hierarchies")]
    WrongHierarchy,
}

/// Receives pushed buffers on a sink pad.
pub type ChainFn = Box<dyn Fn(&Pad, Buffer) -> FlowResult + Send + Sync>;
/// Produces a byte range on a source pad.
pub type GetRangeFn = Box<dyn Fn(&Pad, u64, usize) -> FlowResult<Buffer> + Send + Sync>;
/// Handles an event arriving at a pad.
pub type EventFn = Box<dyn Fn(&Pad, Event) -> bool + Send + Sync>;
/// Reports the formats a pad can carry right now.
pub type QueryCapsFn = Box<dyn Fn(&Pad, Option<&Caps>) -> Caps + Send + Sync>;
/// Applies a new format; false refuses it.
pub type SetCapsFn = Box<dyn Fn(&Pad, &Caps) -> bool + Send + Sync>;
/// Starts or stops streaming in a mode.
pub type ActivateFn = Box<dyn Fn(&Pad, PadMode, bool) -> bool + Send + Sync>;

#[derive(Default)]
struct PadFunctions {
    chain: Option<ChainFn>,
    get_range: Option<GetRangeFn>,
    event: Option<EventFn>,
    query_caps: Option<QueryCapsFn>,
    set_caps: Option<SetCapsFn>,
    activate: Option<ActivateFn>,
}

#[derive(Debug)]
struct PadState {
    peer: Option<Weak<PadInner>>,
    mode: PadMode,
    flushing: bool,
    eos: bool,
    caps: Option<Caps>,
    segment: Option<Segment>,
}

pub(crate) struct PadInner {
    name: String,
    direction: PadDirection,
    template: PadTemplate,
    parent: OnceLock<Weak<ElementInner>>,
    state: Mutex<PadState>,
    stream_lock: Mutex<()>,
    functions: PadFunctions,
}

/// Handle to a pad. Clones refer to the same pad.
#[derive(Clone)]
pub struct Pad {
    inner: Arc<PadInner>,
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Pad {}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Pad")
            .field("name", &self.full_name())
            .field("direction", &self.inner.direction)
            .field("mode", &state.mode)
            .field("caps", &state.caps)
            .finish()
    }
}

/// Builder for [`Pad`].
pub struct PadBuilder {
    name: Option<String>,
    template: PadTemplate,
    functions: PadFunctions,
}

impl PadBuilder {
    /// Override the pad name (defaults to the template name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the chain function of a sink pad.
    pub fn chain_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, Buffer) -> FlowResult + Send + Sync + 'static,
    {
        self.functions.chain = Some(Box::new(f));
        self
    }

    /// Set the get-range function of a source pad.
    pub fn get_range_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, u64, usize) -> FlowResult<Buffer> + Send + Sync + 'static,
    {
        self.functions.get_range = Some(Box::new(f));
        self
    }

    /// Set the event function.
    pub fn event_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, Event) -> bool + Send + Sync + 'static,
    {
        self.functions.event = Some(Box::new(f));
        self
    }

    /// Set the caps query function.
    pub fn query_caps_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, Option<&Caps>) -> Caps + Send + Sync + 'static,
    {
        self.functions.query_caps = Some(Box::new(f));
        self
    }

    /// Set the function that applies a new format.
    pub fn set_caps_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, &Caps) -> bool + Send + Sync + 'static,
    {
        self.functions.set_caps = Some(Box::new(f));
        self
    }

    /// Set the activation function.
    pub fn activate_function<F>(mut self, f: F) -> Self
    where
        F: Fn(&Pad, PadMode, bool) -> bool + Send + Sync + 'static,
    {
        self.functions.activate = Some(Box::new(f));
        self
    }

    /// Create the pad.
    pub fn build(self) -> Pad {
        Pad {
            inner: Arc::new(PadInner {
                name: self.name.unwrap_or_else(|| self.template.name.clone()),
                direction: self.template.direction,
                template: self.template,
                parent: OnceLock::new(),
                state: Mutex::new(PadState {
                    peer: None,
                    mode: PadMode::None,
                    flushing: true,
                    eos: false,
                    caps: None,
                    segment: None,
                }),
                stream_lock: Mutex::new(()),
                functions: self.functions,
            }),
        }
    }
}

impl Pad {
    /// Start building a pad from a template.
    pub fn builder(template: PadTemplate) -> PadBuilder {
        PadBuilder {
            name: None,
            template,
            functions: PadFunctions::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, PadState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn from_weak(weak: &Weak<PadInner>) -> Option<Pad> {
        weak.upgrade().map(|inner| Pad { inner })
    }

    /// Pad name, unique within its element.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `element:pad`, for logs.
    pub fn full_name(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}:{}", parent.name(), self.inner.name),
            None => format!("(none):{}", self.inner.name),
        }
    }

    /// Direction.
    pub fn direction(&self) -> PadDirection {
        self.inner.direction
    }

    /// Template this pad was made from.
    pub fn template(&self) -> &PadTemplate {
        &self.inner.template
    }

    /// Owning element, if it is still alive.
    pub fn parent(&self) -> Option<Element> {
        self.inner
            .parent
            .get()
            .and_then(Weak::upgrade)
            .map(Element::from_inner)
    }

    pub(crate) fn set_parent(&self, parent: &Arc<ElementInner>) -> bool {
        self.inner.parent.set(Arc::downgrade(parent)).is_ok()
    }

    /// The linked pad.
    pub fn peer(&self) -> Option<Pad> {
        self.state().peer.as_ref().and_then(Pad::from_weak)
    }

    /// True if the pad has a live peer.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Current activation mode.
    pub fn mode(&self) -> PadMode {
        self.state().mode
    }

    /// True while the pad is active.
    pub fn is_active(&self) -> bool {
        self.mode() != PadMode::None
    }

    /// True while the pad discards data.
    pub fn is_flushing(&self) -> bool {
        self.state().flushing
    }

    /// True once EOS passed through the pad.
    pub fn is_eos(&self) -> bool {
        self.state().eos
    }

    /// Negotiated format.
    pub fn current_caps(&self) -> Option<Caps> {
        self.state().caps.clone()
    }

    /// Last segment seen.
    pub fn segment(&self) -> Option<Segment> {
        self.state().segment.clone()
    }

    /// Derived link state.
    pub fn link_state(&self) -> PadLinkState {
        let state = self.state();
        let linked = state.peer.as_ref().is_some_and(|p| p.strong_count() > 0);
        if !linked {
            PadLinkState::Unlinked
        } else if state.mode != PadMode::None && state.flushing {
            PadLinkState::Flushing
        } else if state.caps.is_some() {
            PadLinkState::LinkedNegotiated
        } else {
            PadLinkState::LinkedUnnegotiated
        }
    }

    /// Lock serializing data and serialized events through this pad.
    ///
    /// Held by chain calls and by streaming tasks for each iteration; taking
    /// it waits for in-flight streaming to finish.
    pub fn stream_lock(&self) -> MutexGuard<'_, ()> {
        self.inner
            .stream_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// True if the pad has a get-range function.
    pub fn supports_pull(&self) -> bool {
        self.inner.functions.get_range.is_some()
    }

    /// Link this source pad to `sink`.
    ///
    /// Fails without touching either pad if the directions are wrong, either
    /// side is already linked, or their formats do not intersect.
    pub fn link(&self, sink: &Pad) -> Result<(), PadLinkError> {
        if self.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            return Err(PadLinkError::WrongDirection);
        }
        self.check_hierarchy(sink)?;
        if self.is_linked() || sink.is_linked() {
            return Err(PadLinkError::AlreadyLinked);
        }

        let src_caps = self.query_caps(None);
        let sink_caps = sink.query_caps(None);
        if !src_caps.can_intersect(&sink_caps) {
            debug!(
                src = %self.full_name(),
                sink = %sink.full_name(),
                %src_caps,
                %sink_caps,
                "link refused, no common format"
            );
            return Err(PadLinkError::NoFormat);
        }

        let mut src_state = self.state();
        let mut sink_state = sink.state();
        let taken = |p: &Option<Weak<PadInner>>| p.as_ref().is_some_and(|w| w.strong_count() > 0);
        if taken(&src_state.peer) || taken(&sink_state.peer) {
            return Err(PadLinkError::AlreadyLinked);
        }
        src_state.peer = Some(Arc::downgrade(&sink.inner));
        sink_state.peer = Some(Arc::downgrade(&self.inner));
        drop(sink_state);
        drop(src_state);

        debug!(src = %self.full_name(), sink = %sink.full_name(), "linked");
        Ok(())
    }

    fn check_hierarchy(&self, sink: &Pad) -> Result<(), PadLinkError> {
        let (Some(a), Some(b)) = (self.parent(), sink.parent()) else {
            return Ok(());
        };
        if a == b {
            return Err(PadLinkError::WrongHierarchy);
        }
        match (a.parent(), b.parent()) {
            (Some(pa), Some(pb)) if pa != pb => Err(PadLinkError::WrongHierarchy),
            _ => Ok(()),
        }
    }

    /// Remove the link to the peer, clearing negotiated caps on both sides.
    ///
    /// Returns false if the pad was not linked.
    pub fn unlink(&self) -> bool {
        let Some(peer) = self.peer() else {
            let mut state = self.state();
            state.peer = None;
            state.caps = None;
            return false;
        };
        let (src, sink) = match self.direction() {
            PadDirection::Src => (self, &peer),
            PadDirection::Sink => (&peer, self),
        };
        let mut src_state = src.state();
        let mut sink_state = sink.state();
        src_state.peer = None;
        src_state.caps = None;
        sink_state.peer = None;
        sink_state.caps = None;
        drop(sink_state);
        drop(src_state);
        debug!(src = %src.full_name(), sink = %sink.full_name(), "unlinked");
        true
    }

    /// Push a buffer to the peer's chain function.
    ///
    /// A buffer whose caps differ from the pad's current caps sends a caps
    /// event first.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        let (peer, new_caps) = {
            let state = self.state();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            let peer = state
                .peer
                .as_ref()
                .and_then(Pad::from_weak)
                .ok_or(FlowError::NotLinked)?;
            let new_caps = match buffer.caps() {
                Some(caps) if state.caps.as_ref() != Some(caps) => Some(caps.clone()),
                _ => None,
            };
            (peer, new_caps)
        };

        if let Some(caps) = new_caps {
            if !self.push_event(Event::caps(caps)) {
                debug!(pad = %self.full_name(), "caps change refused downstream");
                return Err(FlowError::NotNegotiated);
            }
        }

        trace!(pad = %self.full_name(), len = buffer.len(), "push");
        peer.chain(buffer)
    }

    /// Deliver a buffer to this sink pad's chain function.
    pub fn chain(&self, buffer: Buffer) -> FlowResult {
        let _stream = self.stream_lock();
        {
            let state = self.state();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            if state.caps.is_none() {
                debug!(pad = %self.full_name(), "buffer on unnegotiated pad");
                return Err(FlowError::WrongState);
            }
        }
        match &self.inner.functions.chain {
            Some(chain) => chain(self, buffer),
            None => Err(FlowError::NotSupported),
        }
    }

    /// Pull a range from the peer. Only valid on a sink pad in pull mode.
    pub fn pull_range(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let peer = {
            let state = self.state();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.mode != PadMode::Pull {
                return Err(FlowError::WrongState);
            }
            state
                .peer
                .as_ref()
                .and_then(Pad::from_weak)
                .ok_or(FlowError::NotLinked)?
        };
        peer.get_range(offset, len)
    }

    /// Produce a range through this source pad's get-range function.
    pub fn get_range(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let _stream = self.stream_lock();
        {
            let state = self.state();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.mode != PadMode::Pull {
                return Err(FlowError::WrongState);
            }
        }
        match &self.inner.functions.get_range {
            Some(get_range) => get_range(self, offset, len),
            None => Err(FlowError::NotSupported),
        }
    }

    /// Send an event out of this pad to its peer.
    ///
    /// Source pads send downstream events, sink pads upstream ones.
    pub fn push_event(&self, event: Event) -> bool {
        let allowed = match self.direction() {
            PadDirection::Src => event.is_downstream(),
            PadDirection::Sink => event.is_upstream(),
        };
        if !allowed {
            warn!(pad = %self.full_name(), event = event.name(), "event pushed in wrong direction");
            return false;
        }

        let peer = {
            let mut state = self.state();
            match event.kind() {
                EventKind::FlushStart => state.flushing = true,
                EventKind::FlushStop(_) => {
                    if state.mode != PadMode::None {
                        state.flushing = false;
                    }
                    state.eos = false;
                }
                _ if event.is_serialized() && state.flushing => {
                    trace!(pad = %self.full_name(), event = event.name(), "flushing, event dropped");
                    return false;
                }
                _ => {}
            }
            match state.peer.as_ref().and_then(Pad::from_weak) {
                Some(peer) => peer,
                None => {
                    trace!(pad = %self.full_name(), event = event.name(), "not linked, event dropped");
                    return false;
                }
            }
        };

        let accepted = peer.send_event(event.clone());
        if accepted && self.direction() == PadDirection::Src {
            let mut state = self.state();
            match event.kind() {
                EventKind::Caps(caps) => state.caps = Some(caps.clone()),
                EventKind::Segment(segment) => state.segment = Some(segment.clone()),
                EventKind::Eos => state.eos = true,
                _ => {}
            }
        }
        accepted
    }

    /// Deliver an event to this pad.
    ///
    /// Serialized downstream events take the stream lock so they stay in
    /// order with buffers; flush-start does not, so it can interrupt a
    /// blocked chain call.
    pub fn send_event(&self, event: Event) -> bool {
        trace!(pad = %self.full_name(), event = event.name(), "event");
        let in_band = self.direction() == PadDirection::Sink && event.is_downstream();

        match event.kind() {
            EventKind::FlushStart => {
                self.state().flushing = true;
                self.dispatch_event(event)
            }
            EventKind::FlushStop(_) => {
                let _stream = in_band.then(|| self.stream_lock());
                {
                    let mut state = self.state();
                    if state.mode != PadMode::None {
                        state.flushing = false;
                    }
                    state.eos = false;
                    state.segment = None;
                }
                self.dispatch_event(event)
            }
            _ if in_band && event.is_serialized() => {
                let _stream = self.stream_lock();
                {
                    let state = self.state();
                    if state.flushing || state.eos {
                        trace!(pad = %self.full_name(), event = event.name(), "event refused");
                        return false;
                    }
                }
                match event.kind() {
                    EventKind::Caps(caps) => {
                        let caps = caps.clone();
                        if !self.apply_caps(&caps) {
                            return false;
                        }
                        let accepted = self.dispatch_event(event);
                        if accepted {
                            self.state().caps = Some(caps);
                        }
                        accepted
                    }
                    EventKind::Segment(segment) => {
                        self.state().segment = Some(segment.clone());
                        self.dispatch_event(event)
                    }
                    EventKind::Eos => {
                        self.state().eos = true;
                        self.dispatch_event(event)
                    }
                    _ => self.dispatch_event(event),
                }
            }
            _ => self.dispatch_event(event),
        }
    }

    fn dispatch_event(&self, event: Event) -> bool {
        match &self.inner.functions.event {
            Some(f) => f(self, event),
            None => self.forward_event(event),
        }
    }

    /// Push `event` out of every pad of the parent element facing the other
    /// way. True if all of them accepted it, or there were none.
    pub fn forward_event(&self, event: Event) -> bool {
        let Some(parent) = self.parent() else {
            return true;
        };
        let targets = parent.pads_by_direction(self.direction().opposite());
        targets
            .iter()
            .fold(true, |ok, pad| pad.push_event(event.clone()) && ok)
    }

    /// Formats this pad can carry, narrowed by `filter`.
    ///
    /// Without a query function the current caps are reported, or the
    /// template caps when nothing is negotiated.
    pub fn query_caps(&self, filter: Option<&Caps>) -> Caps {
        let caps = match &self.inner.functions.query_caps {
            Some(f) => f(self, filter),
            None => self
                .current_caps()
                .unwrap_or_else(|| self.inner.template.caps.clone()),
        };
        match filter {
            Some(filter) => filter.intersect(&caps),
            None => caps,
        }
    }

    /// Formats the peer can carry, or ANY if unlinked.
    pub fn peer_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.peer() {
            Some(peer) => peer.query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::any),
        }
    }

    /// True if `caps` is compatible with what this pad can carry.
    pub fn accept_caps(&self, caps: &Caps) -> bool {
        self.query_caps(None).can_intersect(caps)
    }

    /// Check and apply `caps` directly, without an event.
    ///
    /// Used when both ends of a pull link agree on a format.
    pub fn set_caps(&self, caps: &Caps) -> bool {
        if !self.apply_caps(caps) {
            return false;
        }
        self.state().caps = Some(caps.clone());
        true
    }

    /// Run the acceptance check and the set-caps function without storing
    /// the caps.
    pub(crate) fn apply_caps(&self, caps: &Caps) -> bool {
        if !self.accept_caps(caps) {
            debug!(pad = %self.full_name(), %caps, "caps not acceptable");
            return false;
        }
        match &self.inner.functions.set_caps {
            Some(f) => f(self, caps),
            None => true,
        }
    }

    /// Activate or deactivate the pad in `mode`.
    ///
    /// Switching modes deactivates the current one first. Deactivation sets
    /// the pad flushing and lets the activate function unblock streaming.
    /// A sink pad in pull mode then deactivates its peer, so a pull blocked
    /// upstream returns, and only after that waits for its stream lock.
    /// Activating a sink pad in pull mode activates its peer as well.
    pub fn activate_mode(&self, mode: PadMode, active: bool) -> bool {
        if mode == PadMode::None {
            return false;
        }
        let current = self.mode();

        if active {
            if current == mode {
                return true;
            }
            if current != PadMode::None && !self.activate_mode(current, false) {
                return false;
            }
            if self.direction() == PadDirection::Sink && mode == PadMode::Pull {
                match self.peer() {
                    Some(peer) if peer.activate_mode(PadMode::Pull, true) => {}
                    _ => {
                        debug!(pad = %self.full_name(), "upstream cannot operate in pull mode");
                        if current != PadMode::None {
                            self.activate_mode(current, true);
                        }
                        return false;
                    }
                }
            }
            {
                let mut state = self.state();
                state.mode = mode;
                state.flushing = false;
                state.eos = false;
            }
            let ok = match &self.inner.functions.activate {
                Some(f) => f(self, mode, true),
                None => true,
            };
            if !ok {
                {
                    let mut state = self.state();
                    state.mode = PadMode::None;
                    state.flushing = true;
                }
                warn!(pad = %self.full_name(), ?mode, "activation failed");
                if self.direction() == PadDirection::Sink && mode == PadMode::Pull {
                    if let Some(peer) = self.peer() {
                        peer.activate_mode(PadMode::Pull, false);
                    }
                }
                if current != PadMode::None {
                    self.activate_mode(current, true);
                }
                return false;
            }
            debug!(pad = %self.full_name(), ?mode, "activated");
            true
        } else {
            if current != mode {
                return true;
            }
            self.state().flushing = true;
            let ok = match &self.inner.functions.activate {
                Some(f) => f(self, mode, false),
                None => true,
            };
            // A pull in flight holds our stream lock while it waits inside
            // upstream; upstream must be unlocked before we can take it.
            if self.direction() == PadDirection::Sink && mode == PadMode::Pull {
                if let Some(peer) = self.peer() {
                    peer.activate_mode(PadMode::Pull, false);
                }
            }
            drop(self.stream_lock());
            {
                let mut state = self.state();
                state.mode = PadMode::None;
                state.caps = None;
                state.eos = false;
                state.segment = None;
            }
            debug!(pad = %self.full_name(), ?mode, "deactivated");
            ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw(format: &str) -> Caps {
        Caps::builder("audio/raw").field("format", format).build()
    }

    fn counting_sink(caps: Caps, count: Arc<AtomicUsize>) -> Pad {
        Pad::builder(PadTemplate::sink(caps))
            .chain_function(move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_link_requires_opposite_directions() {
        let a = Pad::builder(PadTemplate::src(Caps::any())).build();
        let b = Pad::builder(PadTemplate::src(Caps::any())).build();
        assert_eq!(a.link(&b), Err(PadLinkError::WrongDirection));
        assert!(a.peer().is_none());
    }

    #[test]
    fn test_link_without_common_format() {
        let src = Pad::builder(PadTemplate::src(raw("S16"))).build();
        let sink = Pad::builder(PadTemplate::sink(raw("F32"))).build();
        assert_eq!(src.link(&sink), Err(PadLinkError::NoFormat));
        assert!(src.peer().is_none());
        assert!(sink.peer().is_none());
        assert_eq!(src.link_state(), PadLinkState::Unlinked);
    }

    #[test]
    fn test_already_linked() {
        let src = Pad::builder(PadTemplate::src(Caps::any())).build();
        let sink = Pad::builder(PadTemplate::sink(Caps::any())).build();
        let other = Pad::builder(PadTemplate::sink(Caps::any())).build();
        src.link(&sink).unwrap();
        assert_eq!(src.link(&other), Err(PadLinkError::AlreadyLinked));
        assert_eq!(src.peer(), Some(sink.clone()));
        assert!(src.unlink());
        assert!(sink.peer().is_none());
        assert!(!src.unlink());
    }

    #[test]
    fn test_push_state_checks() {
        let count = Arc::new(AtomicUsize::new(0));
        let src = Pad::builder(PadTemplate::src(Caps::any())).build();
        let sink = counting_sink(Caps::any(), count.clone());

        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::Flushing));
        assert!(src.activate_mode(PadMode::Push, true));
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::NotLinked));

        src.link(&sink).unwrap();
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::Flushing));
        assert!(sink.activate_mode(PadMode::Push, true));
        assert_eq!(src.link_state(), PadLinkState::LinkedUnnegotiated);
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::WrongState));

        assert!(src.push_event(Event::caps(raw("S16"))));
        assert_eq!(sink.link_state(), PadLinkState::LinkedNegotiated);
        assert_eq!(src.push(Buffer::with_size(4)), Ok(()));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(src.push_event(Event::eos()));
        assert!(sink.is_eos());
        assert_eq!(src.push(Buffer::with_size(4)), Err(FlowError::Eos));
    }

    #[test]
    fn test_buffer_caps_trigger_caps_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let src = Pad::builder(PadTemplate::src(Caps::any())).build();
        let sink = counting_sink(raw("S16"), count.clone());
        src.link(&sink).unwrap();
        src.activate_mode(PadMode::Push, true);
        sink.activate_mode(PadMode::Push, true);

        let ok = Buffer::with_size(2).with_caps(raw("S16"));
        assert_eq!(src.push(ok), Ok(()));
        assert_eq!(sink.current_caps(), Some(raw("S16")));

        let bad = Buffer::with_size(2).with_caps(raw("F32"));
        assert_eq!(src.push(bad), Err(FlowError::NotNegotiated));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_flush_resets_eos() {
        let src = Pad::builder(PadTemplate::src(Caps::any())).build();
        let sink = counting_sink(Caps::any(), Arc::new(AtomicUsize::new(0)));
        src.link(&sink).unwrap();
        src.activate_mode(PadMode::Push, true);
        sink.activate_mode(PadMode::Push, true);

        assert!(src.push_event(Event::eos()));
        assert!(src.push_event(Event::flush_start()));
        assert_eq!(sink.link_state(), PadLinkState::Flushing);
        assert!(!src.push_event(Event::segment(Segment::new_bytes(0, None))));
        assert!(src.push_event(Event::flush_stop(true)));
        assert!(!sink.is_eos());
        assert!(!sink.is_flushing());
    }

    #[test]
    fn test_pull_range_requires_pull_mode() {
        let src = Pad::builder(PadTemplate::src(Caps::any()))
            .get_range_function(|_, offset, len| {
                Ok(Buffer::from_vec(vec![offset as u8; len]))
            })
            .build();
        let sink = Pad::builder(PadTemplate::sink(Caps::any())).build();
        src.link(&sink).unwrap();

        assert_eq!(sink.pull_range(0, 4).unwrap_err(), FlowError::Flushing);
        assert!(sink.activate_mode(PadMode::Pull, true));
        assert_eq!(src.mode(), PadMode::Pull);
        let buf = sink.pull_range(3, 2).unwrap();
        assert_eq!(buf.as_bytes(), &[3, 3]);

        assert!(sink.activate_mode(PadMode::Pull, false));
        assert_eq!(src.mode(), PadMode::None);
    }

    #[test]
    fn test_query_caps_filter() {
        let template = Caps::builder("video/raw")
            .field("width", 16i64..=1920)
            .build();
        let pad = Pad::builder(PadTemplate::src(template)).build();
        let filter = Caps::builder("video/raw").field("width", 640).build();
        let result = pad.query_caps(Some(&filter));
        assert_eq!(result, filter);
        assert!(pad.accept_caps(&filter));
        assert!(!pad.accept_caps(&raw("S16")));
    }
}
