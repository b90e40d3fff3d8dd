//! Containers of elements.

use super::graph::LinkGraph;
use crate::element::{
    Element, ElementImpl, StateChange, StateChangeError, StateChangeResult, StateChangeSuccess,
};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{Message, MessageKind};
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
struct AsyncTracking {
    /// Children whose current step is asynchronous.
    pending: HashSet<String>,
    /// The bin answered `Async` and commits when `pending` drains.
    awaiting: bool,
}

#[derive(Debug, Default)]
struct EosTracking {
    posted: HashSet<String>,
    forwarded: bool,
}

pub(crate) struct BinImpl {
    children: RwLock<Vec<Element>>,
    pending: Mutex<AsyncTracking>,
    eos: Mutex<EosTracking>,
}

impl BinImpl {
    fn new() -> Self {
        Self {
            children: RwLock::new(Vec::new()),
            pending: Mutex::new(AsyncTracking::default()),
            eos: Mutex::new(EosTracking::default()),
        }
    }

    fn children(&self) -> Vec<Element> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn pending(&self) -> MutexGuard<'_, AsyncTracking> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn eos(&self) -> MutexGuard<'_, EosTracking> {
        self.eos.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Children expected to post end-of-stream: the terminal ones that
    /// consume data, and nested bins.
    fn eos_children(&self, bin: &Element) -> Vec<String> {
        let children = self.children();
        let graph = LinkGraph::build(bin, &children);
        graph
            .terminal()
            .into_iter()
            .map(|i| &children[i])
            .filter(|c| c.is_bin() || (c.src_pads().is_empty() && !c.sink_pads().is_empty()))
            .map(|c| c.name().to_string())
            .collect()
    }

    fn child_async_done(&self, bin: &Element, child: &str) {
        let resume = {
            let mut pending = self.pending();
            pending.pending.remove(child);
            trace!(bin = %bin.name(), %child, left = pending.pending.len(), "child async done");
            let resume = pending.awaiting && pending.pending.is_empty();
            if resume {
                pending.awaiting = false;
            }
            resume
        };
        if resume {
            debug!(bin = %bin.name(), "all children committed, completing bin state change");
            let bin = bin.clone();
            // The completion may be posted from a streaming thread that the
            // continued state change has to join.
            let spawned = thread::Builder::new()
                .name(format!("sluice-{}-async", bin.name()))
                .spawn(move || {
                    let _ = bin.continue_state(Ok(StateChangeSuccess::Success));
                });
            if let Err(err) = spawned {
                warn!(error = %err, "cannot spawn async completion thread");
            }
        }
    }

    fn child_eos(&self, bin: &Element, message: Message) -> Option<Message> {
        let Some(src) = message.src().map(str::to_string) else {
            return Some(message);
        };
        let expected = self.eos_children(bin);
        let mut eos = self.eos();
        if eos.forwarded {
            trace!(bin = %bin.name(), %src, "EOS already forwarded");
            return None;
        }
        eos.posted.insert(src);
        let done = expected.iter().all(|name| eos.posted.contains(name));
        if done {
            eos.forwarded = true;
            info!(bin = %bin.name(), "all sinks reached EOS");
            Some(Message::eos(bin.name()))
        } else {
            debug!(bin = %bin.name(), have = eos.posted.len(), want = expected.len(), "waiting for more EOS");
            None
        }
    }
}

impl ElementImpl for BinImpl {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        {
            let mut pending = self.pending();
            pending.pending.clear();
            pending.awaiting = false;
        }
        if matches!(
            transition,
            StateChange::ReadyToPaused | StateChange::PausedToReady
        ) {
            *self.eos() = EosTracking::default();
        }

        let children = self.children();
        let graph = LinkGraph::build(element, &children);
        let mut order = graph.upstream_first();
        if !transition.is_upward() {
            order.reverse();
        }

        let next = transition.next();
        let mut no_preroll = false;
        for child in order.into_iter().map(|i| &children[i]) {
            if child.is_locked_state() {
                trace!(bin = %element.name(), child = %child.name(), "locked, skipped");
                continue;
            }
            match child.set_state(next) {
                Ok(StateChangeSuccess::NoPreroll) => no_preroll = true,
                Ok(_) => {}
                Err(err) => {
                    warn!(bin = %element.name(), child = %child.name(), ?transition, "child failed");
                    debug!(error = %err, "child state change error");
                    return Err(StateChangeError {
                        element: element.name().to_string(),
                        transition,
                    });
                }
            }
        }

        let mut pending = self.pending();
        if pending.pending.is_empty() {
            Ok(if no_preroll {
                StateChangeSuccess::NoPreroll
            } else {
                StateChangeSuccess::Success
            })
        } else {
            debug!(bin = %element.name(), waiting = ?pending.pending, "children still changing state");
            pending.awaiting = true;
            Ok(StateChangeSuccess::Async)
        }
    }

    fn handle_child_message(&self, element: &Element, message: Message) -> Option<Message> {
        match message.kind() {
            MessageKind::AsyncStart => {
                if let Some(src) = message.src() {
                    self.pending().pending.insert(src.to_string());
                }
                None
            }
            MessageKind::AsyncDone => {
                if let Some(src) = message.src() {
                    self.child_async_done(element, src);
                }
                None
            }
            MessageKind::Eos => self.child_eos(element, message),
            _ => Some(message),
        }
    }

    /// Upstream events go to the children that consume data, downstream
    /// events to the ones that produce it.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        let upstream = event.is_upstream() && !event.is_downstream();
        let targets: Vec<Element> = self
            .children()
            .into_iter()
            .filter(|c| {
                if upstream {
                    c.src_pads().is_empty() && (c.is_bin() || !c.sink_pads().is_empty())
                } else {
                    c.sink_pads().is_empty() && (c.is_bin() || !c.src_pads().is_empty())
                }
            })
            .collect();
        debug!(bin = %element.name(), event = event.name(), targets = targets.len(), "routing event");
        targets
            .iter()
            .fold(false, |any, child| child.send_event(event.clone()) || any)
    }

    fn is_bin(&self) -> bool {
        true
    }
}

/// An element that contains other elements.
///
/// State changes on the bin walk its children in data-flow order, sources
/// first on the way up and sinks first on the way down. The bin forwards a
/// single EOS message once every sink inside it has posted one.
///
/// `Bin` dereferences to its [`Element`].
#[derive(Clone)]
pub struct Bin {
    element: Element,
    imp: Arc<BinImpl>,
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl std::fmt::Debug for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bin")
            .field("name", &self.element.name())
            .field("children", &self.imp.children().len())
            .finish()
    }
}

impl Bin {
    /// Create an empty bin.
    pub fn new(name: impl Into<String>) -> Self {
        let imp = Arc::new(BinImpl::new());
        let element = Element::from_impl(name, imp.clone());
        Self { element, imp }
    }

    /// The bin as a plain element, e.g. to add it to another bin.
    pub fn as_element(&self) -> &Element {
        &self.element
    }

    /// Add a child. Names must be unique within the bin.
    pub fn add(&self, child: &Element) -> Result<()> {
        let mut children = self.imp.children.write().unwrap_or_else(|e| e.into_inner());
        if children.iter().any(|c| c.name() == child.name()) {
            return Err(Error::DuplicateName(child.name().to_string()));
        }
        child.set_parent(Some(&self.element))?;
        children.push(child.clone());
        debug!(bin = %self.name(), child = %child.name(), "added");
        Ok(())
    }

    /// Add several children, stopping at the first failure.
    pub fn add_many(&self, children: &[&Element]) -> Result<()> {
        children.iter().try_for_each(|child| self.add(child))
    }

    /// Remove a child and unlink its pads.
    pub fn remove(&self, child: &Element) -> Result<()> {
        {
            let mut children = self.imp.children.write().unwrap_or_else(|e| e.into_inner());
            let Some(pos) = children.iter().position(|c| c == child) else {
                return Err(Error::NoSuchElement(child.name().to_string()));
            };
            children.remove(pos);
        }
        for pad in child.pads() {
            pad.unlink();
        }
        child.set_parent(None)?;
        debug!(bin = %self.name(), child = %child.name(), "removed");
        Ok(())
    }

    /// Direct child called `name`.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        self.imp.children().into_iter().find(|c| c.name() == name)
    }

    /// Snapshot of the children in insertion order.
    pub fn children(&self) -> Vec<Element> {
        self.imp.children()
    }
}
