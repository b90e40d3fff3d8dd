//! Base wrapper for one-in, one-out filters.

use super::handle::Element;
use super::pad::{Pad, PadDirection, PadMode, PadTemplate};
use super::state::{StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};
use super::traits::{ElementImpl, Transform};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::event::{Event, EventKind};
use crate::flow::{FlowError, FlowResult};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, trace};

/// Input and output caps.
type Formats = Option<(Caps, Caps)>;

/// Drives a [`Transform`] between a `sink` and a `src` pad.
///
/// Caps queries on either pad are answered by translating what the other
/// side's peer can do with [`Transform::transform_caps`]. A caps event on
/// the sink pad picks the output format with [`Transform::fixate_caps`],
/// hands both to [`Transform::set_caps`] and announces the output
/// downstream. In pull mode ranges are pulled from upstream and passed
/// through the transform.
pub struct BaseTransform<T: Transform> {
    transform: T,
    sinkpad: Pad,
    srcpad: Pad,
    formats: Mutex<Formats>,
}

impl<T: Transform> BaseTransform<T> {
    /// Wrap `transform` in a new element named `name`.
    pub fn new_element(name: impl Into<String>, transform: T) -> Element {
        let sink_template = PadTemplate::sink(transform.sink_caps());
        let src_template = PadTemplate::src(transform.src_caps());
        let imp = Arc::new_cyclic(|weak: &Weak<Self>| {
            let sinkpad = Pad::builder(sink_template)
                .chain_function({
                    let weak = weak.clone();
                    move |_pad, buffer| match weak.upgrade() {
                        Some(trans) => trans.chain(buffer),
                        None => Err(FlowError::Flushing),
                    }
                })
                .event_function({
                    let weak = weak.clone();
                    move |pad, event| weak.upgrade().is_some_and(|trans| trans.sink_event(pad, event))
                })
                .query_caps_function({
                    let weak = weak.clone();
                    move |pad, _filter| match weak.upgrade() {
                        Some(trans) => trans.query_caps(pad),
                        None => pad.template().caps.clone(),
                    }
                })
                .build();
            let srcpad = Pad::builder(src_template)
                .get_range_function({
                    let weak = weak.clone();
                    move |_pad, offset, len| match weak.upgrade() {
                        Some(trans) => trans.get_range(offset, len),
                        None => Err(FlowError::Flushing),
                    }
                })
                .query_caps_function({
                    let weak = weak.clone();
                    move |pad, _filter| match weak.upgrade() {
                        Some(trans) => trans.query_caps(pad),
                        None => pad.template().caps.clone(),
                    }
                })
                .set_caps_function({
                    let weak = weak.clone();
                    move |_pad, caps| weak.upgrade().is_some_and(|trans| trans.set_pull_caps(caps))
                })
                .activate_function({
                    let weak = weak.clone();
                    move |_pad, mode, active| {
                        weak.upgrade().is_some_and(|trans| trans.activate_src(mode, active))
                    }
                })
                .build();
            Self {
                transform,
                sinkpad,
                srcpad,
                formats: Mutex::new(None),
            }
        });
        let pads = [imp.sinkpad.clone(), imp.srcpad.clone()];
        let element = Element::from_impl(name, imp);
        for pad in pads {
            if let Err(err) = element.add_pad(pad) {
                error!(element = %element.name(), error = %err, "cannot add pad");
            }
        }
        element
    }

    fn formats(&self) -> MutexGuard<'_, Formats> {
        self.formats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// What `pad` can carry given what the peer of the other pad can.
    fn query_caps(&self, pad: &Pad) -> Caps {
        let other = match pad.direction() {
            PadDirection::Sink => &self.srcpad,
            PadDirection::Src => &self.sinkpad,
        };
        let peer = other.peer_query_caps(None);
        let translated = self.transform.transform_caps(other.direction(), &peer);
        translated.intersect(&pad.template().caps)
    }

    /// Pick the output format for `incaps`.
    fn compute_outcaps(&self, incaps: &Caps) -> Option<Caps> {
        let othercaps = self.transform.transform_caps(PadDirection::Sink, incaps);
        let othercaps = othercaps.intersect(&self.srcpad.template().caps);
        let candidates = self.srcpad.peer_query_caps(Some(&othercaps));
        if candidates.is_empty() {
            debug!(pad = %self.srcpad.full_name(), %incaps, "no output format downstream accepts");
            return None;
        }
        let outcaps = self.transform.fixate_caps(incaps, candidates);
        if outcaps.is_any() || outcaps.is_fixed() {
            Some(outcaps)
        } else {
            Some(outcaps.fixate()).filter(|caps| caps.is_fixed())
        }
    }

    fn set_incaps(&self, incaps: &Caps) -> bool {
        let Some(outcaps) = self.compute_outcaps(incaps) else {
            return false;
        };
        if !self.transform.set_caps(incaps, &outcaps) {
            debug!(pad = %self.sinkpad.full_name(), %incaps, %outcaps, "formats refused");
            return false;
        }
        *self.formats() = Some((incaps.clone(), outcaps.clone()));
        trace!(pad = %self.srcpad.full_name(), %outcaps, "output format chosen");
        self.srcpad.push_event(Event::caps(outcaps))
    }

    /// Format applied directly to the source pad on a pull link.
    fn set_pull_caps(&self, outcaps: &Caps) -> bool {
        if self.srcpad.mode() != PadMode::Pull {
            return true;
        }
        let incaps = self
            .transform
            .transform_caps(PadDirection::Src, outcaps)
            .intersect(&self.sinkpad.peer_query_caps(None))
            .fixate();
        if !self.transform.set_caps(&incaps, outcaps) {
            return false;
        }
        *self.formats() = Some((incaps, outcaps.clone()));
        true
    }

    fn sink_event(&self, pad: &Pad, event: Event) -> bool {
        if !self.transform.sink_event(&event) {
            trace!(pad = %pad.full_name(), event = event.name(), "event dropped by transform");
            return false;
        }
        match event.kind() {
            EventKind::Caps(caps) => self.set_incaps(caps),
            _ => pad.forward_event(event),
        }
    }

    fn chain(&self, buffer: Buffer) -> FlowResult {
        if self.formats().is_none() {
            return Err(FlowError::NotNegotiated);
        }
        match self.transform.transform(buffer)? {
            Some(out) => self.srcpad.push(out),
            None => Ok(()),
        }
    }

    /// Pull through the transform. A dropped range is skipped and the
    /// following one returned instead.
    fn get_range(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let mut offset = offset;
        loop {
            let buffer = self.sinkpad.pull_range(offset, len)?;
            let consumed = buffer.len() as u64;
            match self.transform.transform(buffer)? {
                Some(out) => return Ok(out),
                None if consumed == 0 => return Err(FlowError::Eos),
                None => offset += consumed,
            }
        }
    }

    fn activate_src(&self, mode: PadMode, active: bool) -> bool {
        match mode {
            PadMode::Pull => self.sinkpad.activate_mode(PadMode::Pull, active),
            _ => true,
        }
    }
}

impl<T: Transform> ElementImpl for BaseTransform<T> {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        let failed = || StateChangeError {
            element: element.name().to_string(),
            transition,
        };
        match transition {
            StateChange::ReadyToPaused => {
                if let Err(err) = self.transform.start() {
                    element.post_error("Could not start transform", Some(err.to_string()));
                    return Err(failed());
                }
                if !element.activate_pads(true) {
                    let _ = self.transform.stop();
                    return Err(failed());
                }
            }
            StateChange::PausedToReady => {
                element.activate_pads(false);
                *self.formats() = None;
                if let Err(err) = self.transform.stop() {
                    element.post_error("Could not stop transform", Some(err.to_string()));
                    return Err(failed());
                }
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }
}
