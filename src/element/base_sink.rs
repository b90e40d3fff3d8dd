//! Base wrapper for data consumers.

use super::handle::Element;
use super::pad::{Pad, PadMode, PadTemplate};
use super::state::{StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};
use super::traits::{ElementImpl, Sink};
use crate::buffer::Buffer;
use crate::event::{Event, EventKind, SeekEvent, SeekType, SegmentFormat};
use crate::flow::{FlowError, FlowResult};
use crate::message::{Message, MessageKind};
use crate::negotiation::negotiate_pull;
use crate::observability::pad_span;
use crate::scheduler::{Task, TaskStep};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use tracing::{debug, error, trace, warn};

/// Settings of a [`BaseSink`].
#[derive(Debug, Clone)]
pub struct BaseSinkConfig {
    /// Drive upstream in pull mode when it can.
    pub prefer_pull: bool,
    /// Bytes requested per pull.
    pub blocksize: usize,
}

impl Default for BaseSinkConfig {
    fn default() -> Self {
        Self {
            prefer_pull: false,
            blocksize: 4096,
        }
    }
}

impl BaseSinkConfig {
    /// Request pull mode.
    pub fn with_prefer_pull(mut self, prefer_pull: bool) -> Self {
        self.prefer_pull = prefer_pull;
        self
    }

    /// Set the pull block size.
    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize;
        self
    }
}

#[derive(Debug, Default)]
struct SinkState {
    playing: bool,
    eos_posted: bool,
}

#[derive(Debug, Default)]
struct PullState {
    task: Option<Task>,
    offset: u64,
}

/// Drives a [`Sink`] through a single `sink` pad.
///
/// Buffers and EOS arriving while the element is PAUSED wait until it
/// plays or the pad starts flushing. Every stream posts exactly one EOS
/// message. With [`BaseSinkConfig::prefer_pull`] and a seekable upstream
/// the sink pulls its data from a task running while PLAYING.
pub struct BaseSink<S: Sink> {
    this: Weak<Self>,
    sink: S,
    config: BaseSinkConfig,
    sinkpad: Pad,
    state: Mutex<SinkState>,
    cond: Condvar,
    pull: Mutex<PullState>,
}

impl<S: Sink> BaseSink<S> {
    /// Wrap `sink` in a new element named `name`.
    pub fn new_element(name: impl Into<String>, sink: S, config: BaseSinkConfig) -> Element {
        let template = PadTemplate::sink(sink.caps());
        let imp = Arc::new_cyclic(|weak: &Weak<Self>| {
            let sinkpad = Pad::builder(template)
                .chain_function({
                    let weak = weak.clone();
                    move |pad, buffer| match weak.upgrade() {
                        Some(sink) => sink.chain(pad, buffer),
                        None => Err(FlowError::Flushing),
                    }
                })
                .event_function({
                    let weak = weak.clone();
                    move |pad, event| weak.upgrade().is_some_and(|sink| sink.sink_event(pad, event))
                })
                .set_caps_function({
                    let weak = weak.clone();
                    move |_pad, caps| weak.upgrade().is_some_and(|sink| sink.sink.set_caps(caps))
                })
                .activate_function({
                    let weak = weak.clone();
                    move |_pad, mode, active| {
                        weak.upgrade().is_some_and(|sink| sink.activate(mode, active))
                    }
                })
                .build();
            Self {
                this: weak.clone(),
                sink,
                config,
                sinkpad,
                state: Mutex::new(SinkState::default()),
                cond: Condvar::new(),
                pull: Mutex::new(PullState::default()),
            }
        });
        let sinkpad = imp.sinkpad.clone();
        let element = Element::from_impl(name, imp);
        if let Err(err) = element.add_pad(sinkpad) {
            error!(element = %element.name(), error = %err, "cannot add sink pad");
        }
        element
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pull(&self) -> MutexGuard<'_, PullState> {
        self.pull.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake(&self) {
        let _state = self.state();
        self.cond.notify_all();
    }

    /// Block until PLAYING. Fails with `Flushing` once the pad flushes.
    fn wait_playing(&self) -> FlowResult {
        let mut state = self.state();
        loop {
            if self.sinkpad.is_flushing() {
                return Err(FlowError::Flushing);
            }
            if state.playing {
                return Ok(());
            }
            trace!(pad = %self.sinkpad.full_name(), "waiting for PLAYING");
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn post_eos(&self) {
        {
            let mut state = self.state();
            if state.eos_posted {
                return;
            }
            state.eos_posted = true;
        }
        if let Some(element) = self.sinkpad.parent() {
            debug!(element = %element.name(), "posting EOS");
            element.post_message(Message::eos(element.name()));
        }
    }

    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.wait_playing()?;
        self.sink.render(&buffer)
    }

    fn sink_event(&self, _pad: &Pad, event: Event) -> bool {
        match event.kind() {
            EventKind::FlushStart => {
                let ok = self.sink.event(&event);
                self.wake();
                ok
            }
            EventKind::FlushStop(_) => {
                self.state().eos_posted = false;
                self.sink.event(&event)
            }
            EventKind::Eos => {
                if self.wait_playing().is_err() {
                    return false;
                }
                let ok = self.sink.event(&event);
                self.post_eos();
                ok
            }
            EventKind::Tag(tags) => {
                if let Some(element) = self.sinkpad.parent() {
                    element.post_message(Message::new(
                        MessageKind::Tag(tags.clone()),
                        Some(element.name()),
                    ));
                }
                self.sink.event(&event)
            }
            _ => self.sink.event(&event),
        }
    }

    fn activate(&self, mode: PadMode, active: bool) -> bool {
        if !active {
            self.wake();
            if mode == PadMode::Pull {
                if let Some(task) = &self.pull().task {
                    task.pause();
                }
            }
        }
        true
    }

    fn make_pull_task(&self, element: &Element) -> Task {
        let weak = self.this.clone();
        Task::new(format!("{}:pull", element.name()), move || match weak.upgrade() {
            Some(sink) => sink.pull_iteration(),
            None => TaskStep::Pause,
        })
    }

    fn pull_iteration(&self) -> TaskStep {
        let pad = &self.sinkpad;
        let _span = pad_span(pad).entered();
        let _stream = pad.stream_lock();
        let offset = self.pull().offset;
        let result = pad
            .pull_range(offset, self.config.blocksize)
            .and_then(|buffer| {
                self.pull().offset = offset + buffer.len() as u64;
                self.sink.render(&buffer)
            });
        match result {
            Ok(()) => TaskStep::Continue,
            Err(FlowError::Eos) => {
                debug!(pad = %pad.full_name(), offset, "pulled to the end");
                self.sink.event(&Event::eos());
                self.post_eos();
                TaskStep::Pause
            }
            Err(FlowError::Flushing) => TaskStep::Pause,
            Err(err) => {
                if let Some(element) = pad.parent() {
                    error!(element = %element.name(), reason = %err, "pull loop stopped");
                    element.post_error("Internal data stream error", Some(err.to_string()));
                }
                TaskStep::Pause
            }
        }
    }

    /// Move the pull position. Only byte seeks are handled.
    fn pull_seek(&self, element: &Element, seek: &SeekEvent) -> bool {
        if seek.format != SegmentFormat::Bytes {
            return false;
        }
        let position = match seek.start_type {
            SeekType::Set => u64::try_from(seek.start).ok(),
            SeekType::End | SeekType::None => None,
        };
        let Some(position) = position else {
            debug!(element = %element.name(), "unsupported pull seek");
            return false;
        };
        let task = self.pull().task.clone();
        if let Some(task) = &task {
            task.pause();
        }
        {
            let _stream = self.sinkpad.stream_lock();
            self.pull().offset = position;
            self.state().eos_posted = false;
        }
        debug!(element = %element.name(), position, "pull position moved");
        if let Some(task) = task {
            if self.state().playing {
                if let Err(err) = task.start(&element.scheduler()) {
                    warn!(element = %element.name(), error = %err, "cannot restart pull task");
                    return false;
                }
            }
        }
        true
    }

    fn activate_pull(&self, element: &Element) -> bool {
        let pad = &self.sinkpad;
        let upstream_pulls = pad.peer().is_some_and(|peer| peer.supports_pull());
        if !self.config.prefer_pull || !upstream_pulls {
            return false;
        }
        if !pad.activate_mode(PadMode::Pull, true) {
            debug!(element = %element.name(), "upstream refused pull mode, pushing instead");
            return false;
        }
        if let Err(err) = negotiate_pull(pad, None) {
            warn!(element = %element.name(), error = %err, "pull negotiation failed");
            pad.activate_mode(PadMode::Pull, false);
            return false;
        }
        let mut pull = self.pull();
        pull.offset = 0;
        if pull.task.is_none() {
            pull.task = Some(self.make_pull_task(element));
        }
        debug!(element = %element.name(), "operating in pull mode");
        true
    }
}

impl<S: Sink> ElementImpl for BaseSink<S> {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        let failed = || StateChangeError {
            element: element.name().to_string(),
            transition,
        };
        match transition {
            StateChange::NullToReady | StateChange::ReadyToNull => {}
            StateChange::ReadyToPaused => {
                if let Err(err) = self.sink.start() {
                    element.post_error("Could not start sink", Some(err.to_string()));
                    return Err(failed());
                }
                {
                    let mut state = self.state();
                    state.playing = false;
                    state.eos_posted = false;
                }
                if !self.activate_pull(element) && !self.sinkpad.activate_mode(PadMode::Push, true) {
                    let _ = self.sink.stop();
                    return Err(failed());
                }
            }
            StateChange::PausedToPlaying => {
                self.state().playing = true;
                self.cond.notify_all();
                if self.sinkpad.mode() == PadMode::Pull {
                    let task = self.pull().task.clone();
                    if let Some(task) = task {
                        if let Err(err) = task.start(&element.scheduler()) {
                            element.post_error("Could not start pull task", Some(err.to_string()));
                            return Err(failed());
                        }
                    }
                }
            }
            StateChange::PlayingToPaused => {
                self.state().playing = false;
                if let Some(task) = &self.pull().task {
                    task.pause();
                }
            }
            StateChange::PausedToReady => {
                let mode = self.sinkpad.mode();
                if mode != PadMode::None {
                    self.sinkpad.activate_mode(mode, false);
                }
                let task = self.pull().task.take();
                if let Some(task) = task {
                    task.join();
                }
                if let Err(err) = self.sink.stop() {
                    element.post_error("Could not stop sink", Some(err.to_string()));
                    return Err(failed());
                }
            }
        }
        Ok(StateChangeSuccess::Success)
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        if let EventKind::Seek(seek) = event.kind() {
            if self.sinkpad.mode() == PadMode::Pull {
                return self.pull_seek(element, seek);
            }
        }
        element.default_send_event(event)
    }
}

impl<S: Sink> Drop for BaseSink<S> {
    fn drop(&mut self) {
        if let Some(task) = self.pull.get_mut().unwrap_or_else(|e| e.into_inner()).task.take() {
            task.stop();
        }
    }
}
