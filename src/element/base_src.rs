//! Base wrapper for data producers.

use super::handle::Element;
use super::pad::{Pad, PadMode, PadTemplate};
use super::state::{State, StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};
use super::traits::{ElementImpl, Source};
use crate::buffer::Buffer;
use crate::clock::ClockTime;
use crate::event::{Event, EventKind, SeekEvent, SeekFlags, SeekType, Segment, SegmentFormat};
use crate::flow::{FlowError, FlowResult};
use crate::negotiation::negotiate_src_pad;
use crate::observability::{log_flow_error, pad_span};
use crate::scheduler::{Task, TaskStep};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

/// Settings of a [`BaseSrc`].
#[derive(Debug, Clone)]
pub struct BaseSrcConfig {
    /// Bytes requested from `create` per push-mode iteration.
    pub blocksize: usize,
    /// Stamp buffers without a pts with the time elapsed since PLAYING.
    pub do_timestamp: bool,
}

impl Default for BaseSrcConfig {
    fn default() -> Self {
        Self {
            blocksize: 4096,
            do_timestamp: false,
        }
    }
}

impl BaseSrcConfig {
    /// Set the push-mode block size.
    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.blocksize = blocksize;
        self
    }

    /// Enable or disable timestamping.
    pub fn with_do_timestamp(mut self, do_timestamp: bool) -> Self {
        self.do_timestamp = do_timestamp;
        self
    }
}

#[derive(Debug)]
struct StreamState {
    /// Byte offset of the next push-mode `create`.
    offset: u64,
    need_segment: bool,
    sequence: u64,
    playing_since: Option<Instant>,
}

/// Drives a [`Source`] through a single `src` pad.
///
/// In push mode a streaming task started at PAUSED to PLAYING negotiates
/// the link, sends a byte segment and then loops over
/// [`Source::create`]. A seekable source can instead be driven in pull mode
/// by a downstream element calling get-range on the pad.
pub struct BaseSrc<S: Source> {
    this: Weak<Self>,
    source: S,
    config: BaseSrcConfig,
    srcpad: Pad,
    task: Mutex<Option<Task>>,
    stream: Mutex<StreamState>,
    create_lock: Mutex<()>,
}

impl<S: Source> BaseSrc<S> {
    /// Wrap `source` in a new element named `name`.
    pub fn new_element(name: impl Into<String>, source: S, config: BaseSrcConfig) -> Element {
        let template = PadTemplate::src(source.caps());
        let imp = Arc::new_cyclic(|weak: &Weak<Self>| {
            let srcpad = Pad::builder(template)
                .get_range_function({
                    let weak = weak.clone();
                    move |_pad, offset, len| match weak.upgrade() {
                        Some(src) => src.get_range(offset, len),
                        None => Err(FlowError::Flushing),
                    }
                })
                .event_function({
                    let weak = weak.clone();
                    move |pad, event| weak.upgrade().is_some_and(|src| src.src_event(pad, event))
                })
                .set_caps_function({
                    let weak = weak.clone();
                    move |_pad, caps| weak.upgrade().is_some_and(|src| src.source.set_caps(caps))
                })
                .activate_function({
                    let weak = weak.clone();
                    move |_pad, mode, active| {
                        weak.upgrade().is_some_and(|src| src.activate(mode, active))
                    }
                })
                .build();
            Self {
                this: weak.clone(),
                source,
                config,
                srcpad,
                task: Mutex::new(None),
                stream: Mutex::new(StreamState {
                    offset: 0,
                    need_segment: true,
                    sequence: 0,
                    playing_since: None,
                }),
                create_lock: Mutex::new(()),
            }
        });
        let srcpad = imp.srcpad.clone();
        let element = Element::from_impl(name, imp);
        if let Err(err) = element.add_pad(srcpad) {
            error!(element = %element.name(), error = %err, "cannot add source pad");
        }
        element
    }

    fn stream(&self) -> MutexGuard<'_, StreamState> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn task(&self) -> Option<Task> {
        self.task.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn make_task(&self, element: &Element) -> Task {
        let weak = self.this.clone();
        Task::new(format!("{}:src", element.name()), move || match weak.upgrade() {
            Some(src) => src.loop_iteration(),
            None => TaskStep::Pause,
        })
    }

    fn activate(&self, mode: PadMode, active: bool) -> bool {
        match (mode, active) {
            (PadMode::Pull, true) if !self.source.is_seekable() => {
                debug!("source is not seekable, pull mode refused");
                false
            }
            (_, true) => {
                self.source.unlock_stop();
                let mut stream = self.stream();
                stream.offset = 0;
                stream.need_segment = true;
                stream.sequence = 0;
                true
            }
            (_, false) => {
                self.source.unlock();
                if let Some(task) = self.task() {
                    task.pause();
                }
                true
            }
        }
    }

    fn get_range(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let _create = self.create_lock.lock().unwrap_or_else(|e| e.into_inner());
        let len = match self.source.size() {
            Some(size) if offset >= size => {
                trace!(offset, size, "range starts at or past the end");
                return Err(FlowError::Eos);
            }
            Some(size) => len.min(usize::try_from(size - offset).unwrap_or(usize::MAX)),
            None => len,
        };
        self.source.create(offset, len)
    }

    fn src_event(&self, _pad: &Pad, event: Event) -> bool {
        match event.kind() {
            EventKind::Seek(seek) => {
                let seek = seek.clone();
                self.do_seek(&seek)
            }
            EventKind::FlushStart => {
                self.source.unlock();
                self.source.event(&event)
            }
            EventKind::FlushStop(_) => {
                self.source.unlock_stop();
                self.source.event(&event)
            }
            _ => self.source.event(&event),
        }
    }

    fn seek_position(&self, seek: &SeekEvent) -> Option<u64> {
        match seek.start_type {
            SeekType::Set => u64::try_from(seek.start).ok(),
            SeekType::End => self.source.size()?.checked_add_signed(seek.start),
            SeekType::None => Some(self.stream().offset),
        }
    }

    /// Restart push-mode streaming at a new byte offset.
    fn do_seek(&self, seek: &SeekEvent) -> bool {
        let pad = &self.srcpad;
        if seek.format != SegmentFormat::Bytes || !self.source.is_seekable() {
            debug!(pad = %pad.full_name(), "seek not handled");
            return false;
        }
        if pad.mode() != PadMode::Push {
            debug!(pad = %pad.full_name(), "seek on a pad not in push mode");
            return false;
        }
        let Some(position) = self.seek_position(seek) else {
            debug!(pad = %pad.full_name(), start = seek.start, "seek position out of range");
            return false;
        };
        let flush = seek.flags.contains(SeekFlags::FLUSH);
        let task = self.task();

        if flush {
            pad.push_event(Event::flush_start());
            self.source.unlock();
        }
        if let Some(task) = &task {
            task.pause();
        }
        {
            let _stream = pad.stream_lock();
            if flush {
                self.source.unlock_stop();
                pad.push_event(Event::flush_stop(true));
            }
            let mut stream = self.stream();
            stream.offset = position;
            stream.need_segment = true;
        }
        debug!(pad = %pad.full_name(), position, flush, "seek done");

        let parent = pad.parent();
        if let (Some(task), Some(element)) = (task, parent) {
            if element.current_state() == State::Playing {
                if let Err(err) = task.start(&element.scheduler()) {
                    warn!(element = %element.name(), error = %err, "cannot restart after seek");
                    return false;
                }
            }
        }
        true
    }

    fn fail(&self, reason: FlowError, detail: String) {
        let pad = &self.srcpad;
        if let Some(element) = pad.parent() {
            error!(element = %element.name(), %reason, %detail, "streaming stopped");
            element.post_error("Internal data stream error", Some(format!("{reason}: {detail}")));
        }
        pad.push_event(Event::eos());
    }

    fn handle_flow(&self, result: FlowResult) -> TaskStep {
        match result {
            Ok(()) => TaskStep::Continue,
            Err(FlowError::Eos) => {
                debug!(pad = %self.srcpad.full_name(), "end of stream");
                self.srcpad.push_event(Event::eos());
                TaskStep::Pause
            }
            Err(FlowError::Flushing) => {
                trace!(pad = %self.srcpad.full_name(), "flushing, pausing");
                TaskStep::Pause
            }
            Err(err) if err.is_fatal() => {
                self.fail(err, "push failed".to_string());
                TaskStep::Pause
            }
            Err(err) => {
                if let Some(element) = self.srcpad.parent() {
                    log_flow_error(element.name(), err);
                }
                TaskStep::Pause
            }
        }
    }

    fn loop_iteration(&self) -> TaskStep {
        let pad = &self.srcpad;
        let _span = pad_span(pad).entered();
        let _stream = pad.stream_lock();
        if pad.is_flushing() {
            return TaskStep::Pause;
        }

        if pad.current_caps().is_none() {
            let fixate = |caps| self.source.fixate(caps);
            if let Err(err) = negotiate_src_pad(pad, Some(&fixate)) {
                self.fail(FlowError::NotNegotiated, err.to_string());
                return TaskStep::Pause;
            }
        }

        let (offset, need_segment) = {
            let mut stream = self.stream();
            (stream.offset, std::mem::take(&mut stream.need_segment))
        };
        if need_segment {
            let segment = Segment::new_bytes(offset, self.source.size());
            if !pad.push_event(Event::segment(segment)) {
                return self.handle_flow(Err(if pad.is_flushing() {
                    FlowError::Flushing
                } else {
                    FlowError::NotLinked
                }));
            }
        }

        let created = {
            let _create = self.create_lock.lock().unwrap_or_else(|e| e.into_inner());
            self.source.create(offset, self.config.blocksize)
        };
        let mut buffer = match created {
            Ok(buffer) => buffer,
            Err(err) => return self.handle_flow(Err(err)),
        };

        {
            let mut stream = self.stream();
            let len = buffer.len() as u64;
            stream.offset = offset + len;
            stream.sequence += 1;
            let sequence = stream.sequence;
            let stamp = self
                .config
                .do_timestamp
                .then(|| stream.playing_since.map(|since| since.elapsed()))
                .flatten();
            drop(stream);

            let meta = buffer.metadata_mut();
            if meta.offset.is_none() {
                meta.offset = Some(offset);
                meta.offset_end = Some(offset + len);
            }
            if meta.sequence == 0 {
                meta.sequence = sequence;
            }
            if let Some(elapsed) = stamp {
                if meta.pts.is_none() {
                    meta.pts = ClockTime::from_nanos(
                        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX - 1),
                    );
                }
            }
        }

        self.handle_flow(pad.push(buffer))
    }
}

impl<S: Source> ElementImpl for BaseSrc<S> {
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        let failed = || StateChangeError {
            element: element.name().to_string(),
            transition,
        };
        match transition {
            StateChange::NullToReady | StateChange::ReadyToNull => {}
            StateChange::ReadyToPaused => {
                if let Err(err) = self.source.start() {
                    element.post_error("Could not start source", Some(err.to_string()));
                    return Err(failed());
                }
                self.task
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get_or_insert_with(|| self.make_task(element));
                if !self.srcpad.activate_mode(PadMode::Push, true) {
                    let _ = self.source.stop();
                    return Err(failed());
                }
            }
            StateChange::PausedToPlaying => {
                self.stream().playing_since = Some(Instant::now());
                if self.srcpad.mode() == PadMode::Push {
                    if let Some(task) = self.task() {
                        if let Err(err) = task.start(&element.scheduler()) {
                            element.post_error("Could not start streaming task", Some(err.to_string()));
                            return Err(failed());
                        }
                    }
                }
            }
            StateChange::PlayingToPaused => {}
            StateChange::PausedToReady => {
                let mode = self.srcpad.mode();
                if mode != PadMode::None {
                    self.srcpad.activate_mode(mode, false);
                }
                if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    task.join();
                }
                if let Err(err) = self.source.stop() {
                    element.post_error("Could not stop source", Some(err.to_string()));
                    return Err(failed());
                }
            }
        }
        Ok(StateChangeSuccess::Success)
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        match event.kind() {
            EventKind::Seek(seek) => self.do_seek(seek),
            _ => element.default_send_event(event),
        }
    }
}

impl<S: Source> Drop for BaseSrc<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            task.stop();
        }
    }
}
