//! Control events flowing alongside buffers.
//!
//! Events travel either with the data (downstream) or against it (upstream).
//! Downstream serialized events such as EOS, segment, tag and caps are
//! delivered in order with buffers; upstream events such as seek and QoS are
//! out-of-band requests.
//!
//! # Example
//!
//! ```rust
//! use sluice::event::{Event, EventType, Segment};
//!
//! let seg = Event::segment(Segment::new_bytes(0, None));
//! assert!(seg.is_downstream());
//! assert!(seg.is_serialized());
//!
//! let flush = Event::flush_start();
//! assert_eq!(flush.event_type(), EventType::FlushStart);
//! assert!(flush.is_upstream() && flush.is_downstream());
//! assert!(!flush.is_serialized());
//! ```

mod tags;

pub use tags::{TagList, TagMergeMode, TagValue, tag_names};

use crate::buffer::Buffer;
use crate::caps::{Caps, Structure};
use crate::clock::ClockTime;
use std::sync::Arc;

/// Which way an event may travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDirection {
    /// Against the data flow.
    Upstream,
    /// With the data flow.
    Downstream,
    /// Either way.
    Both,
}

/// Discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Start discarding data.
    FlushStart,
    /// Stop discarding data.
    FlushStop,
    /// End of stream.
    Eos,
    /// New playback segment.
    Segment,
    /// Stream metadata.
    Tag,
    /// Format (re)negotiation.
    Caps,
    /// Seek request.
    Seek,
    /// Quality-of-service feedback.
    Qos,
    /// User input from a sink (pointer, key).
    Navigation,
    /// Application-defined.
    Custom,
}

/// Payload of an [`Event`].
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Start discarding data; unblocks waiting calls.
    FlushStart,
    /// Resume after a flush.
    FlushStop(FlushStopEvent),
    /// No more data follows.
    Eos,
    /// New playback segment.
    Segment(Segment),
    /// Stream metadata.
    Tag(TagList),
    /// New format for the following buffers.
    Caps(Caps),
    /// Seek request.
    Seek(SeekEvent),
    /// Quality-of-service feedback.
    Qos(QosEvent),
    /// Navigation input.
    Navigation(Structure),
    /// Application-defined.
    Custom(CustomEvent),
}

/// An immutable, reference-counted control token.
#[derive(Debug, Clone)]
pub struct Event(Arc<EventKind>);

impl Event {
    /// Wrap a payload.
    pub fn new(kind: EventKind) -> Self {
        Self(Arc::new(kind))
    }

    /// Flush start.
    pub fn flush_start() -> Self {
        Self::new(EventKind::FlushStart)
    }

    /// Flush stop.
    pub fn flush_stop(reset_time: bool) -> Self {
        Self::new(EventKind::FlushStop(FlushStopEvent { reset_time }))
    }

    /// End of stream.
    pub fn eos() -> Self {
        Self::new(EventKind::Eos)
    }

    /// New segment.
    pub fn segment(segment: Segment) -> Self {
        Self::new(EventKind::Segment(segment))
    }

    /// Stream tags.
    pub fn tag(tags: TagList) -> Self {
        Self::new(EventKind::Tag(tags))
    }

    /// New caps.
    pub fn caps(caps: Caps) -> Self {
        Self::new(EventKind::Caps(caps))
    }

    /// Seek request.
    pub fn seek(seek: SeekEvent) -> Self {
        Self::new(EventKind::Seek(seek))
    }

    /// QoS feedback.
    pub fn qos(qos: QosEvent) -> Self {
        Self::new(EventKind::Qos(qos))
    }

    /// Navigation input.
    pub fn navigation(data: Structure) -> Self {
        Self::new(EventKind::Navigation(data))
    }

    /// Custom event.
    pub fn custom(custom: CustomEvent) -> Self {
        Self::new(EventKind::Custom(custom))
    }

    /// The payload.
    pub fn kind(&self) -> &EventKind {
        &self.0
    }

    /// The discriminant.
    pub fn event_type(&self) -> EventType {
        match &*self.0 {
            EventKind::FlushStart => EventType::FlushStart,
            EventKind::FlushStop(_) => EventType::FlushStop,
            EventKind::Eos => EventType::Eos,
            EventKind::Segment(_) => EventType::Segment,
            EventKind::Tag(_) => EventType::Tag,
            EventKind::Caps(_) => EventType::Caps,
            EventKind::Seek(_) => EventType::Seek,
            EventKind::Qos(_) => EventType::Qos,
            EventKind::Navigation(_) => EventType::Navigation,
            EventKind::Custom(_) => EventType::Custom,
        }
    }

    /// Allowed direction of travel.
    pub fn direction(&self) -> EventDirection {
        match &*self.0 {
            EventKind::FlushStart | EventKind::FlushStop(_) => EventDirection::Both,
            EventKind::Eos | EventKind::Segment(_) | EventKind::Tag(_) | EventKind::Caps(_) => {
                EventDirection::Downstream
            }
            EventKind::Seek(_) | EventKind::Qos(_) | EventKind::Navigation(_) => {
                EventDirection::Upstream
            }
            EventKind::Custom(c) => c.direction,
        }
    }

    /// True if the event may travel upstream.
    pub fn is_upstream(&self) -> bool {
        matches!(self.direction(), EventDirection::Upstream | EventDirection::Both)
    }

    /// True if the event may travel downstream.
    pub fn is_downstream(&self) -> bool {
        matches!(self.direction(), EventDirection::Downstream | EventDirection::Both)
    }

    /// True if the event keeps its position relative to buffers.
    pub fn is_serialized(&self) -> bool {
        match &*self.0 {
            EventKind::Eos | EventKind::Segment(_) | EventKind::Tag(_) | EventKind::Caps(_) => {
                true
            }
            EventKind::Custom(c) => c.serialized,
            _ => false,
        }
    }

    /// Short human-readable name.
    pub fn name(&self) -> &str {
        match &*self.0 {
            EventKind::FlushStart => "flush-start",
            EventKind::FlushStop(_) => "flush-stop",
            EventKind::Eos => "eos",
            EventKind::Segment(_) => "segment",
            EventKind::Tag(_) => "tag",
            EventKind::Caps(_) => "caps",
            EventKind::Seek(_) => "seek",
            EventKind::Qos(_) => "qos",
            EventKind::Navigation(_) => "navigation",
            EventKind::Custom(c) => &c.name,
        }
    }

    /// True if both handles refer to the same event.
    pub fn ptr_eq(a: &Event, b: &Event) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

/// Payload of a flush-stop event.
#[derive(Debug, Clone, Copy)]
pub struct FlushStopEvent {
    /// Restart running time at zero.
    pub reset_time: bool,
}

/// Units of segment and seek positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SegmentFormat {
    /// Nanoseconds.
    #[default]
    Time,
    /// Bytes.
    Bytes,
}

/// A contiguous region of the stream about to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position units.
    pub format: SegmentFormat,
    /// Playback rate (1.0 is normal speed).
    pub rate: f64,
    /// First position of the segment.
    pub start: u64,
    /// Last position, if bounded.
    pub stop: Option<u64>,
    /// Current position.
    pub position: u64,
}

impl Segment {
    /// Time segment starting at `start`.
    pub fn new_time(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self {
            format: SegmentFormat::Time,
            rate: 1.0,
            start: start.nanos(),
            stop: stop.map(ClockTime::nanos),
            position: start.nanos(),
        }
    }

    /// Byte segment starting at `start`.
    pub fn new_bytes(start: u64, stop: Option<u64>) -> Self {
        Self {
            format: SegmentFormat::Bytes,
            rate: 1.0,
            start,
            stop,
            position: start,
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new_time(ClockTime::ZERO, None)
    }
}

/// Flags of a seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeekFlags(u32);

impl SeekFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Flush the pipeline before seeking.
    pub const FLUSH: Self = Self(1 << 0);
    /// Seek to the exact position.
    pub const ACCURATE: Self = Self(1 << 1);
    /// Seek to the nearest sync point.
    pub const KEY_UNIT: Self = Self(1 << 2);

    /// True if all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Bitwise union.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// How a seek position is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeekType {
    /// Leave unchanged.
    #[default]
    None,
    /// Absolute position.
    Set,
    /// Relative to the end of the stream.
    End,
}

/// Request to continue playback from another position.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    /// Playback rate.
    pub rate: f64,
    /// Units of `start` and `stop`.
    pub format: SegmentFormat,
    /// Seek flags.
    pub flags: SeekFlags,
    /// Interpretation of `start`.
    pub start_type: SeekType,
    /// New start position.
    pub start: i64,
    /// Interpretation of `stop`.
    pub stop_type: SeekType,
    /// New stop position.
    pub stop: i64,
}

impl SeekEvent {
    /// Flushing byte seek to an absolute offset.
    pub fn new_bytes(offset: u64) -> Self {
        Self {
            rate: 1.0,
            format: SegmentFormat::Bytes,
            flags: SeekFlags::FLUSH,
            start_type: SeekType::Set,
            start: i64::try_from(offset).unwrap_or(i64::MAX),
            stop_type: SeekType::None,
            stop: -1,
        }
    }

    /// Flushing time seek to an absolute position.
    pub fn new_time(position: ClockTime) -> Self {
        Self {
            format: SegmentFormat::Time,
            flags: SeekFlags::FLUSH.union(SeekFlags::KEY_UNIT),
            ..Self::new_bytes(position.nanos())
        }
    }

    /// Replace the flags.
    pub fn with_flags(mut self, flags: SeekFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Kind of QoS report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosType {
    /// Downstream is starving.
    Underflow,
    /// Downstream cannot keep up.
    Overflow,
    /// Upstream should limit its rate.
    Throttle,
}

/// Processing-performance feedback sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct QosEvent {
    /// Report kind.
    pub qos_type: QosType,
    /// Long-term processing rate relative to real time.
    pub proportion: f64,
    /// Lateness of the reported buffer in nanoseconds (negative is early).
    pub diff: i64,
    /// Timestamp of the reported buffer.
    pub timestamp: ClockTime,
}

/// Application-defined event.
#[derive(Debug, Clone)]
pub struct CustomEvent {
    /// Event name.
    pub name: String,
    /// Allowed direction.
    pub direction: EventDirection,
    /// Whether it keeps its place among buffers.
    pub serialized: bool,
    /// Payload.
    pub data: Structure,
}

impl CustomEvent {
    /// Serialized downstream event carrying `data`.
    pub fn downstream(data: Structure) -> Self {
        Self {
            name: data.name().to_string(),
            direction: EventDirection::Downstream,
            serialized: true,
            data,
        }
    }

    /// Out-of-band upstream event carrying `data`.
    pub fn upstream(data: Structure) -> Self {
        Self {
            name: data.name().to_string(),
            direction: EventDirection::Upstream,
            serialized: false,
            data,
        }
    }
}

/// A buffer or a serialized event, in stream order.
#[derive(Debug, Clone)]
pub enum PipelineItem {
    /// Data.
    Buffer(Buffer),
    /// Control.
    Event(Event),
}

impl PipelineItem {
    /// True for buffers.
    pub fn is_buffer(&self) -> bool {
        matches!(self, PipelineItem::Buffer(_))
    }

    /// Payload size in bytes (zero for events).
    pub fn size(&self) -> usize {
        match self {
            PipelineItem::Buffer(b) => b.len(),
            PipelineItem::Event(_) => 0,
        }
    }
}

impl From<Buffer> for PipelineItem {
    fn from(buffer: Buffer) -> Self {
        PipelineItem::Buffer(buffer)
    }
}

impl From<Event> for PipelineItem {
    fn from(event: Event) -> Self {
        PipelineItem::Event(event)
    }
}
