//! Status notifications posted on a [`Bus`](crate::bus::Bus).
//!
//! Messages are immutable and reference-counted. A message posted with an
//! acknowledgment request keeps its poster blocked until the last handle to
//! it is dropped by the consumer.

use crate::caps::Structure;
use crate::element::State;
use crate::event::TagList;
use std::sync::{Arc, Condvar, Mutex};

/// Discriminant of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Fatal error.
    Error = 1 << 0,
    /// Non-fatal problem.
    Warning = 1 << 1,
    /// End of stream reached.
    Eos = 1 << 2,
    /// An element committed a state.
    StateChanged = 1 << 3,
    /// Stream metadata found.
    Tag = 1 << 4,
    /// A segment started playing.
    SegmentStart = 1 << 5,
    /// A segment finished playing.
    SegmentDone = 1 << 6,
    /// An element began an asynchronous state change.
    AsyncStart = 1 << 7,
    /// An element completed an asynchronous state change.
    AsyncDone = 1 << 8,
    /// Buffering progress.
    Buffering = 1 << 9,
    /// Application-defined.
    Custom = 1 << 10,
}

/// A set of [`MessageType`]s used to filter bus reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageTypeMask(u32);

impl MessageTypeMask {
    /// Matches nothing.
    pub const NONE: Self = Self(0);
    /// Matches every type.
    pub const ANY: Self = Self(u32::MAX);

    /// Mask containing one type.
    pub const fn of(ty: MessageType) -> Self {
        Self(ty as u32)
    }

    /// Add a type.
    pub const fn with(self, ty: MessageType) -> Self {
        Self(self.0 | ty as u32)
    }

    /// True if the type is in the mask.
    pub const fn contains(self, ty: MessageType) -> bool {
        self.0 & ty as u32 != 0
    }
}

impl From<MessageType> for MessageTypeMask {
    fn from(ty: MessageType) -> Self {
        Self::of(ty)
    }
}

impl std::ops::BitOr<MessageType> for MessageType {
    type Output = MessageTypeMask;

    fn bitor(self, rhs: MessageType) -> MessageTypeMask {
        MessageTypeMask::of(self).with(rhs)
    }
}

impl std::ops::BitOr<MessageType> for MessageTypeMask {
    type Output = MessageTypeMask;

    fn bitor(self, rhs: MessageType) -> MessageTypeMask {
        self.with(rhs)
    }
}

/// Payload of a [`Message`].
#[derive(Debug, Clone)]
pub enum MessageKind {
    /// Fatal error with a description and optional debug detail.
    Error {
        /// Human-readable description.
        description: String,
        /// Extra detail for developers.
        debug: Option<String>,
    },
    /// Non-fatal problem.
    Warning {
        /// Human-readable description.
        description: String,
        /// Extra detail for developers.
        debug: Option<String>,
    },
    /// End of stream.
    Eos,
    /// A state was committed.
    StateChanged {
        /// State before the step.
        old: State,
        /// State after the step.
        new: State,
        /// Final target, if more steps follow.
        pending: Option<State>,
    },
    /// Stream metadata.
    Tag(TagList),
    /// Segment playback started at a position.
    SegmentStart(u64),
    /// Segment playback finished at a position.
    SegmentDone(u64),
    /// An asynchronous state change began.
    AsyncStart,
    /// An asynchronous state change completed.
    AsyncDone,
    /// Buffering progress in percent.
    Buffering(u8),
    /// Application-defined.
    Custom(Structure),
}

/// Signalled when an acknowledged message is released.
#[derive(Debug, Default)]
pub(crate) struct DeliveryAck {
    done: Mutex<bool>,
    cond: Condvar,
}

impl DeliveryAck {
    fn signal(&self) {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = self.cond.wait(done).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[derive(Debug, Default)]
struct AckOnDrop(Option<Arc<DeliveryAck>>);

impl Drop for AckOnDrop {
    fn drop(&mut self) {
        if let Some(ack) = self.0.take() {
            ack.signal();
        }
    }
}

#[derive(Debug)]
struct MessageData {
    kind: MessageKind,
    src: Option<String>,
    ack: AckOnDrop,
}

/// An immutable, reference-counted notification.
#[derive(Debug, Clone)]
pub struct Message(Arc<MessageData>);

impl Message {
    /// Create a message from `src`.
    pub fn new(kind: MessageKind, src: Option<&str>) -> Self {
        Self(Arc::new(MessageData {
            kind,
            src: src.map(str::to_string),
            ack: AckOnDrop::default(),
        }))
    }

    /// Error message.
    pub fn error(src: &str, description: impl Into<String>, debug: Option<String>) -> Self {
        Self::new(
            MessageKind::Error {
                description: description.into(),
                debug,
            },
            Some(src),
        )
    }

    /// Warning message.
    pub fn warning(src: &str, description: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Warning {
                description: description.into(),
                debug: None,
            },
            Some(src),
        )
    }

    /// End-of-stream message.
    pub fn eos(src: &str) -> Self {
        Self::new(MessageKind::Eos, Some(src))
    }

    /// State-changed message.
    pub fn state_changed(src: &str, old: State, new: State, pending: Option<State>) -> Self {
        Self::new(MessageKind::StateChanged { old, new, pending }, Some(src))
    }

    /// The payload.
    pub fn kind(&self) -> &MessageKind {
        &self.0.kind
    }

    /// The discriminant.
    pub fn message_type(&self) -> MessageType {
        match &self.0.kind {
            MessageKind::Error { .. } => MessageType::Error,
            MessageKind::Warning { .. } => MessageType::Warning,
            MessageKind::Eos => MessageType::Eos,
            MessageKind::StateChanged { .. } => MessageType::StateChanged,
            MessageKind::Tag(_) => MessageType::Tag,
            MessageKind::SegmentStart(_) => MessageType::SegmentStart,
            MessageKind::SegmentDone(_) => MessageType::SegmentDone,
            MessageKind::AsyncStart => MessageType::AsyncStart,
            MessageKind::AsyncDone => MessageType::AsyncDone,
            MessageKind::Buffering(_) => MessageType::Buffering,
            MessageKind::Custom(_) => MessageType::Custom,
        }
    }

    /// Name of the element that posted the message.
    pub fn src(&self) -> Option<&str> {
        self.0.src.as_deref()
    }

    /// A copy of this message from another source, used when a container
    /// re-posts a child's message under its own name.
    pub fn with_src(&self, src: &str) -> Message {
        Message::new(self.0.kind.clone(), Some(src))
    }

    /// A copy that signals the returned handle once every clone is dropped.
    pub(crate) fn into_acknowledged(self) -> (Message, Arc<DeliveryAck>) {
        let ack = Arc::new(DeliveryAck::default());
        let msg = Message(Arc::new(MessageData {
            kind: self.0.kind.clone(),
            src: self.0.src.clone(),
            ack: AckOnDrop(Some(Arc::clone(&ack))),
        }));
        (msg, ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_mask_membership() {
        let mask = MessageType::Error | MessageType::Eos;
        assert!(mask.contains(MessageType::Eos));
        assert!(!mask.contains(MessageType::Tag));
        assert!(MessageTypeMask::ANY.contains(MessageType::Custom));
        assert!(!MessageTypeMask::NONE.contains(MessageType::Error));
    }

    #[test]
    fn test_type_and_source() {
        let msg = Message::state_changed("sink", State::Ready, State::Paused, Some(State::Playing));
        assert_eq!(msg.message_type(), MessageType::StateChanged);
        assert_eq!(msg.src(), Some("sink"));
        assert_eq!(msg.with_src("bin").src(), Some("bin"));
    }

    #[test]
    fn test_ack_fires_when_last_clone_drops() {
        let (msg, ack) = Message::eos("src").into_acknowledged();
        let extra = msg.clone();
        let waiter = thread::spawn(move || ack.wait());

        drop(msg);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(extra);
        waiter.join().unwrap();
    }
}
