//! Behaviour traits implemented by elements.
//!
//! [`ElementImpl`] is the low-level contract every element satisfies. Most
//! elements do not implement it directly; they implement one of the role
//! traits ([`Source`], [`Sink`], [`Transform`]) and are wrapped by
//! [`BaseSrc`](super::BaseSrc), [`BaseSink`](super::BaseSink) or
//! [`BaseTransform`](super::BaseTransform), which supply pads, activation,
//! negotiation and streaming threads.
//!
//! Callbacks take `&self` because streaming threads and the application
//! thread call into the same element; implementations keep mutable state
//! behind their own locks.

use super::handle::Element;
use super::pad::PadDirection;
use super::state::{StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::Result;
use crate::event::Event;
use crate::flow::FlowResult;
use crate::message::Message;

/// Core element behaviour.
pub trait ElementImpl: Send + Sync + 'static {
    /// Perform one adjacent state transition.
    ///
    /// The default activates the pads in push mode on READY to PAUSED and
    /// deactivates them on PAUSED to READY.
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
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    /// Inspect a message posted by a child. `Some` forwards it upward.
    fn handle_child_message(&self, _element: &Element, message: Message) -> Option<Message> {
        Some(message)
    }

    /// Handle an event sent to the element by the application.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.default_send_event(event)
    }

    /// True for containers that report end-of-stream for their whole
    /// subtree.
    fn is_bin(&self) -> bool {
        false
    }
}

/// A data producer driven by [`BaseSrc`](super::BaseSrc).
pub trait Source: Send + Sync + 'static {
    /// Formats this source can produce.
    fn caps(&self) -> Caps {
        Caps::any()
    }

    /// Pick one format out of the negotiated candidates.
    fn fixate(&self, caps: Caps) -> Caps {
        caps.fixate()
    }

    /// The format was agreed. False refuses it.
    fn set_caps(&self, _caps: &Caps) -> bool {
        true
    }

    /// Acquire resources (READY to PAUSED).
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources (PAUSED to READY).
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// True if [`create`](Self::create) honours arbitrary offsets.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64> {
        None
    }

    /// Produce up to `len` bytes at `offset`.
    ///
    /// `Err(FlowError::Eos)` ends the stream.
    fn create(&self, offset: u64, len: usize) -> FlowResult<Buffer>;

    /// Make a blocked [`create`](Self::create) return `Flushing` promptly.
    fn unlock(&self) {}

    /// Clear the state set by [`unlock`](Self::unlock).
    fn unlock_stop(&self) {}

    /// Handle an upstream event other than seek.
    fn event(&self, _event: &Event) -> bool {
        true
    }
}

/// A data consumer driven by [`BaseSink`](super::BaseSink).
pub trait Sink: Send + Sync + 'static {
    /// Formats this sink accepts.
    fn caps(&self) -> Caps {
        Caps::any()
    }

    /// The format was agreed. False refuses it.
    fn set_caps(&self, _caps: &Caps) -> bool {
        true
    }

    /// Acquire resources (READY to PAUSED).
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources (PAUSED to READY).
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Consume one buffer.
    fn render(&self, buffer: &Buffer) -> FlowResult;

    /// Observe a serialized or flush event, in stream order.
    fn event(&self, _event: &Event) -> bool {
        true
    }
}

/// A one-in, at-most-one-out filter driven by
/// [`BaseTransform`](super::BaseTransform).
pub trait Transform: Send + Sync + 'static {
    /// Formats of the sink pad template.
    fn sink_caps(&self) -> Caps {
        Caps::any()
    }

    /// Formats of the source pad template.
    fn src_caps(&self) -> Caps {
        Caps::any()
    }

    /// Formats on the other side given `caps` on the pad facing `direction`.
    fn transform_caps(&self, _direction: PadDirection, caps: &Caps) -> Caps {
        caps.clone()
    }

    /// Choose the output format out of `othercaps` for input `caps`.
    fn fixate_caps(&self, _caps: &Caps, othercaps: Caps) -> Caps {
        othercaps.fixate()
    }

    /// Input and output formats were agreed. False refuses them.
    fn set_caps(&self, _incaps: &Caps, _outcaps: &Caps) -> bool {
        true
    }

    /// Acquire resources (READY to PAUSED).
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources (PAUSED to READY).
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Observe an event arriving on the sink pad before it is forwarded.
    fn sink_event(&self, _event: &Event) -> bool {
        true
    }

    /// Process one buffer. `None` drops it.
    ///
    /// A writable buffer may be modified in place.
    fn transform(&self, buffer: Buffer) -> FlowResult<Option<Buffer>> {
        Ok(Some(buffer))
    }
}
