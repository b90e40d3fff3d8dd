//! Error types for sluice.

use crate::element::{PadLinkError, StateChangeError};
use crate::flow::FlowError;
use crate::negotiation::NegotiationError;
use thiserror::Error;

/// Result type alias using sluice's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sluice operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Linking two pads failed.
    #[error("link failed: {0}")]
    Link(#[from] PadLinkError),

    /// Format negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// An element refused a state transition.
    #[error("state change failed: {0}")]
    StateChange(#[from] StateChangeError),

    /// A data-flow call returned a non-ok status.
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),

    /// No factory registered under this name.
    #[error("no element factory named '{0}'")]
    UnknownFactory(String),

    /// No child element with this name.
    #[error("no element named '{0}'")]
    NoSuchElement(String),

    /// No pad with this name on the element.
    #[error("element '{element}' has no pad named '{pad}'")]
    NoSuchPad {
        /// Element searched.
        element: String,
        /// Pad name that was requested.
        pad: String,
    },

    /// A container already holds a child with this name.
    #[error("duplicate element name '{0}'")]
    DuplicateName(String),

    /// The element already belongs to another container.
    #[error("element '{0}' already has a parent")]
    AlreadyParented(String),

    /// The cothread table of a context has no free slot.
    #[error("cothread table full (max {0} slots)")]
    CothreadTableFull(usize),

    /// No cothread slot with this index.
    #[error("no cothread in slot {0}")]
    NoSuchCothread(usize),

    /// A caps description could not be parsed.
    #[error("invalid caps description: {0}")]
    CapsParse(String),

    /// Configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An element implementation reported a failure.
    #[error("element error: {0}")]
    Element(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
