//! Flow status of push and pull calls.
//!
//! A data-flow call returns `Ok(..)` or one of the [`FlowError`] variants.
//! Callers decide per variant whether to stop, retry or escalate to a bus
//! error message; [`FlowError::is_fatal`] marks the ones that mean the
//! pipeline cannot proceed.

use thiserror::Error;

/// Non-ok outcome of a chain, push or get-range call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("not linked")]
    NotLinked,
    /// The pad is flushing or inactive.
    #[error("flushing")]
    Flushing,
    /// The pad is in a state that does not allow this call.
    #[error("wrong state")]
    WrongState,
    /// No more data: end of stream was reached.
    #[error("unexpected end of stream")]
    Eos,
    /// The format was never agreed or was refused.
    #[error("not negotiated")]
    NotNegotiated,
    /// The operation is not supported by this pad.
    #[error("not supported")]
    NotSupported,
    /// Generic failure. The element posts the details on the bus.
    #[error("error")]
    Error,
}

impl FlowError {
    /// True for outcomes that must be escalated as a bus error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FlowError::NotNegotiated | FlowError::NotSupported | FlowError::Error
        )
    }
}

/// Result of a flow call.
pub type FlowResult<T = ()> = std::result::Result<T, FlowError>;
