//! Negotiation error types.

use thiserror::Error;

/// Error while agreeing on a format across a link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// The two sides share no format.
    #[error("no common format between {upstream} and {downstream}: {explanation}")]
    NoCommonFormat {
        /// Upstream pad, as `element:pad`.
        upstream: String,
        /// Downstream pad, as `element:pad`.
        downstream: String,
        /// What each side offered.
        explanation: String,
    },

    /// Fixation did not produce a single concrete format.
    #[error("cannot fixate format on {pad}: {reason}")]
    CannotFixate {
        /// Pad being negotiated.
        pad: String,
        /// Why fixation failed.
        reason: String,
    },

    /// A side refused the fixed format.
    #[error("{pad} refused caps {caps}")]
    Refused {
        /// Pad that refused.
        pad: String,
        /// The refused caps, in text form.
        caps: String,
    },

    /// The pad has no peer to negotiate with.
    #[error("{pad} is not linked")]
    NotLinked {
        /// The unlinked pad.
        pad: String,
    },
}

impl NegotiationError {
    /// Build a [`NoCommonFormat`](Self::NoCommonFormat) error listing both offers.
    pub fn no_common_format(
        upstream: impl Into<String>,
        downstream: impl Into<String>,
        upstream_caps: &str,
        downstream_caps: &str,
    ) -> Self {
        Self::NoCommonFormat {
            upstream: upstream.into(),
            downstream: downstream.into(),
            explanation: format!(
                "upstream produces {upstream_caps}, downstream accepts {downstream_caps}"
            ),
        }
    }
}
