//! Tracing spans and log helpers.
//!
//! The crate logs through [`tracing`] and never installs a subscriber. These
//! helpers give pipelines, elements and pads uniformly named spans so a
//! subscriber can filter by them.
//!
//! ```rust
//! use sluice::observability::element_span;
//!
//! let span = element_span("filesrc0");
//! let _guard = span.enter();
//! tracing::debug!("inside the element span");
//! ```

use crate::element::Pad;
use crate::flow::FlowError;
use tracing::{Level, Span, span};

/// Span covering the run of a pipeline.
#[inline]
pub fn pipeline_span(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Span covering work done on behalf of an element.
#[inline]
pub fn element_span(element: &str) -> Span {
    span!(Level::DEBUG, "element", element = %element)
}

/// Span covering streaming through a pad.
#[inline]
pub fn pad_span(pad: &Pad) -> Span {
    span!(Level::TRACE, "pad", pad = %pad.full_name(), direction = ?pad.direction())
}

/// Log a flow outcome at a level matching its severity.
///
/// Fatal outcomes are errors, end of stream is informational and the rest
/// are debug noise from normal shutdown.
pub fn log_flow_error(element: &str, err: FlowError) {
    if err.is_fatal() {
        tracing::error!(element = %element, reason = %err, "data flow failed");
    } else if err == FlowError::Eos {
        tracing::info!(element = %element, "end of stream");
    } else {
        tracing::debug!(element = %element, reason = %err, "data flow stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use crate::element::PadTemplate;

    #[test]
    fn test_spans_construct_without_subscriber() {
        let pad = Pad::builder(PadTemplate::src(Caps::any())).build();
        let _p = pipeline_span("p").entered();
        let _e = element_span("e").entered();
        let _s = pad_span(&pad).entered();
        log_flow_error("e", FlowError::NotNegotiated);
        log_flow_error("e", FlowError::Eos);
    }
}
