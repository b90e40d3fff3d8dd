//! Per-link format negotiation.
//!
//! Negotiation agrees on one fixed format for a link in four steps:
//!
//! 1. ask the upstream pad what it can produce,
//! 2. ask the downstream pad what it accepts, filtered by (1),
//! 3. fixate the intersection to a single structure,
//! 4. announce the result (a caps event in push mode, `set_caps` on both
//!    pads in pull mode).
//!
//! An empty intersection fails with [`NegotiationError::NoCommonFormat`]; a
//! result that still holds ranges or lists after fixation fails with
//! [`NegotiationError::CannotFixate`]. When both sides accept anything the
//! link is negotiated as `ANY`.

mod error;

pub use error::NegotiationError;

use crate::caps::Caps;
use crate::element::{Pad, PadDirection};
use crate::event::Event;
use tracing::debug;

/// Element-specific fixation hook. Receives the intersection and returns
/// the chosen format.
pub type FixateFn<'a> = &'a dyn Fn(Caps) -> Caps;

/// Intersect what `src` offers with what its peer accepts and fixate it.
///
/// Does not announce the result.
pub fn compute_link_caps(src: &Pad, fixate: Option<FixateFn<'_>>) -> Result<Caps, NegotiationError> {
    if src.direction() != PadDirection::Src {
        return Err(NegotiationError::NotLinked {
            pad: src.full_name(),
        });
    }
    let peer = src.peer().ok_or_else(|| NegotiationError::NotLinked {
        pad: src.full_name(),
    })?;

    let mine = src.query_caps(None);
    let common = peer.query_caps(Some(&mine));
    debug!(pad = %src.full_name(), offered = %mine, common = %common, "negotiating");

    if common.is_empty() {
        let theirs = peer.query_caps(None);
        return Err(NegotiationError::no_common_format(
            src.full_name(),
            peer.full_name(),
            &mine.to_string(),
            &theirs.to_string(),
        ));
    }
    if common.is_any() {
        return Ok(common);
    }

    let fixed = match fixate {
        Some(fixate) => fixate(common),
        None => common.fixate(),
    };
    if fixed.is_empty() || !(fixed.is_fixed() || fixed.is_any()) {
        return Err(NegotiationError::CannotFixate {
            pad: src.full_name(),
            reason: format!("fixation left {fixed}"),
        });
    }
    Ok(fixed)
}

/// Negotiate a push-mode link from its source pad and send the result
/// downstream as a caps event.
///
/// The source pad's own set-caps function sees the result before the peer
/// does.
pub fn negotiate_src_pad(src: &Pad, fixate: Option<FixateFn<'_>>) -> Result<Caps, NegotiationError> {
    let caps = compute_link_caps(src, fixate)?;
    if !src.apply_caps(&caps) || !src.push_event(Event::caps(caps.clone())) {
        return Err(NegotiationError::Refused {
            pad: src.full_name(),
            caps: caps.to_string(),
        });
    }
    debug!(pad = %src.full_name(), %caps, "negotiated");
    Ok(caps)
}

/// Negotiate a pull-mode link from its sink pad, applying the result to
/// both pads directly.
pub fn negotiate_pull(sink: &Pad, fixate: Option<FixateFn<'_>>) -> Result<Caps, NegotiationError> {
    let src = sink.peer().ok_or_else(|| NegotiationError::NotLinked {
        pad: sink.full_name(),
    })?;
    let caps = compute_link_caps(&src, fixate)?;
    for pad in [&src, sink] {
        if !pad.set_caps(&caps) {
            return Err(NegotiationError::Refused {
                pad: pad.full_name(),
                caps: caps.to_string(),
            });
        }
    }
    debug!(pad = %sink.full_name(), %caps, "negotiated pull link");
    Ok(caps)
}
