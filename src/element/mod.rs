//! Elements, pads and the state machine.
//!
//! An [`Element`] is a processing node with [`Pad`]s. Its behaviour comes
//! from an [`ElementImpl`]; most elements implement one of the role traits
//! instead and let a base wrapper do the plumbing:
//!
//! - [`Source`] wrapped by [`BaseSrc`]: push task or pull-mode get-range
//! - [`Sink`] wrapped by [`BaseSink`]: rendering, PAUSED blocking, EOS
//! - [`Transform`] wrapped by [`BaseTransform`]: caps translation and
//!   one-in, one-out processing
//!
//! # Example
//!
//! ```rust
//! use sluice::element::{BaseSink, BaseSinkConfig, Sink};
//! use sluice::{Buffer, FlowResult};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct Counter(AtomicUsize);
//!
//! impl Sink for Counter {
//!     fn render(&self, _buffer: &Buffer) -> FlowResult {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!         Ok(())
//!     }
//! }
//!
//! let sink = BaseSink::new_element("counter", Counter::default(), BaseSinkConfig::default());
//! assert!(sink.static_pad("sink").is_some());
//! ```

mod base_sink;
mod base_src;
mod base_transform;
mod handle;
mod pad;
mod state;
mod traits;

pub use base_sink::{BaseSink, BaseSinkConfig};
pub use base_src::{BaseSrc, BaseSrcConfig};
pub use base_transform::BaseTransform;
pub use handle::{Element, WeakElement};
pub use pad::{
    ActivateFn, ChainFn, EventFn, GetRangeFn, Pad, PadBuilder, PadDirection, PadLinkError,
    PadLinkState, PadMode, PadPresence, PadTemplate, QueryCapsFn, SetCapsFn,
};
pub use state::{State, StateChange, StateChangeError, StateChangeResult, StateChangeSuccess};
pub use traits::{ElementImpl, Sink, Source, Transform};
