//! # Sluice
//!
//! The execution core of a media pipeline: elements connected through pads
//! exchange reference-counted buffers and ordered events, agree on formats
//! through caps negotiation, move through a four-state lifecycle, and report
//! to the application over a bus.
//!
//! ## Features
//!
//! - **Push and pull scheduling**: sources drive data from streaming tasks,
//!   or sinks request byte ranges on demand
//! - **Caps negotiation**: structured format sets with intersection and
//!   fixation, linked pads agree before data flows
//! - **Bins and pipelines**: state changes walk children in data-flow order,
//!   with asynchronous completion and EOS aggregation
//! - **Cooperative scheduling**: all streaming tasks of a pipeline can share
//!   one worker thread as cothreads
//! - **Bus**: blocking, filtered and async consumption of status messages
//!
//! ## Quick Start
//!
//! ```rust
//! use sluice::prelude::*;
//! use sluice::elements::{FakeSink, FakeSrc, Identity};
//! use std::time::Duration;
//!
//! let pipeline = Pipeline::new("example");
//! let src = FakeSrc::new().with_num_buffers(8).with_size(64).build("src");
//! let identity = Identity::new().build("identity");
//! let sink = FakeSink::new();
//! let stats = sink.stats();
//! let sink = sink.build("sink");
//!
//! pipeline.add_many(&[&src, &identity, &sink])?;
//! Element::link_many(&[&src, &identity, &sink])?;
//! pipeline.run(Some(Duration::from_secs(5)))?;
//!
//! assert_eq!(stats.buffers(), 8);
//! assert_eq!(stats.bytes(), 8 * 64);
//! # Ok::<(), sluice::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod flow;
pub mod message;
pub mod metadata;
pub mod negotiation;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::bus::{Bus, BusSyncReply};
    pub use crate::caps::{Caps, Structure};
    pub use crate::clock::ClockTime;
    pub use crate::element::{
        Element, ElementImpl, Pad, PadDirection, PadMode, PadTemplate, Sink, Source, State,
        StateChange, StateChangeSuccess, Transform,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, EventKind, SeekEvent, Segment};
    pub use crate::flow::{FlowError, FlowResult};
    pub use crate::message::{Message, MessageKind, MessageType, MessageTypeMask};
    pub use crate::metadata::Metadata;
    pub use crate::pipeline::{Bin, Pipeline, PipelineConfig};
    pub use crate::registry::ElementRegistry;
    pub use crate::scheduler::SchedulingMode;
}

pub use buffer::Buffer;
pub use caps::Caps;
pub use element::{Element, State};
pub use error::{Error, Result};
pub use event::Event;
pub use flow::{FlowError, FlowResult};
pub use message::Message;
pub use pipeline::Pipeline;
