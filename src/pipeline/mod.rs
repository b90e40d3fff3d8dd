//! Bins and pipelines.
//!
//! A [`Bin`] groups elements and drives their state changes in data-flow
//! order. A [`Pipeline`] is the top-level bin: it owns the bus that
//! collects every message from inside it and the scheduler its streaming
//! tasks run on.

mod bin;
mod graph;
mod toplevel;

pub use bin::Bin;
pub use toplevel::{Pipeline, PipelineConfig};
