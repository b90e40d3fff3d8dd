//! Built-in elements.
//!
//! Each element is configured through a plain struct with `with_*` methods
//! and turned into an [`Element`](crate::element::Element) with `build(name)`.
//! Counters and feeding handles are taken from the struct before building.
//!
//! - [`FakeSrc`] / [`FakeSink`]: test endpoints
//! - [`Identity`]: pass-through with counters and callbacks
//! - [`Queue`]: thread boundary with a bounded FIFO
//! - [`AppSrc`]: data pushed by the application
//! - [`MemorySrc`] / [`FileSrc`]: seekable byte sources

mod appsrc;
mod fakesink;
mod fakesrc;
mod file;
mod identity;
mod memsrc;
mod queue;

pub use appsrc::{AppSrc, AppSrcHandle, AppSrcStats};
pub use fakesink::{FakeSink, FakeSinkStats, HandoffCallback, StreamItem};
pub use fakesrc::FakeSrc;
pub use file::FileSrc;
pub use identity::{BufferCallback, Identity, IdentityStats};
pub use memsrc::MemorySrc;
pub use queue::{LeakyMode, Queue, QueueConfig, QueueStats};
