//! Test source producing a fixed number of patterned buffers.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{BaseSrc, BaseSrcConfig, Element, Source};
use crate::error::Result;
use crate::flow::{FlowError, FlowResult};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Default payload size of a [`FakeSrc`] buffer.
pub const DEFAULT_SIZE: usize = 4096;

/// A source emitting buffers filled with one byte value.
///
/// The source ends the stream after [`with_num_buffers`](Self::with_num_buffers)
/// buffers, or never when no limit is set. The count restarts every time the
/// element goes from READY to PAUSED.
///
/// # Example
///
/// ```rust
/// use sluice::elements::FakeSrc;
///
/// let src = FakeSrc::new()
///     .with_num_buffers(8)
///     .with_size(188)
///     .with_pattern(0x47)
///     .build("ts-src");
/// assert!(src.static_pad("src").is_some());
/// ```
#[derive(Debug)]
pub struct FakeSrc {
    num_buffers: Option<u64>,
    size: usize,
    pattern: u8,
    caps: Caps,
    config: BaseSrcConfig,
    produced: AtomicU64,
}

impl FakeSrc {
    /// Unlimited source of zeroed 4 KiB buffers.
    pub fn new() -> Self {
        Self {
            num_buffers: None,
            size: DEFAULT_SIZE,
            pattern: 0,
            caps: Caps::any(),
            config: BaseSrcConfig::default(),
            produced: AtomicU64::new(0),
        }
    }

    /// End the stream after `n` buffers.
    pub fn with_num_buffers(mut self, n: u64) -> Self {
        self.num_buffers = Some(n);
        self
    }

    /// Payload size of every buffer.
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Byte the payload is filled with.
    pub fn with_pattern(mut self, pattern: u8) -> Self {
        self.pattern = pattern;
        self
    }

    /// Formats offered on the source pad.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    /// Stamp buffers with the running time.
    pub fn with_do_timestamp(mut self, do_timestamp: bool) -> Self {
        self.config = self.config.with_do_timestamp(do_timestamp);
        self
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        let config = self.config.clone();
        BaseSrc::new_element(name, self, config)
    }
}

impl Default for FakeSrc {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for FakeSrc {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn start(&self) -> Result<()> {
        self.produced.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn create(&self, _offset: u64, _len: usize) -> FlowResult<Buffer> {
        let n = self.produced.fetch_add(1, Ordering::Relaxed);
        if self.num_buffers.is_some_and(|max| n >= max) {
            trace!(produced = n, "buffer limit reached");
            return Err(FlowError::Eos);
        }
        Ok(Buffer::from_vec(vec![self.pattern; self.size]))
    }
}
