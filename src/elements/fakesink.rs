//! Test sink that counts and records what reaches it.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{BaseSink, BaseSinkConfig, Element, Sink};
use crate::event::{Event, EventKind, EventType};
use crate::flow::FlowResult;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Callback invoked with every rendered buffer.
pub type HandoffCallback = Box<dyn Fn(&Buffer) + Send + Sync>;

/// One entry of the stream as a [`FakeSink`] saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamItem {
    /// A rendered buffer.
    Buffer {
        /// Payload length.
        len: usize,
        /// Sequence number from the buffer metadata.
        sequence: u64,
    },
    /// An event delivered to the sink.
    Event(EventType),
}

/// Counters shared between a [`FakeSink`] element and the application.
#[derive(Debug, Default)]
pub struct FakeSinkStats {
    buffers: AtomicU64,
    bytes: AtomicU64,
    eos: AtomicU64,
    items: Mutex<Vec<StreamItem>>,
}

impl FakeSinkStats {
    /// Buffers rendered.
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Acquire)
    }

    /// Payload bytes rendered.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// End-of-stream events received.
    pub fn eos_count(&self) -> u64 {
        self.eos.load(Ordering::Acquire)
    }

    /// Buffers and events in arrival order.
    pub fn items(&self) -> Vec<StreamItem> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, item: StreamItem) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(item);
    }
}

/// A sink that drops data after counting it.
///
/// Keep the [`stats`](Self::stats) handle before calling
/// [`build`](Self::build) to observe the element while it runs.
///
/// # Example
///
/// ```rust
/// use sluice::elements::FakeSink;
///
/// let sink = FakeSink::new().on_handoff(|buf| assert!(!buf.is_empty()));
/// let stats = sink.stats();
/// let element = sink.build("sink");
/// assert_eq!(element.name(), "sink");
/// assert_eq!(stats.buffers(), 0);
/// ```
pub struct FakeSink {
    caps: Caps,
    config: BaseSinkConfig,
    handoff: Option<HandoffCallback>,
    stats: Arc<FakeSinkStats>,
}

impl fmt::Debug for FakeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeSink")
            .field("caps", &self.caps)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl FakeSink {
    /// Sink accepting anything, in push mode.
    pub fn new() -> Self {
        Self {
            caps: Caps::any(),
            config: BaseSinkConfig::default(),
            handoff: None,
            stats: Arc::new(FakeSinkStats::default()),
        }
    }

    /// Only accept `caps`.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    /// Pull from upstream when it supports it.
    pub fn with_prefer_pull(mut self, prefer_pull: bool) -> Self {
        self.config = self.config.with_prefer_pull(prefer_pull);
        self
    }

    /// Bytes requested per pull.
    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.config = self.config.with_blocksize(blocksize);
        self
    }

    /// Call `callback` with every buffer before it is dropped.
    pub fn on_handoff<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        self.handoff = Some(Box::new(callback));
        self
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<FakeSinkStats> {
        Arc::clone(&self.stats)
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        let config = self.config.clone();
        BaseSink::new_element(name, self, config)
    }
}

impl Default for FakeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for FakeSink {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn render(&self, buffer: &Buffer) -> FlowResult {
        trace!(len = buffer.len(), sequence = buffer.metadata().sequence, "render");
        self.stats.buffers.fetch_add(1, Ordering::AcqRel);
        self.stats
            .bytes
            .fetch_add(buffer.len() as u64, Ordering::AcqRel);
        self.stats.record(StreamItem::Buffer {
            len: buffer.len(),
            sequence: buffer.metadata().sequence,
        });
        if let Some(handoff) = &self.handoff {
            handoff(buffer);
        }
        Ok(())
    }

    fn event(&self, event: &Event) -> bool {
        if let EventKind::Eos = event.kind() {
            let n = self.stats.eos.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(eos_count = n, "end of stream");
        }
        self.stats.record(StreamItem::Event(event.event_type()));
        true
    }
}
