//! Identity element with callbacks for debugging.
//!
//! A pass-through transform that allows inspection of buffers via callbacks
//! and keeps counters of what went through it.

use crate::buffer::Buffer;
use crate::element::{BaseTransform, Element, Transform};
use crate::error::Result;
use crate::flow::FlowResult;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Callback type for buffer inspection.
pub type BufferCallback = Box<dyn Fn(&Buffer) + Send + Sync>;

/// Counters shared between an [`Identity`] element and the application.
#[derive(Debug, Default)]
pub struct IdentityStats {
    buffers: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
}

impl IdentityStats {
    /// Buffers received.
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    /// Payload bytes received.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Buffers dropped instead of forwarded.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// An identity element that passes buffers through unchanged while
/// optionally calling callbacks for inspection.
///
/// # Example
///
/// ```rust
/// use sluice::elements::Identity;
///
/// let identity = Identity::new()
///     .with_stamp_sequence(true)
///     .on_buffer(|buf| {
///         println!("Buffer: seq={}, len={}", buf.metadata().sequence, buf.len());
///     });
/// let stats = identity.stats();
/// let element = identity.build("debug-point");
/// assert_eq!(element.pads().len(), 2);
/// assert_eq!(stats.buffers(), 0);
/// ```
pub struct Identity {
    callback: Option<BufferCallback>,
    drop_every: Option<u64>,
    stamp_sequence: bool,
    stats: Arc<IdentityStats>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("drop_every", &self.drop_every)
            .field("stamp_sequence", &self.stamp_sequence)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Create a new identity element.
    pub fn new() -> Self {
        Self {
            callback: None,
            drop_every: None,
            stamp_sequence: false,
            stats: Arc::new(IdentityStats::default()),
        }
    }

    /// Set a callback to be called for each buffer.
    pub fn on_buffer<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Drop every `n`-th buffer. Zero disables dropping.
    pub fn with_drop_every(mut self, n: u64) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }

    /// Overwrite each buffer's sequence number with its position in the
    /// stream, starting at 1.
    pub fn with_stamp_sequence(mut self, stamp: bool) -> Self {
        self.stamp_sequence = stamp;
        self
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<IdentityStats> {
        Arc::clone(&self.stats)
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        BaseTransform::new_element(name, self)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Identity {
    fn start(&self) -> Result<()> {
        self.stats.buffers.store(0, Ordering::Relaxed);
        self.stats.bytes.store(0, Ordering::Relaxed);
        self.stats.dropped.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn transform(&self, mut buffer: Buffer) -> FlowResult<Option<Buffer>> {
        let n = self.stats.buffers.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats
            .bytes
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);

        if let Some(cb) = &self.callback {
            cb(&buffer);
        }

        if self.drop_every.is_some_and(|every| n % every == 0) {
            trace!(buffer = n, "dropped");
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        if self.stamp_sequence {
            buffer.metadata_mut().sequence = n;
        }
        Ok(Some(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use std::sync::atomic::AtomicUsize;

    fn create_test_buffer(size: usize, seq: u64) -> Buffer {
        Buffer::new(vec![0; size], Metadata::with_sequence(seq))
    }

    #[test]
    fn test_identity_passthrough() {
        let identity = Identity::new();
        let buffer = create_test_buffer(100, 42);
        let buf = identity.transform(buffer).unwrap().unwrap();
        assert_eq!(buf.metadata().sequence, 42);
        assert_eq!(buf.len(), 100);
    }

    #[test]
    fn test_identity_callback() {
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = Arc::clone(&call_count);

        let identity = Identity::new().on_buffer(move |_buf| {
            call_count_clone.fetch_add(1, Ordering::Relaxed);
        });

        for i in 0..5 {
            identity.transform(create_test_buffer(50, i)).unwrap();
        }

        assert_eq!(call_count.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_identity_stats() {
        let identity = Identity::new();
        let stats = identity.stats();

        identity.transform(create_test_buffer(100, 0)).unwrap();
        identity.transform(create_test_buffer(200, 1)).unwrap();
        identity.transform(create_test_buffer(50, 2)).unwrap();

        assert_eq!(stats.buffers(), 3);
        assert_eq!(stats.bytes(), 350);

        identity.start().unwrap();
        assert_eq!(stats.buffers(), 0);
    }

    #[test]
    fn test_drop_every() {
        let identity = Identity::new().with_drop_every(3);
        let kept = (0..9)
            .filter_map(|i| identity.transform(create_test_buffer(1, i)).unwrap())
            .count();
        assert_eq!(kept, 6);
        assert_eq!(identity.stats().dropped(), 3);
    }

    #[test]
    fn test_stamp_sequence() {
        let identity = Identity::new().with_stamp_sequence(true);
        let first = identity.transform(create_test_buffer(1, 90)).unwrap().unwrap();
        let second = identity.transform(create_test_buffer(1, 90)).unwrap().unwrap();
        assert_eq!(first.metadata().sequence, 1);
        assert_eq!(second.metadata().sequence, 2);
    }
}
