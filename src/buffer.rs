//! Reference-counted, copy-on-write data buffers.
//!
//! A [`Buffer`] is a cheap handle: cloning it adds a reference and shares the
//! payload. Mutating accessors take `&mut self` and copy the payload first
//! when another handle still points at it, so readers never need a lock.

use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::metadata::Metadata;
use std::sync::Arc;

#[derive(Clone)]
struct BufferInner {
    data: Vec<u8>,
    metadata: Metadata,
    caps: Option<Caps>,
}

/// A timed unit of payload data.
///
/// # Example
///
/// ```rust
/// use sluice::buffer::Buffer;
///
/// let original = Buffer::from_vec(vec![1, 2, 3]);
/// let mut copy = original.clone();
/// assert!(!copy.is_writable());
///
/// copy.data_mut()[0] = 9;
/// assert_eq!(original.as_bytes(), &[1, 2, 3]);
/// assert_eq!(copy.as_bytes(), &[9, 2, 3]);
/// ```
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Create a buffer owning `data`, with default metadata.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(data, Metadata::default())
    }

    /// Create a buffer copying `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Create a zero-filled buffer of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    /// Create a buffer with explicit metadata.
    pub fn new(data: Vec<u8>, metadata: Metadata) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data,
                metadata,
                caps: None,
            }),
        }
    }

    /// Payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Metadata attached to this buffer.
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Presentation timestamp.
    pub fn pts(&self) -> ClockTime {
        self.inner.metadata.pts
    }

    /// Byte offset in the source, if known.
    pub fn offset(&self) -> Option<u64> {
        self.inner.metadata.offset
    }

    /// Caps the buffer was produced under.
    pub fn caps(&self) -> Option<&Caps> {
        self.inner.caps.as_ref()
    }

    /// Number of handles sharing this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// True if this is the only handle, so mutation needs no copy.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.inner) == 1 && Arc::weak_count(&self.inner) == 0
    }

    /// True if both handles share the same payload allocation.
    pub fn ptr_eq(a: &Buffer, b: &Buffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Writable payload, copying it first if shared.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut Arc::make_mut(&mut self.inner).data
    }

    /// Writable metadata, copying the buffer first if shared.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut Arc::make_mut(&mut self.inner).metadata
    }

    /// Attach caps, copying the buffer first if shared.
    pub fn set_caps(&mut self, caps: Option<Caps>) {
        Arc::make_mut(&mut self.inner).caps = caps;
    }

    /// Builder-style [`set_caps`](Self::set_caps).
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.set_caps(Some(caps));
        self
    }

    /// Copy `len` bytes starting at `offset` into a new buffer.
    ///
    /// The range is clipped to the payload. Metadata is copied and the byte
    /// offsets are adjusted when known.
    pub fn copy_region(&self, offset: usize, len: usize) -> Buffer {
        let start = offset.min(self.len());
        let end = start.saturating_add(len).min(self.len());
        let mut metadata = self.inner.metadata.clone();
        if let Some(base) = metadata.offset {
            metadata.offset = Some(base + start as u64);
            metadata.offset_end = Some(base + end as u64);
        }
        Buffer {
            inner: Arc::new(BufferInner {
                data: self.inner.data[start..end].to_vec(),
                metadata,
                caps: self.inner.caps.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("pts", &self.inner.metadata.pts)
            .field("offset", &self.inner.metadata.offset)
            .field("sequence", &self.inner.metadata.sequence)
            .field("refs", &self.ref_count())
            .finish()
    }
}
