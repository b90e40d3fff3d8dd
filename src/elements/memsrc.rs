//! Seekable source over bytes held in memory.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{BaseSrc, BaseSrcConfig, Element, Source};
use crate::flow::{FlowError, FlowResult};
use crate::metadata::Metadata;
use std::sync::Arc;

/// A source serving slices of an in-memory byte array.
///
/// It supports random access, so downstream can drive it in pull mode or
/// seek it while pushing.
///
/// ```rust
/// use sluice::elements::MemorySrc;
///
/// let src = MemorySrc::new(vec![1, 2, 3, 4]).with_blocksize(2).build("mem");
/// assert!(src.static_pad("src").unwrap().supports_pull());
/// ```
#[derive(Debug, Clone)]
pub struct MemorySrc {
    data: Arc<[u8]>,
    caps: Caps,
    config: BaseSrcConfig,
}

impl MemorySrc {
    /// Serve `data`.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            caps: Caps::any(),
            config: BaseSrcConfig::default(),
        }
    }

    /// Bytes per buffer in push mode.
    pub fn with_blocksize(mut self, blocksize: usize) -> Self {
        self.config = self.config.with_blocksize(blocksize);
        self
    }

    /// Formats offered on the source pad.
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    /// Create the element.
    pub fn build(self, name: impl Into<String>) -> Element {
        let config = self.config.clone();
        BaseSrc::new_element(name, self, config)
    }
}

impl Source for MemorySrc {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn create(&self, offset: u64, len: usize) -> FlowResult<Buffer> {
        let start = usize::try_from(offset).map_err(|_| FlowError::Eos)?;
        if start >= self.data.len() {
            return Err(FlowError::Eos);
        }
        let end = start.saturating_add(len).min(self.data.len());
        Ok(Buffer::new(
            self.data[start..end].to_vec(),
            Metadata::new().with_byte_range(offset, end - start),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memsrc_ranges() {
        let src = MemorySrc::new((0..10).collect::<Vec<u8>>());
        assert_eq!(src.create(0, 4).unwrap().as_bytes(), &[0, 1, 2, 3]);
        assert_eq!(src.create(8, 4).unwrap().as_bytes(), &[8, 9]);
        assert!(src.create(9, 0).unwrap().is_empty());
        assert_eq!(src.create(10, 0).unwrap_err(), FlowError::Eos);
        assert_eq!(src.create(u64::MAX, 1).unwrap_err(), FlowError::Eos);

        let buf = src.create(3, 2).unwrap();
        assert_eq!(buf.metadata().offset, Some(3));
        assert_eq!(buf.metadata().offset_end, Some(5));
    }
}
