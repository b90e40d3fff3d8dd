//! Buffer metadata types.

use crate::clock::ClockTime;

/// Flags describing buffer properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// First buffer after a flush or a gap in the stream.
    pub discont: bool,
    /// Buffer can be decoded on its own (keyframe equivalent).
    pub sync_point: bool,
    /// Buffer carries no data and only marks elapsed time.
    pub gap: bool,
    /// Buffer is decoded but not rendered.
    pub decode_only: bool,
    /// Payload is known to be damaged.
    pub corrupted: bool,
}

impl BufferFlags {
    /// Mark or unmark the buffer as a discontinuity.
    pub fn set_discont(&mut self, value: bool) {
        self.discont = value;
    }

    /// Check the discontinuity flag.
    pub fn is_discont(&self) -> bool {
        self.discont
    }
}

/// Timing and position data attached to a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Presentation timestamp.
    pub pts: ClockTime,
    /// Decode timestamp.
    pub dts: ClockTime,
    /// Duration of the content.
    pub duration: ClockTime,
    /// Byte offset of the first payload byte in the source.
    pub offset: Option<u64>,
    /// Byte offset one past the last payload byte.
    pub offset_end: Option<u64>,
    /// Per-stream sequence number.
    pub sequence: u64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            pts: ClockTime::NONE,
            dts: ClockTime::NONE,
            duration: ClockTime::NONE,
            offset: None,
            offset_end: None,
            sequence: 0,
            flags: BufferFlags::default(),
        }
    }
}

impl Metadata {
    /// Empty metadata: all times unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata with only a sequence number.
    pub fn with_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: ClockTime) -> Self {
        self.pts = pts;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: ClockTime) -> Self {
        self.duration = duration;
        self
    }

    /// Set the byte range `[offset, offset + len)`.
    pub fn with_byte_range(mut self, offset: u64, len: usize) -> Self {
        self.offset = Some(offset);
        self.offset_end = Some(offset + len as u64);
        self
    }

    /// End time (`pts + duration`), if both are set.
    pub fn end_time(&self) -> Option<ClockTime> {
        if self.pts.is_some() && self.duration.is_some() {
            Some(self.pts + self.duration)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = Metadata::with_sequence(7)
            .with_pts(ClockTime::from_millis(40))
            .with_duration(ClockTime::from_millis(20))
            .with_byte_range(100, 50);

        assert_eq!(meta.sequence, 7);
        assert_eq!(meta.offset, Some(100));
        assert_eq!(meta.offset_end, Some(150));
        assert_eq!(meta.end_time(), Some(ClockTime::from_millis(60)));
    }

    #[test]
    fn test_default_times_unset() {
        let meta = Metadata::new();
        assert!(meta.pts.is_none());
        assert_eq!(meta.end_time(), None);
        assert!(!meta.flags.is_discont());
    }
}
