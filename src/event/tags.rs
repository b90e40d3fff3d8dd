//! Stream metadata carried by tag events and tag messages.
//!
//! ```rust
//! use sluice::event::{TagList, TagMergeMode};
//!
//! let mut tags = TagList::new();
//! tags.set("title", "Intro");
//! tags.set("bitrate", 128_000u64);
//!
//! let mut more = TagList::new();
//! more.set("title", "Replaced?");
//! tags.merge(&more, TagMergeMode::Keep);
//! assert_eq!(tags.get_string("title"), Some("Intro"));
//! ```

use crate::clock::ClockTime;
use std::collections::BTreeMap;

/// Names of commonly used tags.
pub mod tag_names {
    /// Track title.
    pub const TITLE: &str = "title";
    /// Duration in nanoseconds.
    pub const DURATION: &str = "duration";
    /// Bitrate in bits per second.
    pub const BITRATE: &str = "bitrate";
    /// Codec description.
    pub const CODEC: &str = "codec";
}

/// A single tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Text.
    String(String),
    /// Unsigned integer.
    UInt(u64),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Several values for one tag.
    List(Vec<TagValue>),
}

impl TagValue {
    /// The text, if this is a string.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            TagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is an unsigned integer.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            TagValue::UInt(n) => Some(*n),
            _ => None,
        }
    }

    /// The number, if this is a signed integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<u64> for TagValue {
    fn from(n: u64) -> Self {
        TagValue::UInt(n)
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Int(n)
    }
}

impl From<f64> for TagValue {
    fn from(n: f64) -> Self {
        TagValue::Double(n)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

/// How an incoming tag list combines with an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagMergeMode {
    /// Drop the existing tags.
    Replace,
    /// Incoming values win.
    #[default]
    Append,
    /// Existing values win.
    Keep,
}

/// Ordered map from tag name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagList {
    tags: BTreeMap<String, TagValue>,
}

impl TagList {
    /// Empty tag list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Tag value by name.
    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    /// String tag by name.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(TagValue::as_string)
    }

    /// Unsigned tag by name.
    pub fn get_uint(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(TagValue::as_uint)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if no tags are set.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Combine `other` into `self`.
    pub fn merge(&mut self, other: &TagList, mode: TagMergeMode) {
        match mode {
            TagMergeMode::Replace => self.tags = other.tags.clone(),
            TagMergeMode::Append => {
                self.tags
                    .extend(other.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            TagMergeMode::Keep => {
                for (k, v) in &other.tags {
                    self.tags.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
    }

    /// The `title` tag.
    pub fn title(&self) -> Option<&str> {
        self.get_string(tag_names::TITLE)
    }

    /// The `duration` tag.
    pub fn duration(&self) -> Option<ClockTime> {
        self.get_uint(tag_names::DURATION).map(ClockTime::from_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_modes() {
        let mut base = TagList::new();
        base.set("title", "a");
        base.set("codec", "raw");

        let mut incoming = TagList::new();
        incoming.set("title", "b");
        incoming.set("bitrate", 8u64);

        let mut appended = base.clone();
        appended.merge(&incoming, TagMergeMode::Append);
        assert_eq!(appended.title(), Some("b"));
        assert_eq!(appended.len(), 3);

        let mut kept = base.clone();
        kept.merge(&incoming, TagMergeMode::Keep);
        assert_eq!(kept.title(), Some("a"));

        let mut replaced = base;
        replaced.merge(&incoming, TagMergeMode::Replace);
        assert_eq!(replaced.get_string("codec"), None);
    }

    #[test]
    fn test_duration_accessor() {
        let mut tags = TagList::new();
        tags.set(tag_names::DURATION, 2_000_000_000u64);
        assert_eq!(tags.duration(), Some(ClockTime::from_secs(2)));
    }
}
