//! Video descriptors and the size-based classifier.

use std::fmt;
use std::sync::Arc;

/// Bytes per megabyte used when converting configured thresholds.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Disposition tier of a video, derived from its byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Auto-forwarded to the destination chat
    Short,
    /// Held for human approval in the origin chat
    Medium,
    /// Downloaded to local storage
    Long,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Short => "short",
            Tier::Medium => "medium",
            Tier::Long => "long",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a video by size.
///
/// `Short` below `short_max`, `Medium` in `[short_max, medium_max)`,
/// `Long` from `medium_max` upwards.
pub fn classify(size_bytes: u64, short_max: u64, medium_max: u64) -> Tier {
    if size_bytes < short_max {
        Tier::Short
    } else if size_bytes < medium_max {
        Tier::Medium
    } else {
        Tier::Long
    }
}

/// The two classification boundaries, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThresholds {
    short_max: u64,
    medium_max: u64,
}

impl SizeThresholds {
    /// Build thresholds from byte values. A `medium_max` below `short_max`
    /// is raised to `short_max` so the medium band is empty rather than inverted.
    pub fn new(short_max: u64, medium_max: u64) -> Self {
        Self {
            short_max,
            medium_max: medium_max.max(short_max),
        }
    }

    /// Build thresholds from megabyte values.
    pub fn from_mb(short_max_mb: u64, medium_max_mb: u64) -> Self {
        Self::new(
            short_max_mb.saturating_mul(BYTES_PER_MB),
            medium_max_mb.saturating_mul(BYTES_PER_MB),
        )
    }

    pub fn short_max(&self) -> u64 {
        self.short_max
    }

    pub fn medium_max(&self) -> u64 {
        self.medium_max
    }

    pub fn classify(&self, size_bytes: u64) -> Tier {
        classify(size_bytes, self.short_max, self.medium_max)
    }
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self::from_mb(50, 500)
    }
}

/// Reference to a message in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i32) -> Self {
        Self { chat_id, message_id }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// Opaque handle to a remote media object.
///
/// Only the gateway looks inside; the core clones it through calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaRef {
    file_id: Arc<str>,
    unique_id: Arc<str>,
}

impl MediaRef {
    pub fn new(file_id: impl Into<Arc<str>>, unique_id: impl Into<Arc<str>>) -> Self {
        Self {
            file_id: file_id.into(),
            unique_id: unique_id.into(),
        }
    }

    /// Identifier used to re-send or download the media
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Stable identifier of the underlying file, usable as a file name
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }
}

/// Immutable record of one candidate video and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDescriptor {
    message: MessageRef,
    duration_secs: u32,
    size_bytes: u64,
    media: MediaRef,
    caption: Option<String>,
    file_name: Option<String>,
    tier: Tier,
}

impl VideoDescriptor {
    pub fn new(
        message: MessageRef,
        media: MediaRef,
        size_bytes: u64,
        duration_secs: u32,
        thresholds: &SizeThresholds,
    ) -> Self {
        Self {
            message,
            duration_secs,
            size_bytes,
            media,
            caption: None,
            file_name: None,
            tier: thresholds.classify(size_bytes),
        }
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption.filter(|c| !c.is_empty());
        self
    }

    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name.filter(|n| !n.is_empty());
        self
    }

    pub fn message(&self) -> MessageRef {
        self.message
    }

    pub fn chat_id(&self) -> i64 {
        self.message.chat_id
    }

    pub fn message_id(&self) -> i32 {
        self.message.message_id
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn media(&self) -> &MediaRef {
        &self.media
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn is_short(&self) -> bool {
        self.tier == Tier::Short
    }

    pub fn is_medium(&self) -> bool {
        self.tier == Tier::Medium
    }

    pub fn is_long(&self) -> bool {
        self.tier == Tier::Long
    }

    /// Name used in log lines: the display filename or the media id.
    pub fn display_name(&self) -> &str {
        self.file_name().unwrap_or_else(|| self.media.unique_id())
    }
}

#[cfg(test)]
pub(crate) fn test_video(message_id: i32, size_bytes: u64, duration_secs: u32) -> VideoDescriptor {
    VideoDescriptor::new(
        MessageRef::new(-100123, message_id),
        MediaRef::new(format!("file-{message_id}"), format!("unique-{message_id}")),
        size_bytes,
        duration_secs,
        &SizeThresholds::default(),
    )
}
