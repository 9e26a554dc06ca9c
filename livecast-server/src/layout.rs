//! Classified stream layout of a live service and its persistence seam.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ts_analyzer::crc32_mpeg2;

/// Maximum number of streams retained per service.
pub const MAX_STREAMS: usize = 64;

/// Semantic kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Mpeg2Video,
    H264Video,
    MpegAudio,
    AacAudio,
    LatmAudio,
    Ac3Audio,
    Eac3Audio,
    DtsAudio,
    Teletext,
    DvbSubtitle,
    Unknown,
}

impl StreamKind {
    /// Short codec name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Mpeg2Video => "MPEG2VIDEO",
            StreamKind::H264Video => "H264",
            StreamKind::MpegAudio => "MPEG2AUDIO",
            StreamKind::AacAudio => "AAC",
            StreamKind::LatmAudio => "LATM",
            StreamKind::Ac3Audio => "AC3",
            StreamKind::Eac3Audio => "EAC3",
            StreamKind::DtsAudio => "DTS",
            StreamKind::Teletext => "TELETEXT",
            StreamKind::DvbSubtitle => "DVBSUB",
            StreamKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Up to two ISO 639 language codes of one stream, rendered joined by `+`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct LanguageTag {
    codes: Vec<String>,
}

impl LanguageTag {
    /// Maximum number of codes a tag carries.
    pub const MAX_CODES: usize = 2;

    /// Tag with a single code; empty codes give an empty tag.
    pub fn single(code: impl Into<String>) -> Self {
        let mut tag = Self::default();
        tag.push(code);
        tag
    }

    /// Append a code. Returns false once the tag is full or the code is empty.
    pub fn push(&mut self, code: impl Into<String>) -> bool {
        let code = code.into();
        if code.is_empty() || self.is_full() {
            return false;
        }
        self.codes.push(code);
        true
    }

    pub fn is_full(&self) -> bool {
        self.codes.len() >= Self::MAX_CODES
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.codes.join("+"))
    }
}

impl From<LanguageTag> for String {
    fn from(tag: LanguageTag) -> Self {
        tag.to_string()
    }
}

impl From<String> for LanguageTag {
    fn from(s: String) -> Self {
        let mut tag = LanguageTag::default();
        for code in s.split('+') {
            tag.push(code);
        }
        tag
    }
}

/// One classified elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Elementary PID (never 0).
    pub pid: u16,
    pub kind: StreamKind,
    #[serde(default)]
    pub language: LanguageTag,
    #[serde(default)]
    pub audio_type: u8,
    #[serde(default)]
    pub subtitling_type: u8,
    #[serde(default)]
    pub composition_page_id: u16,
    #[serde(default)]
    pub ancillary_page_id: u16,
}

impl StreamDescriptor {
    /// Descriptor with no language or subtitle attributes.
    pub fn new(pid: u16, kind: StreamKind) -> Self {
        Self {
            pid,
            kind,
            language: LanguageTag::default(),
            audio_type: 0,
            subtitling_type: 0,
            composition_page_id: 0,
            ancillary_page_id: 0,
        }
    }
}

/// Ordered, bounded set of classified streams for one service.
///
/// Two layouts are equal when they hold the same descriptors in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StreamDescriptor>", into = "Vec<StreamDescriptor>")]
pub struct ServiceLayout {
    streams: Vec<StreamDescriptor>,
}

impl ServiceLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stream unless the layout already holds [`MAX_STREAMS`].
    pub fn try_push(&mut self, stream: StreamDescriptor) -> bool {
        if self.streams.len() >= MAX_STREAMS {
            return false;
        }
        self.streams.push(stream);
        true
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamDescriptor> {
        self.streams.iter()
    }
}

impl From<Vec<StreamDescriptor>> for ServiceLayout {
    fn from(streams: Vec<StreamDescriptor>) -> Self {
        let mut layout = ServiceLayout::new();
        for stream in streams {
            layout.try_push(stream);
        }
        layout
    }
}

impl From<ServiceLayout> for Vec<StreamDescriptor> {
    fn from(layout: ServiceLayout) -> Self {
        layout.streams
    }
}

impl<'a> IntoIterator for &'a ServiceLayout {
    type Item = &'a StreamDescriptor;
    type IntoIter = std::slice::Iter<'a, StreamDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.iter()
    }
}

/// Stable identifier of a logical service across tuning sessions.
///
/// Derived from the channel ID string `"<source>-<nid>-<tsid>-<sid>"`,
/// never from the transient PMT PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey(pub u32);

impl ServiceKey {
    pub fn from_channel_id(channel_id: &str) -> Self {
        ServiceKey(crc32_mpeg2(channel_id.as_bytes()))
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Errors raised by layout stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("Layout serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent key-value store for service layouts.
///
/// Implementations serialize their own reads and writes.
pub trait LayoutStore: Send + Sync {
    fn get(&self, key: &ServiceKey) -> StoreResult<Option<ServiceLayout>>;
    fn put(&self, key: &ServiceKey, layout: &ServiceLayout) -> StoreResult<()>;
}

/// In-process layout store.
#[derive(Debug, Default)]
pub struct MemoryLayoutStore {
    layouts: Mutex<HashMap<ServiceKey, ServiceLayout>>,
    writes: Mutex<usize>,
}

impl MemoryLayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served so far.
    #[cfg(test)]
    pub fn write_count(&self) -> usize {
        *self.writes.lock()
    }
}

impl LayoutStore for MemoryLayoutStore {
    fn get(&self, key: &ServiceKey) -> StoreResult<Option<ServiceLayout>> {
        Ok(self.layouts.lock().get(key).cloned())
    }

    fn put(&self, key: &ServiceKey, layout: &ServiceLayout) -> StoreResult<()> {
        self.layouts.lock().insert(*key, layout.clone());
        *self.writes.lock() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_tag_bounded() {
        let mut tag = LanguageTag::default();
        assert!(tag.push("eng"));
        assert!(!tag.push(""));
        assert!(tag.push("deu"));
        assert!(!tag.push("fra"));
        assert_eq!(tag.to_string(), "eng+deu");
        assert_eq!(LanguageTag::from("eng+deu+fra".to_string()).codes().len(), 2);
        assert_eq!(LanguageTag::from(String::new()), LanguageTag::default());
    }

    #[test]
    fn test_layout_truncates_overflow() {
        let mut layout = ServiceLayout::new();
        for pid in 1..=(MAX_STREAMS as u16 + 5) {
            layout.try_push(StreamDescriptor::new(pid, StreamKind::MpegAudio));
        }
        assert_eq!(layout.len(), MAX_STREAMS);
        assert_eq!(layout.streams()[0].pid, 1);
        assert_eq!(layout.streams()[MAX_STREAMS - 1].pid, MAX_STREAMS as u16);
    }

    #[test]
    fn test_layout_equality_is_ordered() {
        let video = StreamDescriptor::new(201, StreamKind::Mpeg2Video);
        let audio = StreamDescriptor::new(202, StreamKind::MpegAudio);
        let a = ServiceLayout::from(vec![video.clone(), audio.clone()]);
        let b = ServiceLayout::from(vec![audio, video]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_layout_json() {
        let mut audio = StreamDescriptor::new(202, StreamKind::MpegAudio);
        audio.language = LanguageTag::single("eng");
        let layout = ServiceLayout::from(vec![StreamDescriptor::new(201, StreamKind::H264Video), audio]);

        let json = serde_json::to_string(&layout).unwrap();
        assert!(json.contains("\"language\":\"eng\""));
        assert!(json.contains("\"kind\":\"h264_video\""));
        let decoded: ServiceLayout = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, layout);
    }

    #[test]
    fn test_service_key_stable() {
        let a = ServiceKey::from_channel_id("S19.2E-1-1079-28006");
        let b = ServiceKey::from_channel_id("S19.2E-1-1079-28006");
        let c = ServiceKey::from_channel_id("S19.2E-1-1079-28007");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string().len(), 8);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryLayoutStore::new();
        let key = ServiceKey(7);
        assert!(store.get(&key).unwrap().is_none());

        let layout = ServiceLayout::from(vec![StreamDescriptor::new(100, StreamKind::Teletext)]);
        store.put(&key, &layout).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(layout));
        assert_eq!(store.write_count(), 1);
    }
}
