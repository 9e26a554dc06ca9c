//! Descriptor parsing for PMT elementary stream loops.
//!
//! Descriptors are decoded one at a time from the raw loop into owned
//! values; nothing borrows past a single iteration step except the raw
//! byte slices handed out by [`DescriptorLoop`].

use super::descriptor_tag;
use super::psi::PsiError;

/// One descriptor as it appears in a descriptor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor<'a> {
    /// Descriptor tag.
    pub tag: u8,
    /// Descriptor payload (after tag and length bytes).
    pub data: &'a [u8],
    /// The whole descriptor including its 2-byte header.
    pub raw: &'a [u8],
}

/// Iterator over the descriptors of a descriptor loop.
///
/// Stops at the first descriptor whose length runs past the loop.
#[derive(Debug, Clone)]
pub struct DescriptorLoop<'a> {
    rest: &'a [u8],
}

impl<'a> DescriptorLoop<'a> {
    /// Walk the given raw descriptor loop.
    pub fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }

    /// First descriptor with the given tag.
    pub fn find_tag(mut self, tag: u8) -> Option<RawDescriptor<'a>> {
        self.find(|d| d.tag == tag)
    }
}

impl<'a> Iterator for DescriptorLoop<'a> {
    type Item = RawDescriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < 2 {
            return None;
        }

        let length = self.rest[1] as usize;
        let Some(raw) = self.rest.get(..2 + length) else {
            self.rest = &[];
            return None;
        };
        self.rest = &self.rest[2 + length..];

        Some(RawDescriptor {
            tag: raw[0],
            data: &raw[2..],
            raw,
        })
    }
}

/// Normalize a 3-byte ISO 639 language code.
///
/// Codes are lowercased; anything that is not three ASCII letters becomes
/// `"und"`. All-zero codes yield an empty string.
pub fn normalize_language_code(code: [u8; 3]) -> String {
    if code[0] == 0 {
        return String::new();
    }
    if code.iter().all(u8::is_ascii_alphabetic) {
        code.iter().map(|c| c.to_ascii_lowercase() as char).collect()
    } else {
        "und".to_string()
    }
}

/// ISO 639 language descriptor (0x0A).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Iso639LanguageDescriptor {
    /// (language code, audio type) pairs in transmission order.
    pub entries: Vec<(String, u8)>,
}

impl Iso639LanguageDescriptor {
    /// Parse the descriptor payload.
    pub fn parse(data: &[u8]) -> Result<Self, PsiError> {
        if data.len() < 4 {
            return Err(PsiError::TooShort("ISO 639 language descriptor"));
        }

        let entries = data
            .chunks_exact(4)
            .map(|e| (normalize_language_code([e[0], e[1], e[2]]), e[3]))
            .collect();

        Ok(Self { entries })
    }

    /// Language code of the first entry.
    pub fn language(&self) -> Option<&str> {
        self.entries.first().map(|(lang, _)| lang.as_str())
    }

    /// Audio type of the first entry.
    pub fn audio_type(&self) -> u8 {
        self.entries.first().map(|&(_, t)| t).unwrap_or(0)
    }

    /// Parse the first ISO 639 descriptor of a loop, if one is present and valid.
    pub fn find_in(descriptors: DescriptorLoop<'_>) -> Option<Self> {
        descriptors
            .find_tag(descriptor_tag::ISO_639_LANGUAGE)
            .and_then(|d| Self::parse(d.data).ok())
    }
}

/// One entry of a subtitling descriptor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitlingEntry {
    /// Normalized language code; empty when the code bytes were zero.
    pub language: String,
    /// Subtitling type.
    pub subtitling_type: u8,
    /// Composition page ID.
    pub composition_page_id: u16,
    /// Ancillary page ID.
    pub ancillary_page_id: u16,
}

/// DVB subtitling descriptor (0x59).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtitlingDescriptor {
    /// Subtitling entries in transmission order.
    pub entries: Vec<SubtitlingEntry>,
}

impl SubtitlingDescriptor {
    /// Parse the descriptor payload. Trailing partial entries are ignored.
    pub fn parse(data: &[u8]) -> Self {
        let entries = data
            .chunks_exact(8)
            .map(|e| SubtitlingEntry {
                language: normalize_language_code([e[0], e[1], e[2]]),
                subtitling_type: e[3],
                composition_page_id: u16::from_be_bytes([e[4], e[5]]),
                ancillary_page_id: u16::from_be_bytes([e[6], e[7]]),
            })
            .collect();

        Self { entries }
    }
}
