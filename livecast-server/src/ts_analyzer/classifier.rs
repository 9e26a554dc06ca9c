//! Elementary stream classification.
//!
//! Decides, for one PMT entry, whether the stream can be served to clients
//! and what kind, language and subtitle attributes it carries.

use log::{debug, trace};

use super::descriptor_tag;
use super::descriptors::{Iso639LanguageDescriptor, SubtitlingDescriptor};
use super::pmt::{stream_type, PmtStream};
use crate::layout::{LanguageTag, StreamDescriptor, StreamKind};

/// Registration format identifier announcing AC-3 audio in the user-private range.
const AC3_FORMAT_IDENTIFIER: &[u8] = b"AC-3";

/// Classify one PMT stream entry.
///
/// Returns `None` when the stream is rejected.
pub fn classify(stream: &PmtStream) -> Option<StreamDescriptor> {
    let pid = stream.elementary_pid;
    if pid == 0 {
        return None;
    }

    let classified = match stream.stream_type {
        stream_type::MPEG1_VIDEO | stream_type::MPEG2_VIDEO | stream_type::DIGICIPHER_VIDEO => {
            Some(StreamDescriptor::new(pid, StreamKind::Mpeg2Video))
        }
        stream_type::H264_VIDEO => Some(StreamDescriptor::new(pid, StreamKind::H264Video)),

        stream_type::MPEG1_AUDIO | stream_type::MPEG2_AUDIO => {
            Some(with_language(stream, StreamKind::MpegAudio))
        }
        stream_type::AAC_AUDIO => Some(with_language(stream, StreamKind::AacAudio)),
        stream_type::AAC_LATM => Some(with_language(stream, StreamKind::LatmAudio)),

        stream_type::MHEG
        | stream_type::DSMCC
        | stream_type::DSMCC_A..=stream_type::AUXILIARY
        | stream_type::MPEG4_VIDEO => {
            debug!("PMT scanner: skipping PID {} (type 0x{:02X})", pid, stream.stream_type);
            None
        }

        stream_type::PRIVATE_SECTIONS | stream_type::PES_PRIVATE_DATA => classify_private(stream),

        t if t >= stream_type::USER_PRIVATE => classify_registered(stream),

        _ => None,
    };

    match &classified {
        Some(desc) => debug!(
            "PMT scanner: adding PID {} (type 0x{:02X}) {} ({})",
            pid, stream.stream_type, desc.kind, desc.language
        ),
        None => trace!(
            "PMT scanner: not adding PID {} (type 0x{:02X})",
            pid, stream.stream_type
        ),
    }

    classified
}

/// Descriptor of the given kind, with language and audio type taken from
/// the first ISO 639 language descriptor.
fn with_language(stream: &PmtStream, kind: StreamKind) -> StreamDescriptor {
    let mut desc = StreamDescriptor::new(stream.elementary_pid, kind);
    if let Some(ld) = Iso639LanguageDescriptor::find_in(stream.descriptors()) {
        desc.language = LanguageTag::single(ld.language().unwrap_or_default());
        desc.audio_type = ld.audio_type();
    }
    desc
}

/// Private data streams are identified by the first codec descriptor present.
fn classify_private(stream: &PmtStream) -> Option<StreamDescriptor> {
    for d in stream.descriptors() {
        match d.tag {
            descriptor_tag::AC3 => return Some(with_language(stream, StreamKind::Ac3Audio)),
            descriptor_tag::ENHANCED_AC3 => {
                return Some(with_language(stream, StreamKind::Eac3Audio))
            }
            descriptor_tag::DTS => return Some(with_language(stream, StreamKind::DtsAudio)),
            descriptor_tag::AAC => return Some(with_language(stream, StreamKind::AacAudio)),
            descriptor_tag::TELETEXT => {
                return Some(StreamDescriptor::new(stream.elementary_pid, StreamKind::Teletext))
            }
            descriptor_tag::SUBTITLING => {
                let mut desc = StreamDescriptor::new(stream.elementary_pid, StreamKind::DvbSubtitle);
                let sd = SubtitlingDescriptor::parse(d.data);
                let mut first = true;
                for entry in sd.entries.iter().filter(|e| !e.language.is_empty()) {
                    if first {
                        desc.subtitling_type = entry.subtitling_type;
                        desc.composition_page_id = entry.composition_page_id;
                        desc.ancillary_page_id = entry.ancillary_page_id;
                        first = false;
                    }
                    if !desc.language.push(entry.language.as_str()) {
                        break;
                    }
                }
                return Some(desc);
            }
            other => trace!(
                "PMT scanner: PID {} ignoring descriptor 0x{:02X}",
                stream.elementary_pid, other
            ),
        }
    }
    None
}

/// User-private stream types are accepted only when a registration
/// descriptor announces AC-3.
///
/// The format identifier is compared at offsets 2..6 of the raw descriptor,
/// header bytes included.
fn classify_registered(stream: &PmtStream) -> Option<StreamDescriptor> {
    let found = stream
        .descriptors()
        .filter(|d| d.tag == descriptor_tag::REGISTRATION && d.raw.len() >= 4)
        .any(|d| d.raw.get(2..6) == Some(AC3_FORMAT_IDENTIFIER));

    if found {
        Some(StreamDescriptor::new(stream.elementary_pid, StreamKind::Ac3Audio))
    } else {
        debug!(
            "PMT scanner: no AC-3 registration on PID {} (type 0x{:02X})",
            stream.elementary_pid, stream.stream_type
        );
        None
    }
}
