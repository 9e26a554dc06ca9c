//! PMT (Program Map Table) parsing.
//!
//! The PMT lists the elementary streams of one service together with the
//! descriptor loop attached to each of them.

use super::descriptors::DescriptorLoop;
use super::psi::{PsiError, PsiSection};
use super::table_id;

/// Stream type codes found in the PMT elementary stream loop.
pub mod stream_type {
    /// MPEG-1 Video.
    pub const MPEG1_VIDEO: u8 = 0x01;
    /// MPEG-2 Video.
    pub const MPEG2_VIDEO: u8 = 0x02;
    /// MPEG-1 Audio.
    pub const MPEG1_AUDIO: u8 = 0x03;
    /// MPEG-2 Audio.
    pub const MPEG2_AUDIO: u8 = 0x04;
    /// MPEG-2 Private Sections.
    pub const PRIVATE_SECTIONS: u8 = 0x05;
    /// MPEG-2 PES Private Data.
    pub const PES_PRIVATE_DATA: u8 = 0x06;
    /// MHEG.
    pub const MHEG: u8 = 0x07;
    /// DSM-CC (ISO/IEC 13818-1 Annex A).
    pub const DSMCC: u8 = 0x08;
    /// DSM-CC type A (start of the DSM-CC range 0x0A-0x0D).
    pub const DSMCC_A: u8 = 0x0A;
    /// MPEG-2 auxiliary.
    pub const AUXILIARY: u8 = 0x0E;
    /// AAC Audio (ADTS).
    pub const AAC_AUDIO: u8 = 0x0F;
    /// MPEG-4 Visual.
    pub const MPEG4_VIDEO: u8 = 0x10;
    /// AAC Audio (LATM).
    pub const AAC_LATM: u8 = 0x11;
    /// H.264/AVC Video.
    pub const H264_VIDEO: u8 = 0x1B;
    /// ATSC DigiCipher II MPEG-2 Video.
    pub const DIGICIPHER_VIDEO: u8 = 0x80;
    /// First code of the user-private range identified by registration descriptors.
    pub const USER_PRIVATE: u8 = 0x81;
}

/// A single elementary stream entry in the PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    /// Stream type.
    pub stream_type: u8,
    /// Elementary PID.
    pub elementary_pid: u16,
    /// Raw ES info descriptor loop.
    pub descriptors: Vec<u8>,
}

impl PmtStream {
    /// Iterate the ES info descriptors of this stream.
    pub fn descriptors(&self) -> DescriptorLoop<'_> {
        DescriptorLoop::new(&self.descriptors)
    }
}

/// Parsed PMT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmtTable {
    /// Program number (service ID).
    pub program_number: u16,
    /// Version number.
    pub version_number: u8,
    /// PCR PID.
    pub pcr_pid: u16,
    /// Program info descriptors.
    pub program_info: Vec<u8>,
    /// Elementary streams in transmission order.
    pub streams: Vec<PmtStream>,
}

impl PmtTable {
    /// Parse a PMT from a PSI section.
    ///
    /// A truncated trailing stream entry ends the loop without failing the
    /// whole table.
    pub fn parse(section: &PsiSection) -> Result<Self, PsiError> {
        if section.header.table_id != table_id::PMT {
            return Err(PsiError::WrongTable {
                expected: table_id::PMT,
                actual: section.header.table_id,
            });
        }

        let data = section.data;
        if data.len() < 4 {
            return Err(PsiError::TooShort("PMT header"));
        }

        let pcr_pid = u16::from_be_bytes([data[0] & 0x1F, data[1]]);
        let program_info_length = (((data[2] & 0x0F) as usize) << 8) | data[3] as usize;
        let program_info = data
            .get(4..4 + program_info_length)
            .ok_or(PsiError::InvalidLength("program info"))?
            .to_vec();

        let mut streams = Vec::new();
        let mut rest = &data[4 + program_info_length..];
        while rest.len() >= 5 {
            let stream_type = rest[0];
            let elementary_pid = u16::from_be_bytes([rest[1] & 0x1F, rest[2]]);
            let es_info_length = (((rest[3] & 0x0F) as usize) << 8) | rest[4] as usize;

            let Some(descriptors) = rest.get(5..5 + es_info_length) else {
                break;
            };
            streams.push(PmtStream {
                stream_type,
                elementary_pid,
                descriptors: descriptors.to_vec(),
            });
            rest = &rest[5 + es_info_length..];
        }

        Ok(PmtTable {
            program_number: section.header.table_id_extension,
            version_number: section.header.version_number,
            pcr_pid,
            program_info,
            streams,
        })
    }
}
