//! PSI (Program Specific Information) section parsing.
//!
//! This module handles common PSI section header parsing and CRC validation.

use thiserror::Error;

/// Errors raised while parsing PSI sections and the tables inside them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PsiError {
    /// Not enough bytes for the structure being parsed.
    #[error("{0} too short")]
    TooShort(&'static str),

    /// A length field points beyond the available data.
    #[error("Invalid {0} length")]
    InvalidLength(&'static str),

    /// The section carries a different table id than expected.
    #[error("Unexpected table id 0x{actual:02X} (expected 0x{expected:02X})")]
    WrongTable { expected: u8, actual: u8 },

    /// CRC32 did not match the section contents.
    #[error("CRC mismatch: calculated 0x{calculated:08X}, stored 0x{stored:08X}")]
    CrcMismatch { calculated: u32, stored: u32 },
}

/// PSI section header (common to all PSI tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (for long sections).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

/// A parsed PSI section.
#[derive(Debug, Clone)]
pub struct PsiSection<'a> {
    /// Section header.
    pub header: PsiHeader,
    /// Section data (after header, before CRC).
    pub data: &'a [u8],
    /// CRC32 value.
    pub crc32: u32,
}

impl<'a> PsiSection<'a> {
    /// Parse a PSI section from raw bytes.
    ///
    /// # Arguments
    /// * `data` - Slice containing the section data starting from table_id
    pub fn parse(data: &'a [u8]) -> Result<Self, PsiError> {
        if data.len() < 3 {
            return Err(PsiError::TooShort("Section header"));
        }

        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;

        if section_length < 5 {
            return Err(PsiError::InvalidLength("section"));
        }

        let total_length = 3 + section_length as usize;
        if data.len() < total_length {
            return Err(PsiError::TooShort("Section data"));
        }

        let header = if section_syntax_indicator {
            // Long section (with extended header)
            PsiHeader {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
                version_number: (data[5] >> 1) & 0x1F,
                current_next_indicator: data[5] & 0x01 != 0,
                section_number: data[6],
                last_section_number: data[7],
            }
        } else {
            // Short section (no extended header)
            PsiHeader {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: 0,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            }
        };

        // Data range (after header, before CRC)
        let data_start = if section_syntax_indicator { 8 } else { 3 };
        let data_end = total_length - 4;

        if data_end <= data_start {
            return Err(PsiError::TooShort("Section payload"));
        }

        let crc32 = u32::from_be_bytes([
            data[data_end],
            data[data_end + 1],
            data[data_end + 2],
            data[data_end + 3],
        ]);

        Ok(PsiSection {
            header,
            data: &data[data_start..data_end],
            crc32,
        })
    }

    /// Parse a section and reject it unless its CRC32 matches.
    pub fn parse_checked(data: &'a [u8]) -> Result<Self, PsiError> {
        let section = Self::parse(data)?;
        let calculated = crc32_mpeg2(&data[..section.total_length() - 4]);
        if calculated != section.crc32 {
            return Err(PsiError::CrcMismatch {
                calculated,
                stored: section.crc32,
            });
        }
        Ok(section)
    }

    /// Get the total section length including header and CRC.
    pub fn total_length(&self) -> usize {
        3 + self.header.section_length as usize
    }
}

/// Section collector for one PID.
///
/// Reassembles sections spanning several TS packets and splits packets that
/// carry the tail of one section and the start of further ones.
#[derive(Debug, Default)]
pub struct SectionCollector {
    /// Section in progress, starting at its table_id.
    buffer: Vec<u8>,
    /// Last continuity counter.
    last_cc: Option<u8>,
}

impl SectionCollector {
    /// Drop the section in progress and the continuity state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_cc = None;
    }

    /// Add the payload of one TS packet.
    ///
    /// Returns every section completed by this packet, in stream order.
    pub fn push(&mut self, payload: &[u8], cc: u8, payload_unit_start: bool) -> Vec<Vec<u8>> {
        let mut sections = Vec::new();

        if let Some(last) = self.last_cc {
            if cc != (last + 1) & 0x0F {
                // Discontinuity - drop the partial section
                self.buffer.clear();
                if !payload_unit_start {
                    self.last_cc = Some(cc);
                    return sections;
                }
            }
        }
        self.last_cc = Some(cc);

        if !payload_unit_start {
            // No section starts here; anything after the current one is stuffing
            if !self.buffer.is_empty() {
                self.buffer.extend_from_slice(payload);
                sections.extend(self.take_complete());
            }
            return sections;
        }

        let Some((&pointer, rest)) = payload.split_first() else {
            self.buffer.clear();
            return sections;
        };
        let pointer = pointer as usize;
        if pointer > rest.len() {
            self.buffer.clear();
            return sections;
        }

        // Bytes before the pointer finish the section in progress
        if !self.buffer.is_empty() {
            self.buffer.extend_from_slice(&rest[..pointer]);
            sections.extend(self.take_complete());
            self.buffer.clear();
        }

        let mut data = &rest[pointer..];
        while let Some(&table_id) = data.first() {
            if table_id == STUFFING_TABLE_ID {
                break;
            }
            match section_total_length(data) {
                Some(total) if data.len() >= total => {
                    sections.push(data[..total].to_vec());
                    data = &data[total..];
                }
                _ => {
                    self.buffer.extend_from_slice(data);
                    break;
                }
            }
        }

        sections
    }

    fn take_complete(&mut self) -> Option<Vec<u8>> {
        let len = section_total_length(&self.buffer).filter(|&len| self.buffer.len() >= len)?;
        let mut section = std::mem::take(&mut self.buffer);
        section.truncate(len);
        Some(section)
    }
}

/// Table id value used for stuffing after the last section of a packet.
const STUFFING_TABLE_ID: u8 = 0xFF;

/// Section length including the 3-byte header, once the header is present.
fn section_total_length(data: &[u8]) -> Option<usize> {
    (data.len() >= 3).then(|| 3 + (((data[1] as usize) & 0x0F) << 8 | data[2] as usize))
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// Build a complete long-form section around `body`, appending a valid CRC.
#[cfg(test)]
pub(crate) fn build_section(table_id: u8, table_id_extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut section = vec![
        table_id,
        0xB0 | ((section_length >> 8) as u8 & 0x0F),
        section_length as u8,
        (table_id_extension >> 8) as u8,
        table_id_extension as u8,
        0xC1 | ((version & 0x1F) << 1),
        0x00,
        0x00,
    ];
    section.extend_from_slice(body);
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}
