//! PAT (Program Association Table) parsing.
//!
//! The PAT is carried on PID 0x0000 and maps each service (program number)
//! to the PID on which that service's PMT is transmitted.

use super::psi::{PsiError, PsiSection};
use super::table_id;

/// One association entry of the PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    /// Program number (service ID).
    pub program_number: u16,
    /// PID carrying the PMT of this program.
    pub pmt_pid: u16,
}

/// Parsed PAT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatTable {
    /// Transport stream ID (table ID extension).
    pub transport_stream_id: u16,
    /// Version number.
    pub version_number: u8,
    /// Service entries in transmission order; program 0 is not included.
    pub programs: Vec<PatEntry>,
    /// NIT PID announced by program 0, if any.
    pub nit_pid: Option<u16>,
}

impl PatTable {
    /// Parse a PAT from a PSI section.
    pub fn parse(section: &PsiSection) -> Result<Self, PsiError> {
        if section.header.table_id != table_id::PAT {
            return Err(PsiError::WrongTable {
                expected: table_id::PAT,
                actual: section.header.table_id,
            });
        }

        // Association loop: 4 bytes per entry
        if section.data.len() % 4 != 0 {
            return Err(PsiError::InvalidLength("PAT association loop"));
        }

        let mut pat = PatTable {
            transport_stream_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            ..Default::default()
        };

        for entry in section.data.chunks_exact(4) {
            let program_number = u16::from_be_bytes([entry[0], entry[1]]);
            let pid = u16::from_be_bytes([entry[2] & 0x1F, entry[3]]);

            if program_number == 0 {
                pat.nit_pid = Some(pid);
            } else {
                pat.programs.push(PatEntry {
                    program_number,
                    pmt_pid: pid,
                });
            }
        }

        Ok(pat)
    }

    /// PMT PID announced for a program number.
    #[cfg(test)]
    pub fn pmt_pid_of(&self, program_number: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == program_number)
            .map(|p| p.pmt_pid)
    }
}
