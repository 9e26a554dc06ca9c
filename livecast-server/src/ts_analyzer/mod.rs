//! MPEG-TS signaling table analysis.
//!
//! This module turns PSI sections into a classified stream layout for one
//! live service.
//!
//! # Supported Tables
//! - PAT (Program Association Table) - PID 0x0000
//! - PMT (Program Map Table) - Variable PIDs from PAT
//!
//! # Usage
//! ```ignore
//! let mut scanner = ServiceScanner::new(service, directory, store, sink);
//! let mut filter = SectionFilter::new();
//! filter.feed(&ts_data, &mut scanner);
//! ```

mod classifier;
mod descriptors;
mod pat;
mod pmt;
mod psi;
mod scanner;
mod section;

pub use psi::crc32_mpeg2;
pub use scanner::{ServiceScanner, StreamSink};
pub use section::{SectionFilter, SYNC_BYTE, TS_PACKET_SIZE};

/// Well-known PIDs in MPEG-TS.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;
}

/// Table IDs for PSI tables.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
}

/// Descriptor tags used in PMT elementary stream loops.
pub mod descriptor_tag {
    /// Registration descriptor (0x05).
    pub const REGISTRATION: u8 = 0x05;
    /// ISO 639 language descriptor (0x0A).
    pub const ISO_639_LANGUAGE: u8 = 0x0A;
    /// Teletext descriptor (0x56).
    pub const TELETEXT: u8 = 0x56;
    /// Subtitling descriptor (0x59).
    pub const SUBTITLING: u8 = 0x59;
    /// AC-3 descriptor (0x6A).
    pub const AC3: u8 = 0x6A;
    /// Enhanced AC-3 descriptor (0x7A).
    pub const ENHANCED_AC3: u8 = 0x7A;
    /// DTS descriptor (0x7B).
    pub const DTS: u8 = 0x7B;
    /// AAC descriptor (0x7C).
    pub const AAC: u8 = 0x7C;
}
