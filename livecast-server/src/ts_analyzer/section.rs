//! TS packet to PSI section assembly.
//!
//! [`SectionFilter`] splits a transport stream into packets, reassembles
//! sections on the PIDs a [`TableConsumer`] subscribes to, and hands every
//! complete section with a subscribed table ID to the consumer.

use std::collections::HashMap;

use log::trace;

use super::pid;
use super::psi::SectionCollector;
use super::scanner::TableConsumer;

/// TS packet size.
pub const TS_PACKET_SIZE: usize = 188;
/// TS sync byte.
pub const SYNC_BYTE: u8 = 0x47;

/// Section filter feeding a table consumer.
#[derive(Debug, Default)]
pub struct SectionFilter {
    /// Section collectors by PID.
    collectors: HashMap<u16, SectionCollector>,
    /// Tail of the previous feed that did not form a whole packet.
    pending: Vec<u8>,
    /// Sections delivered so far.
    sections_delivered: u64,
}

impl SectionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sections handed to consumers.
    pub fn sections_delivered(&self) -> u64 {
        self.sections_delivered
    }

    /// Feed raw TS data. Data may be split at arbitrary byte boundaries.
    pub fn feed<C: TableConsumer>(&mut self, data: &[u8], consumer: &mut C) {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(data);

        let mut offset = 0;
        while offset + TS_PACKET_SIZE <= buf.len() {
            if buf[offset] != SYNC_BYTE {
                // Lost sync, resync
                offset += 1;
                continue;
            }
            self.process_packet(&buf[offset..offset + TS_PACKET_SIZE], consumer);
            offset += TS_PACKET_SIZE;
        }

        buf.drain(..offset);
        self.pending = buf;
    }

    fn process_packet<C: TableConsumer>(&mut self, packet: &[u8], consumer: &mut C) {
        let transport_error = packet[1] & 0x80 != 0;
        let payload_unit_start = packet[1] & 0x40 != 0;
        let pid_val = ((packet[1] as u16 & 0x1F) << 8) | packet[2] as u16;
        let scrambling = (packet[3] >> 6) & 0x03;
        let adaptation_field = (packet[3] >> 4) & 0x03;
        let continuity_counter = packet[3] & 0x0F;

        if transport_error || scrambling != 0 || pid_val == pid::NULL {
            return;
        }

        if !consumer.subscriptions().iter().any(|&(p, _)| p == pid_val) {
            return;
        }

        let payload_offset = match adaptation_field {
            0b01 => 4,
            0b11 => 5 + packet[4] as usize,
            // No payload
            _ => return,
        };
        let Some(payload) = packet.get(payload_offset..).filter(|p| !p.is_empty()) else {
            return;
        };

        let sections = self
            .collectors
            .entry(pid_val)
            .or_default()
            .push(payload, continuity_counter, payload_unit_start);

        for section in sections {
            let table_id = section[0];
            // Subscriptions can change with every delivered section
            if !consumer
                .subscriptions()
                .iter()
                .any(|&(p, t)| p == pid_val && t == table_id)
            {
                trace!("Section filter: PID {} table 0x{:02X} not subscribed", pid_val, table_id);
                continue;
            }

            self.sections_delivered += 1;
            consumer.consume(pid_val, table_id, &section);
        }
    }
}

/// Packetize a single section onto `pid`, starting at continuity counter `cc`.
#[cfg(test)]
pub(crate) fn packetize(pid: u16, section: &[u8], mut cc: u8) -> Vec<u8> {
    let mut out = Vec::new();
    let mut first = true;
    let mut rest = section;
    loop {
        let mut packet = vec![SYNC_BYTE, (pid >> 8) as u8 & 0x1F, pid as u8, 0x10 | (cc & 0x0F)];
        if first {
            packet[1] |= 0x40;
            packet.push(0); // pointer field
        }
        let room = TS_PACKET_SIZE - packet.len();
        let take = room.min(rest.len());
        packet.extend_from_slice(&rest[..take]);
        packet.resize(TS_PACKET_SIZE, 0xFF);
        out.extend_from_slice(&packet);

        rest = &rest[take..];
        first = false;
        cc = (cc + 1) & 0x0F;
        if rest.is_empty() {
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts_analyzer::psi::build_section;
    use crate::ts_analyzer::table_id;

    #[derive(Default)]
    struct Collect {
        subscriptions: Vec<(u16, u8)>,
        sections: Vec<(u16, u8, Vec<u8>)>,
    }

    impl TableConsumer for Collect {
        fn subscriptions(&self) -> Vec<(u16, u8)> {
            self.subscriptions.clone()
        }

        fn consume(&mut self, pid: u16, table_id: u8, data: &[u8]) {
            self.sections.push((pid, table_id, data.to_vec()));
        }
    }

    #[test]
    fn test_single_packet_section() {
        let pat = build_section(table_id::PAT, 1, 0, &[0x00, 0x01, 0xE0, 0x65]);
        let mut consumer = Collect {
            subscriptions: vec![(0, table_id::PAT)],
            ..Default::default()
        };
        let mut filter = SectionFilter::new();

        filter.feed(&packetize(0, &pat, 0), &mut consumer);
        assert_eq!(consumer.sections, vec![(0, table_id::PAT, pat)]);
        assert_eq!(filter.sections_delivered(), 1);
    }

    #[test]
    fn test_multi_packet_section_split_feed() {
        let pmt = build_section(table_id::PMT, 1, 0, &[0u8; 400]);
        let ts = packetize(101, &pmt, 7);
        assert_eq!(ts.len(), 3 * TS_PACKET_SIZE);

        let mut consumer = Collect {
            subscriptions: vec![(101, table_id::PMT)],
            ..Default::default()
        };
        let mut filter = SectionFilter::new();
        for chunk in ts.chunks(100) {
            filter.feed(chunk, &mut consumer);
        }
        assert_eq!(consumer.sections.len(), 1);
        assert_eq!(consumer.sections[0].2, pmt);
    }

    #[test]
    fn test_unsubscribed_pid_and_table_skipped() {
        let pmt = build_section(table_id::PMT, 1, 0, &[0xE1, 0x00, 0xF0, 0x00]);
        let mut consumer = Collect {
            subscriptions: vec![(0, table_id::PAT)],
            ..Default::default()
        };
        let mut filter = SectionFilter::new();

        filter.feed(&packetize(101, &pmt, 0), &mut consumer);
        // Right PID, wrong table
        filter.feed(&packetize(0, &pmt, 0), &mut consumer);
        assert!(consumer.sections.is_empty());
    }

    #[test]
    fn test_resync_after_garbage() {
        let pat = build_section(table_id::PAT, 1, 0, &[0x00, 0x01, 0xE0, 0x65]);
        let mut ts = vec![0x00, 0x12, 0x34];
        ts.extend_from_slice(&packetize(0, &pat, 0));

        let mut consumer = Collect {
            subscriptions: vec![(0, table_id::PAT)],
            ..Default::default()
        };
        SectionFilter::new().feed(&ts, &mut consumer);
        assert_eq!(consumer.sections.len(), 1);
    }

    #[test]
    fn test_section_tail_shares_packet_with_next_section() {
        let long = build_section(table_id::PMT, 1, 0, &[0u8; 188]);
        let short = build_section(table_id::PMT, 1, 1, &[0u8; 20]);

        // First packet: pointer 0 and the first 183 bytes of the long section
        let mut ts = packetize(101, &long[..183], 4);
        // Second packet: pointer 17, the 17-byte tail, then the short section
        let mut packet = vec![SYNC_BYTE, 0x40, 101, 0x15, 17];
        packet.extend_from_slice(&long[183..]);
        packet.extend_from_slice(&short);
        packet.resize(TS_PACKET_SIZE, 0xFF);
        ts.extend_from_slice(&packet);

        let mut consumer = Collect {
            subscriptions: vec![(101, table_id::PMT)],
            ..Default::default()
        };
        let mut filter = SectionFilter::new();
        filter.feed(&ts, &mut consumer);

        let delivered: Vec<Vec<u8>> = consumer.sections.into_iter().map(|(_, _, s)| s).collect();
        assert_eq!(delivered, vec![long, short]);
        assert_eq!(filter.sections_delivered(), 2);
    }
}
