//! Live streamer: the stream sink of one live service.
//!
//! The streamer owns one demultiplexer slot per classified stream. The
//! scanner replaces the slots whenever the layout changes and flags a
//! pending reconfiguration, which the client session picks up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, info};
use parking_lot::{Mutex, MutexGuard};

use crate::layout::{ServiceLayout, StreamDescriptor};
use crate::ts_analyzer::StreamSink;

/// Demultiplexer slot for one elementary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demuxer {
    pub stream: StreamDescriptor,
    /// Packets routed to this slot.
    pub packets: u64,
}

/// Stream sink of one live service.
#[derive(Debug, Default)]
pub struct LiveStreamer {
    name: String,
    filter_lock: Mutex<()>,
    demuxers: Mutex<Vec<Demuxer>>,
    reconfigure: AtomicBool,
    reconfigurations: AtomicU64,
}

impl LiveStreamer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Snapshot of the current demultiplexer slots.
    pub fn demuxers(&self) -> Vec<Demuxer> {
        self.demuxers.lock().clone()
    }

    /// Route a TS packet's PID; returns true if a slot exists for it.
    pub fn route(&self, pid: u16) -> bool {
        let mut demuxers = self.demuxers.lock();
        match demuxers.iter_mut().find(|d| d.stream.pid == pid) {
            Some(demuxer) => {
                demuxer.packets += 1;
                true
            }
            None => false,
        }
    }

    /// Return and clear a pending reconfiguration request.
    pub fn take_reconfiguration_request(&self) -> bool {
        self.reconfigure.swap(false, Ordering::AcqRel)
    }

    /// Total number of reconfiguration requests received.
    pub fn reconfiguration_count(&self) -> u64 {
        self.reconfigurations.load(Ordering::Relaxed)
    }
}

impl StreamSink for LiveStreamer {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.filter_lock.lock()
    }

    fn materialize_streams(&self, layout: &ServiceLayout) {
        let mut demuxers = self.demuxers.lock();
        demuxers.clear();
        for stream in layout {
            debug!(
                "[{}] demuxer for PID {} ({} {})",
                self.name, stream.pid, stream.kind, stream.language
            );
            demuxers.push(Demuxer {
                stream: stream.clone(),
                packets: 0,
            });
        }
    }

    fn request_reconfiguration(&self) {
        self.reconfigure.store(true, Ordering::Release);
        let n = self.reconfigurations.fetch_add(1, Ordering::Relaxed) + 1;
        info!("[{}] stream change requested (#{})", self.name, n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StreamKind;

    #[test]
    fn test_materialize_replaces_demuxers() {
        let streamer = LiveStreamer::new("test");
        let layout = ServiceLayout::from(vec![
            StreamDescriptor::new(201, StreamKind::Mpeg2Video),
            StreamDescriptor::new(202, StreamKind::MpegAudio),
        ]);

        {
            let _guard = streamer.lock();
            streamer.materialize_streams(&layout);
            streamer.request_reconfiguration();
        }
        assert_eq!(streamer.demuxers().len(), 2);
        assert!(streamer.route(202));
        assert!(!streamer.route(203));
        assert_eq!(streamer.demuxers()[1].packets, 1);

        streamer.materialize_streams(&ServiceLayout::from(vec![StreamDescriptor::new(
            301,
            StreamKind::H264Video,
        )]));
        assert_eq!(streamer.demuxers().len(), 1);
        assert!(!streamer.route(202));
    }

    #[test]
    fn test_reconfiguration_request_is_taken_once() {
        let streamer = LiveStreamer::new("test");
        assert!(!streamer.take_reconfiguration_request());
        streamer.request_reconfiguration();
        assert!(streamer.take_reconfiguration_request());
        assert!(!streamer.take_reconfiguration_request());
        assert_eq!(streamer.reconfiguration_count(), 1);
    }
}
