//! Per-service PAT/PMT scanner.
//!
//! The scanner follows the PAT to find the PMT PID of its service, then
//! classifies the PMT streams into a [`ServiceLayout`]. Whenever the layout
//! differs from the last known one (initially the persisted copy), the
//! owning stream sink is asked to reconfigure.
//!
//! ```text
//!   AwaitingDirectory --(PAT names our service)--> AwaitingMap
//!   AwaitingMap --(PMT with a new version)--> AwaitingDirectory
//! ```

use std::sync::Arc;

use log::{debug, info, trace, warn};
use parking_lot::MutexGuard;

use super::classifier::classify;
use super::pat::PatTable;
use super::pmt::PmtTable;
use super::psi::PsiSection;
use super::{pid, table_id};
use crate::directory::{ServiceDirectory, ServiceHandle};
use crate::layout::{LayoutStore, ServiceKey, ServiceLayout};

/// Receiver of complete PSI sections.
pub trait TableConsumer {
    /// (PID, table ID) pairs this consumer currently wants to receive.
    fn subscriptions(&self) -> Vec<(u16, u8)>;

    /// Called once per complete section.
    fn consume(&mut self, pid: u16, table_id: u8, data: &[u8]);
}

/// Owner of the demultiplexers of a live service.
pub trait StreamSink: Send + Sync {
    /// Stream configuration lock. Held while a new layout is applied.
    fn lock(&self) -> MutexGuard<'_, ()>;

    /// Create demultiplexers for every stream of the layout.
    fn materialize_streams(&self, layout: &ServiceLayout);

    /// Ask the session to renegotiate its streams with the client.
    fn request_reconfiguration(&self);
}

/// Result of delivering one section to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Not a section the scanner is waiting for.
    Ignored,
    /// Malformed section, or one that belongs to another service.
    Dropped,
    /// The PAT named our service; the PMT PID is known.
    DirectoryUpdated,
    /// PMT already seen with this version, or layout equal to the baseline.
    Unchanged,
    /// PMT version moved on; the PAT must be scanned again.
    VersionChanged,
    /// A new layout was applied and the sink asked to reconfigure.
    LayoutChanged,
}

/// Table scanner for one live service.
pub struct ServiceScanner {
    service: ServiceHandle,
    key: ServiceKey,
    directory: Arc<dyn ServiceDirectory>,
    store: Arc<dyn LayoutStore>,
    sink: Arc<dyn StreamSink>,
    /// PMT PID; 0 while the PAT is being scanned.
    pmt_pid: u16,
    pmt_sid: u16,
    pmt_version: Option<u8>,
    baseline: ServiceLayout,
    baseline_loaded: bool,
}

impl ServiceScanner {
    pub fn new(
        service: ServiceHandle,
        directory: Arc<dyn ServiceDirectory>,
        store: Arc<dyn LayoutStore>,
        sink: Arc<dyn StreamSink>,
    ) -> Self {
        debug!("PMT scanner created for \"{}\" ({})", service.name, service.channel_id());
        Self {
            key: service.key(),
            service,
            directory,
            store,
            sink,
            pmt_pid: 0,
            pmt_sid: 0,
            pmt_version: None,
            baseline: ServiceLayout::new(),
            baseline_loaded: false,
        }
    }

    /// PMT PID currently tracked, if any.
    pub fn pmt_pid(&self) -> Option<u16> {
        (self.pmt_pid != 0).then_some(self.pmt_pid)
    }

    /// Last applied (or persisted) layout.
    pub fn layout(&self) -> &ServiceLayout {
        &self.baseline
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    /// Process one complete PSI section.
    pub fn deliver(&mut self, pid: u16, table_id: u8, data: &[u8]) -> ScanOutcome {
        if pid == pid::PAT && table_id == table_id::PAT {
            self.on_pat(data)
        } else if self.pmt_pid != 0
            && pid == self.pmt_pid
            && table_id == table_id::PMT
            && self.is_tuned()
        {
            self.on_pmt(data)
        } else {
            ScanOutcome::Ignored
        }
    }

    fn is_tuned(&self) -> bool {
        self.service.source != 0 && self.service.transport_id != 0
    }

    fn on_pat(&mut self, data: &[u8]) -> ScanOutcome {
        let pat = match PsiSection::parse_checked(data).and_then(|s| PatTable::parse(&s)) {
            Ok(pat) => pat,
            Err(e) => {
                trace!("PAT dropped: {}", e);
                return ScanOutcome::Dropped;
            }
        };

        let own_id = self.service.channel_id();
        for entry in &pat.programs {
            let Some(found) = self.directory.lookup_service(
                self.service.source,
                self.service.transport_id,
                entry.program_number,
            ) else {
                continue;
            };
            if found.channel_id() != own_id {
                continue;
            }

            let prev_pid = self.pmt_pid;
            self.pmt_pid = entry.pmt_pid;
            if entry.pmt_pid != 0 {
                self.pmt_sid = entry.program_number;
                if entry.pmt_pid != prev_pid {
                    debug!(
                        "PAT: service {} carries its PMT on PID {}",
                        entry.program_number, entry.pmt_pid
                    );
                    self.pmt_version = None;
                }
                return ScanOutcome::DirectoryUpdated;
            }
        }

        ScanOutcome::Dropped
    }

    fn on_pmt(&mut self, data: &[u8]) -> ScanOutcome {
        let pmt = match PsiSection::parse_checked(data).and_then(|s| PmtTable::parse(&s)) {
            Ok(pmt) => pmt,
            Err(e) => {
                trace!("PMT on PID {} dropped: {}", self.pmt_pid, e);
                return ScanOutcome::Dropped;
            }
        };
        if pmt.program_number != self.pmt_sid {
            return ScanOutcome::Dropped;
        }

        if let Some(version) = self.pmt_version {
            if version != pmt.version_number {
                debug!(
                    "PMT version changed {} -> {}, rescanning PAT",
                    version, pmt.version_number
                );
                self.pmt_pid = 0;
                return ScanOutcome::VersionChanged;
            }
            return ScanOutcome::Unchanged;
        }
        self.pmt_version = Some(pmt.version_number);

        if !self.baseline_loaded {
            self.baseline_loaded = true;
            match self.store.get(&self.key) {
                Ok(Some(layout)) => self.baseline = layout,
                Ok(None) => {}
                Err(e) => warn!("Failed to load cached layout for {}: {}", self.key, e),
            }
        }

        let mut layout = ServiceLayout::new();
        for stream in &pmt.streams {
            if let Some(desc) = classify(stream) {
                if !layout.try_push(desc) {
                    debug!("PMT scanner: stream limit reached, dropping PID {}", stream.elementary_pid);
                }
            }
        }

        let _guard = self.sink.lock();
        if layout == self.baseline {
            return ScanOutcome::Unchanged;
        }

        self.sink.materialize_streams(&layout);

        info!(
            "Stream layout of \"{}\" changed ({} streams), requesting stream change",
            self.service.name,
            layout.len()
        );
        self.baseline = layout;
        if let Err(e) = self.store.put(&self.key, &self.baseline) {
            warn!("Failed to persist layout for {}: {}", self.key, e);
        }

        self.sink.request_reconfiguration();
        ScanOutcome::LayoutChanged
    }
}

impl TableConsumer for ServiceScanner {
    fn subscriptions(&self) -> Vec<(u16, u8)> {
        let mut subs = vec![(pid::PAT, table_id::PAT)];
        if self.pmt_pid != 0 {
            subs.push((self.pmt_pid, table_id::PMT));
        }
        subs
    }

    fn consume(&mut self, pid: u16, table_id: u8, data: &[u8]) {
        self.deliver(pid, table_id, data);
    }
}
