//! Service (channel) directory.
//!
//! The directory resolves broadcast identifiers to services and exposes a
//! modification generation that the server polls to notify clients.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Deserialize;

use crate::layout::ServiceKey;

/// A service known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ServiceHandle {
    /// Signal source code (satellite position, cable, terrestrial).
    pub source: u32,
    /// Original network ID.
    pub network_id: u16,
    /// Transport stream ID (the transponder carrying the service).
    pub transport_id: u16,
    /// Service ID (PAT program number).
    pub service_id: u16,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

impl ServiceHandle {
    /// Channel ID string `"<source>-<nid>-<tsid>-<sid>"`.
    pub fn channel_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.source, self.network_id, self.transport_id, self.service_id
        )
    }

    /// Stable key under which this service's layout is persisted.
    pub fn key(&self) -> ServiceKey {
        ServiceKey::from_channel_id(&self.channel_id())
    }
}

/// Read access to the host's service directory.
pub trait ServiceDirectory: Send + Sync {
    /// Find the service broadcast as `service_id` on the given transponder.
    fn lookup_service(&self, source: u32, transponder: u16, service_id: u16) -> Option<ServiceHandle>;

    /// Modification counter; changes whenever the directory is edited.
    fn generation(&self) -> u64;
}

/// In-memory service directory.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    channels: RwLock<Vec<ServiceHandle>>,
    generation: AtomicU64,
}

impl ChannelDirectory {
    pub fn new(channels: Vec<ServiceHandle>) -> Self {
        Self {
            channels: RwLock::new(channels),
            generation: AtomicU64::new(0),
        }
    }

    /// Add or replace a service (matched by channel ID).
    pub fn upsert(&self, service: ServiceHandle) {
        let mut channels = self.channels.write();
        match channels
            .iter_mut()
            .find(|c| c.channel_id() == service.channel_id())
        {
            Some(existing) => *existing = service,
            None => channels.push(service),
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove a service. Returns false if it was not present.
    #[cfg(test)]
    pub fn remove(&self, service: &ServiceHandle) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c != service);
        let removed = channels.len() != before;
        if removed {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Find a service by service ID alone.
    pub fn find_by_service_id(&self, service_id: u16) -> Option<ServiceHandle> {
        self.channels
            .read()
            .iter()
            .find(|c| c.service_id == service_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

impl ServiceDirectory for ChannelDirectory {
    fn lookup_service(&self, source: u32, transponder: u16, service_id: u16) -> Option<ServiceHandle> {
        self.channels
            .read()
            .iter()
            .find(|c| c.source == source && c.transport_id == transponder && c.service_id == service_id)
            .cloned()
    }

    fn generation(&self) -> u64 {
        let _channels = self.channels.read();
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(sid: u16) -> ServiceHandle {
        ServiceHandle {
            source: 0x5300_00C0,
            network_id: 1,
            transport_id: 1079,
            service_id: sid,
            name: format!("Service {}", sid),
        }
    }

    #[test]
    fn test_channel_id_and_key() {
        let s = service(28006);
        assert_eq!(s.channel_id(), "1392509120-1-1079-28006");
        assert_eq!(s.key(), ServiceKey::from_channel_id("1392509120-1-1079-28006"));
        assert_ne!(s.key(), service(28007).key());
    }

    #[test]
    fn test_lookup_matches_all_identifiers() {
        let dir = ChannelDirectory::new(vec![service(1), service(2)]);
        assert_eq!(dir.lookup_service(0x5300_00C0, 1079, 2), Some(service(2)));
        assert_eq!(dir.lookup_service(0x5300_00C0, 1080, 2), None);
        assert_eq!(dir.lookup_service(0, 1079, 2), None);
        assert_eq!(dir.find_by_service_id(1), Some(service(1)));
    }

    #[test]
    fn test_generation_advances_on_edit() {
        let dir = ChannelDirectory::new(vec![service(1)]);
        let g0 = dir.generation();

        let mut renamed = service(1);
        renamed.name = "Renamed".to_string();
        dir.upsert(renamed);
        assert_eq!(dir.len(), 1);
        assert!(dir.generation() > g0);

        let g1 = dir.generation();
        assert!(!dir.remove(&service(9)));
        assert_eq!(dir.generation(), g1);
        dir.upsert(service(2));
        assert_eq!(dir.len(), 2);
        assert!(dir.generation() > g1);
    }
}
