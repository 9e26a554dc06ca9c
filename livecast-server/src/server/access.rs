//! Access list of hosts allowed to connect.
//!
//! The list is read from `<config_dir>/allowed_hosts.conf`, falling back to
//! the host-wide `<config_dir>/../svdrphosts.conf`. A file that cannot be
//! read, holds an invalid entry or holds no entry at all is skipped. When
//! neither file is usable, only the loopback address 127.0.0.1 is allowed.
//!
//! File format: one `address[/mask-bits]` per line, `#` starts a comment.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use thiserror::Error;

/// Access list file in the server's own configuration directory.
pub const ALLOWED_HOSTS_FILE: &str = "allowed_hosts.conf";
/// Host-wide access list, relative to the parent of the configuration directory.
pub const SHARED_HOSTS_FILE: &str = "svdrphosts.conf";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AccessListError {
    #[error("invalid entry '{0}'")]
    InvalidEntry(String),

    #[error("no entries")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HostEntry {
    network: u32,
    mask: u32,
}

impl HostEntry {
    fn parse(text: &str) -> Option<Self> {
        let (addr, bits) = match text.split_once('/') {
            Some((addr, bits)) => (addr, bits.trim().parse::<u32>().ok().filter(|b| *b <= 32)?),
            None => (text, 32),
        };
        let addr: Ipv4Addr = addr.trim().parse().ok()?;
        let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
        Some(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }

    fn matches(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask == self.network
    }
}

/// Hosts allowed to connect to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedHosts {
    entries: Vec<HostEntry>,
    source: Option<PathBuf>,
}

impl AllowedHosts {
    /// Only 127.0.0.1.
    pub fn localhost_only() -> Self {
        Self {
            entries: vec![HostEntry {
                network: u32::from(Ipv4Addr::LOCALHOST),
                mask: u32::MAX,
            }],
            source: None,
        }
    }

    /// Parse an access list. Any invalid line rejects the whole list.
    pub fn parse(text: &str) -> Result<Self, AccessListError> {
        let entries = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(|line| {
                HostEntry::parse(line).ok_or_else(|| AccessListError::InvalidEntry(line.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if entries.is_empty() {
            return Err(AccessListError::Empty);
        }
        Ok(Self {
            entries,
            source: None,
        })
    }

    /// Load the access list for the given configuration directory.
    pub fn load(config_dir: &Path) -> Self {
        let candidates = [
            config_dir.join(ALLOWED_HOSTS_FILE),
            config_dir.join("..").join(SHARED_HOSTS_FILE),
        ];

        for path in candidates {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    debug!("Access list {} not readable: {}", path.display(), e);
                    continue;
                }
            };
            match Self::parse(&text) {
                Ok(mut hosts) => {
                    debug!("Access list loaded from {} ({} entries)", path.display(), hosts.entry_count());
                    hosts.source = Some(path);
                    return hosts;
                }
                Err(e) => warn!("Access list {} skipped: {}", path.display(), e),
            }
        }

        warn!("No usable access list found, only allowing 127.0.0.1");
        Self::localhost_only()
    }

    /// Whether a peer with this address may connect.
    pub fn is_acceptable(&self, addr: IpAddr) -> bool {
        let v4 = match addr {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };
        self.entries.iter().any(|e| e.matches(v4))
    }

    /// File the list was read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_entries_and_masks() {
        let hosts = AllowedHosts::parse(
            "# local network\n\
             192.168.1.0/24\n\
             10.0.0.5   # single host\n\
             \n",
        )
        .unwrap();
        assert_eq!(hosts.entry_count(), 2);
        assert!(hosts.is_acceptable(ip("192.168.1.77")));
        assert!(!hosts.is_acceptable(ip("192.168.2.1")));
        assert!(hosts.is_acceptable(ip("10.0.0.5")));
        assert!(!hosts.is_acceptable(ip("10.0.0.6")));
        assert!(!hosts.is_acceptable(ip("127.0.0.1")));
    }

    #[test]
    fn test_parse_rejects_invalid_and_empty_lists() {
        assert_eq!(
            AllowedHosts::parse("192.168.1.0/24\nbogus\n"),
            Err(AccessListError::InvalidEntry("bogus".to_string()))
        );
        assert_eq!(
            AllowedHosts::parse("172.16.0.0/33"),
            Err(AccessListError::InvalidEntry("172.16.0.0/33".to_string()))
        );
        assert_eq!(AllowedHosts::parse("# nothing here\n\n"), Err(AccessListError::Empty));
    }

    #[test]
    fn test_zero_mask_allows_all_ipv4() {
        let hosts = AllowedHosts::parse("0.0.0.0/0").unwrap();
        assert!(hosts.is_acceptable(ip("8.8.8.8")));
        assert!(!hosts.is_acceptable(ip("2001:db8::1")));
        assert!(hosts.is_acceptable(ip("::ffff:8.8.8.8")));
    }

    #[test]
    fn test_load_prefers_own_file() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join("livecast");
        fs::create_dir(&config_dir).unwrap();
        fs::write(config_dir.join(ALLOWED_HOSTS_FILE), "10.1.0.0/16\n").unwrap();
        fs::write(root.path().join(SHARED_HOSTS_FILE), "10.2.0.0/16\n").unwrap();

        let hosts = AllowedHosts::load(&config_dir);
        assert_eq!(hosts.source(), Some(config_dir.join(ALLOWED_HOSTS_FILE).as_path()));
        assert!(hosts.is_acceptable(ip("10.1.3.4")));
        assert!(!hosts.is_acceptable(ip("10.2.3.4")));
    }

    #[test]
    fn test_load_falls_back_to_shared_file() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join("livecast");
        fs::create_dir(&config_dir).unwrap();
        fs::write(root.path().join(SHARED_HOSTS_FILE), "10.2.0.0/16\n").unwrap();

        let hosts = AllowedHosts::load(&config_dir);
        assert!(hosts.is_acceptable(ip("10.2.3.4")));
        assert!(!hosts.is_acceptable(ip("127.0.0.1")));
    }

    #[test]
    fn test_load_skips_invalid_own_file() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join("livecast");
        fs::create_dir(&config_dir).unwrap();
        fs::write(config_dir.join(ALLOWED_HOSTS_FILE), "10.1.0.0/16\nnot-an-address\n").unwrap();
        fs::write(root.path().join(SHARED_HOSTS_FILE), "10.2.0.0/16\n").unwrap();

        let hosts = AllowedHosts::load(&config_dir);
        assert_eq!(hosts.source(), Some(config_dir.join("..").join(SHARED_HOSTS_FILE).as_path()));
        assert!(hosts.is_acceptable(ip("10.2.3.4")));
        assert!(!hosts.is_acceptable(ip("10.1.3.4")));
    }

    #[test]
    fn test_load_skips_empty_and_invalid_files_to_localhost() {
        let root = tempfile::tempdir().unwrap();
        let config_dir = root.path().join("livecast");
        fs::create_dir(&config_dir).unwrap();
        fs::write(config_dir.join(ALLOWED_HOSTS_FILE), "# all commented out\n").unwrap();
        fs::write(root.path().join(SHARED_HOSTS_FILE), "10.2.0.0/40\n").unwrap();

        let hosts = AllowedHosts::load(&config_dir);
        assert_eq!(hosts, AllowedHosts::localhost_only());
        assert_eq!(hosts.source(), None);
        assert!(hosts.is_acceptable(ip("127.0.0.1")));
        assert!(!hosts.is_acceptable(ip("10.2.3.4")));
    }

    #[test]
    fn test_load_defaults_to_localhost() {
        let root = tempfile::tempdir().unwrap();
        let hosts = AllowedHosts::load(&root.path().join("missing"));
        assert_eq!(hosts, AllowedHosts::localhost_only());
        assert!(hosts.is_acceptable(ip("127.0.0.1")));
        assert!(!hosts.is_acceptable(ip("127.0.0.2")));
    }
}
