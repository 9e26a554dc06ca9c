//! Periodic housekeeping of the session server.
//!
//! Runs whenever the accept loop times out: reaps dead sessions, keeps the
//! host awake while clients are connected and turns host-side changes into
//! client notifications.

use std::time::{Duration, Instant};

use log::{debug, trace};

use super::registry::SessionRegistry;
use crate::host::HostContext;

/// Quiet period after the last channel directory change before clients are
/// told to reload their channel list.
pub const CHANNEL_DEBOUNCE: Duration = Duration::from_secs(10);

/// What a housekeeping pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reaped: usize,
    pub channel_list_notified: bool,
    pub recordings_notified: bool,
    pub timers_notified: bool,
}

pub struct Housekeeper {
    host: HostContext,
    directory_generation: u64,
    recordings_generation: u64,
    timers_generation: u64,
    /// Set while a channel list notification is pending.
    debounce_since: Option<Instant>,
}

impl Housekeeper {
    /// Start from the host's current state; nothing is pending initially.
    pub fn new(host: HostContext) -> Self {
        Self {
            directory_generation: host.directory.generation(),
            recordings_generation: host.recordings.generation(),
            timers_generation: host.timers.generation(),
            debounce_since: None,
            host,
        }
    }

    /// Whether a channel list notification is waiting for the debounce.
    #[cfg(test)]
    pub fn channel_change_pending(&self) -> bool {
        self.debounce_since.is_some()
    }

    /// Run one housekeeping pass.
    pub fn tick(&mut self, registry: &mut SessionRegistry, now: Instant) -> TickReport {
        let mut report = TickReport {
            reaped: registry.reap(),
            ..Default::default()
        };

        if !registry.is_empty() {
            self.host.hooks.reset_user_inactivity();
            report.channel_list_notified = self.check_directory(registry, now);
        }

        let recordings = self.host.recordings.generation();
        let recordings_dirty = self.host.recordings.take_dirty();
        if recordings != self.recordings_generation || recordings_dirty {
            self.recordings_generation = recordings;
            registry.notify_recordings_changed();
            report.recordings_notified = true;
        }

        let timers = self.host.timers.generation();
        if timers != self.timers_generation {
            self.timers_generation = timers;
            registry.notify_timers_changed();
            report.timers_notified = true;
        }

        report
    }

    fn check_directory(&mut self, registry: &SessionRegistry, now: Instant) -> bool {
        let generation = self.host.directory.generation();
        if generation != self.directory_generation {
            self.directory_generation = generation;
            if self.debounce_since.replace(now).is_some() {
                trace!("Channel directory changed again, restarting debounce");
            } else {
                debug!("Channel directory changed (generation {})", generation);
            }
            return false;
        }

        match self.debounce_since {
            Some(since) if now.saturating_duration_since(since) >= CHANNEL_DEBOUNCE => {
                self.debounce_since = None;
                registry.notify_channel_list_changed();
                true
            }
            _ => false,
        }
    }
}
