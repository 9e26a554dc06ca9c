//! Host collaborators observed by the session server.
//!
//! The recording and timer subsystems are only visible through change
//! counters; the host's user-inactivity handling through [`HostHooks`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use log::trace;
use parking_lot::Mutex;

use crate::directory::ServiceDirectory;

/// Change detection for an external subsystem.
pub trait StateWatch: Send + Sync {
    /// Modification counter.
    fn generation(&self) -> u64;

    /// Return and clear the external "dirty" flag.
    fn take_dirty(&self) -> bool {
        false
    }
}

/// Simple generation counter with an optional dirty flag.
#[derive(Debug, Default)]
pub struct StateCounter {
    generation: AtomicU64,
    dirty: AtomicBool,
}

impl StateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a modification.
    #[cfg(test)]
    pub fn bump(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Flag a change without touching the generation.
    #[cfg(test)]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl StateWatch for StateCounter {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Callbacks into the host process.
pub trait HostHooks: Send + Sync {
    /// Keep the host from treating the system as idle.
    fn reset_user_inactivity(&self);
}

/// Host hooks that only track when inactivity was last reset.
#[derive(Debug, Default)]
pub struct InactivityTracker {
    last_reset: Mutex<Option<DateTime<Local>>>,
    resets: AtomicU64,
}

impl InactivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn last_reset(&self) -> Option<DateTime<Local>> {
        *self.last_reset.lock()
    }

    #[cfg(test)]
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }
}

impl HostHooks for InactivityTracker {
    fn reset_user_inactivity(&self) {
        let now = Local::now();
        *self.last_reset.lock() = Some(now);
        self.resets.fetch_add(1, Ordering::Relaxed);
        trace!("User inactivity reset at {}", now.format("%H:%M:%S"));
    }
}

/// Everything the server's housekeeping polls.
#[derive(Clone)]
pub struct HostContext {
    pub directory: Arc<dyn ServiceDirectory>,
    pub recordings: Arc<dyn StateWatch>,
    pub timers: Arc<dyn StateWatch>,
    pub hooks: Arc<dyn HostHooks>,
}
