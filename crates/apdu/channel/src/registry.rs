//! Per-applet channel state shared by every sender of the same applet

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nexum_apdu_core::Aid;
use parking_lot::Mutex;

use crate::gate::{ChannelGate, DEFAULT_LOCK_TIMEOUT};

/// Gate and open flag of one applet
#[derive(Debug)]
pub struct ChannelSlot {
    gate: Arc<ChannelGate>,
    opened: AtomicBool,
}

impl ChannelSlot {
    fn new(timeout: Duration) -> Self {
        Self {
            gate: Arc::new(ChannelGate::new(timeout)),
            opened: AtomicBool::new(false),
        }
    }

    /// Gate serialising pipeline runs against the applet
    pub const fn gate(&self) -> &Arc<ChannelGate> {
        &self.gate
    }

    /// Whether a channel to the applet is believed to be open
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub(crate) fn set_opened(&self, opened: bool) {
        self.opened.store(opened, Ordering::Release);
    }
}

/// Registry of [`ChannelSlot`]s keyed by applet
///
/// Senders built from the same registry for the same [`Aid`] share a gate
/// and open flag. Use one registry per card.
#[derive(Debug)]
pub struct ChannelRegistry {
    lock_timeout: Duration,
    slots: Mutex<HashMap<Aid, Arc<ChannelSlot>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create a registry with the default lock timeout
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a registry whose gates wait at most `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            lock_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Lock timeout of the gates in this registry
    pub const fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Slot for `aid`, created on first use
    pub fn slot(&self, aid: &Aid) -> Arc<ChannelSlot> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(aid.clone())
                .or_insert_with(|| Arc::new(ChannelSlot::new(self.lock_timeout))),
        )
    }
}
