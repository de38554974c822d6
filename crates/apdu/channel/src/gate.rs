//! Per-applet mutual exclusion
//!
//! A [`ChannelGate`] serialises whole pipeline runs against one applet: the
//! gate is taken before the channel is opened and released only after it is
//! closed (or kept for the session), right before the result is delivered.
//! Unlike a plain mutex the gate can be released from a thread other than
//! the one that took it, which is what hands a run over to the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

/// Default time to wait for a busy gate
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Binary lock with a bounded wait
#[derive(Debug)]
pub struct ChannelGate {
    held: Mutex<bool>,
    released: Condvar,
    timeout: Duration,
}

impl Default for ChannelGate {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl ChannelGate {
    /// Create a free gate that waits at most `timeout` when busy
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(false),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Maximum wait for a busy gate
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the gate is currently held
    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    /// Take the gate
    ///
    /// A free gate is taken immediately. A held gate fails at once when
    /// `fail_fast` is set, and otherwise after waiting for the timeout.
    pub fn acquire(&self, fail_fast: bool) -> bool {
        let mut held = self.held.lock();
        if !*held {
            *held = true;
            return true;
        }
        if fail_fast {
            trace!("Gate busy, failing fast");
            return false;
        }

        let deadline = Instant::now() + self.timeout;
        while *held {
            if self.released.wait_until(&mut held, deadline).timed_out() {
                break;
            }
        }
        if *held {
            trace!(timeout = ?self.timeout, "Timed out waiting for gate");
            return false;
        }
        *held = true;
        true
    }

    /// Free the gate and wake one waiter
    pub fn release(&self) {
        let mut held = self.held.lock();
        if !*held {
            warn!("Releasing a gate that is not held");
        }
        *held = false;
        drop(held);
        self.released.notify_one();
    }

    /// Take the gate and return a permit that frees it on drop
    pub fn try_permit(self: &Arc<Self>, fail_fast: bool) -> Option<GatePermit> {
        self.acquire(fail_fast).then(|| GatePermit {
            gate: Arc::clone(self),
        })
    }
}

/// Ownership of a [`ChannelGate`], released when dropped
#[derive(Debug)]
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct GatePermit {
    gate: Arc<ChannelGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
