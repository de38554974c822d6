//! Session tracking
//!
//! While a session is active, channels opened by senders stay open between
//! runs. Senders report themselves when they open a channel during a
//! session; ending the last session closes every channel that was reported.

use std::collections::HashSet;
use std::fmt;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Something that owns a logical channel and can close it on request
pub trait ChannelOwner: Send + Sync {
    /// Close the owned channel if one is open, returning whether the close
    /// could be attempted
    fn close_any_open_channel(&self) -> bool;
}

/// Source of the "session active" signal consulted by senders
pub trait SessionTracker: fmt::Debug + Send + Sync {
    /// Whether a session is currently active
    fn has_active_session(&self) -> bool;

    /// Record that `owner` keeps a channel open for the active session
    fn note_channel_open(&self, owner: Weak<dyn ChannelOwner>);
}

/// Tracker for callers without sessions: every run closes its channel
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessions;

impl SessionTracker for NoSessions {
    fn has_active_session(&self) -> bool {
        false
    }

    fn note_channel_open(&self, _owner: Weak<dyn ChannelOwner>) {}
}

#[derive(Default)]
struct SessionState {
    sessions: HashSet<String>,
    owners: Vec<Weak<dyn ChannelOwner>>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("sessions", &self.sessions)
            .field("owners", &self.owners.len())
            .finish()
    }
}

/// Named sessions with channel cleanup when the last one ends
#[derive(Debug, Default)]
pub struct SessionManager {
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Create a manager with no active session
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, a no-op if it is already active
    pub fn start_session(&self, id: impl Into<String>) {
        let id = id.into();
        let mut state = self.state.lock();
        if state.sessions.insert(id.clone()) {
            debug!(session = %id, active = state.sessions.len(), "Session started");
        }
    }

    /// End a session, closing noted channels if it was the last one
    pub fn end_session(&self, id: &str) {
        let owners = {
            let mut state = self.state.lock();
            if !state.sessions.remove(id) {
                return;
            }
            debug!(session = %id, active = state.sessions.len(), "Session ended");
            if !state.sessions.is_empty() {
                return;
            }
            std::mem::take(&mut state.owners)
        };
        close_owners(owners);
    }

    /// End every session and close noted channels
    pub fn end_all_sessions(&self) {
        let owners = {
            let mut state = self.state.lock();
            state.sessions.clear();
            std::mem::take(&mut state.owners)
        };
        debug!("All sessions ended");
        close_owners(owners);
    }

    /// Number of active sessions
    pub fn active_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }
}

fn close_owners(owners: Vec<Weak<dyn ChannelOwner>>) {
    for owner in owners.iter().filter_map(Weak::upgrade) {
        if !owner.close_any_open_channel() {
            warn!("Could not close a session channel, it stays open");
        }
    }
}

impl SessionTracker for SessionManager {
    fn has_active_session(&self) -> bool {
        !self.state.lock().sessions.is_empty()
    }

    fn note_channel_open(&self, owner: Weak<dyn ChannelOwner>) {
        let mut state = self.state.lock();
        if state.sessions.is_empty() {
            return;
        }
        state.owners.retain(|noted| noted.strong_count() > 0);
        if !state.owners.iter().any(|noted| noted.ptr_eq(&owner)) {
            state.owners.push(owner);
        }
    }
}
