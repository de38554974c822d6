//! Logical channel lifecycle for one applet
//!
//! The handle of an open channel and the applet's SELECT response are
//! persisted under keys derived from the AID. This is what lets a restarted
//! process recover a channel it left open: an applet that already owns a
//! channel refuses a second one with [`OpenChannelStatus::NoSuchElement`],
//! and the persisted handle is used instead.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use nexum_apdu_core::{Aid, ChannelHandle};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::registry::ChannelSlot;
use crate::store::{KeyValueStore, StoreEdit};
use crate::transport::{LogicalChannelTransport, OpenChannelStatus, guarded};

/// Prefix of the persisted channel handle key
pub const CHANNEL_ID_KEY_PREFIX: &str = "apdu-channel-id";
/// Prefix of the persisted SELECT response key
pub const CHANNEL_RESPONSE_KEY_PREFIX: &str = "apdu-channel-response";

/// An open channel and the SELECT response it was opened with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannel {
    /// Channel handle
    pub handle: ChannelHandle,
    /// SELECT response payload
    pub select_response: Bytes,
}

/// Opens, reuses and closes the logical channel to one applet
///
/// Callers must hold the applet's channel gate around every call.
#[derive(Debug)]
pub struct ChannelLifecycle {
    aid: Aid,
    transport: Arc<dyn LogicalChannelTransport>,
    store: Arc<dyn KeyValueStore>,
    slot: Arc<ChannelSlot>,
    id_key: String,
    response_key: String,
}

impl ChannelLifecycle {
    /// Create the lifecycle of `aid`
    pub fn new(
        aid: Aid,
        transport: Arc<dyn LogicalChannelTransport>,
        store: Arc<dyn KeyValueStore>,
        slot: Arc<ChannelSlot>,
    ) -> Self {
        let hex = aid.to_hex();
        Self {
            id_key: format!("{CHANNEL_ID_KEY_PREFIX}-{hex}"),
            response_key: format!("{CHANNEL_RESPONSE_KEY_PREFIX}-{hex}"),
            aid,
            transport,
            store,
            slot,
        }
    }

    /// Applet identifier
    pub const fn aid(&self) -> &Aid {
        &self.aid
    }

    /// Slot shared with other senders of the applet
    pub const fn slot(&self) -> &Arc<ChannelSlot> {
        &self.slot
    }

    /// Whether a channel is believed to be open
    pub fn is_open(&self) -> bool {
        self.slot.is_opened()
    }

    /// Persisted channel handle, if any
    pub fn persisted_handle(&self) -> Option<ChannelHandle> {
        let id = self.store.get_int(&self.id_key)?;
        let handle = ChannelHandle::new(i32::try_from(id).ok()?);
        handle.is_valid().then_some(handle)
    }

    /// Persisted channel with its SELECT response, if any
    ///
    /// A missing or undecodable response reads as empty.
    pub fn persisted(&self) -> Option<OpenChannel> {
        let handle = self.persisted_handle()?;
        let select_response = match self.store.get_string(&self.response_key) {
            Some(encoded) => match BASE64.decode(encoded) {
                Ok(decoded) => Bytes::from(decoded),
                Err(e) => {
                    warn!(aid = %self.aid, error = %e, "Persisted SELECT response is not valid base64");
                    Bytes::new()
                }
            },
            None => Bytes::new(),
        };
        Some(OpenChannel {
            handle,
            select_response,
        })
    }

    /// Return the open channel, opening one if needed
    pub fn ensure_open(&self) -> Result<OpenChannel, PipelineError> {
        if self.slot.is_opened() {
            if let Some(open) = self.persisted() {
                debug!(aid = %self.aid, channel = %open.handle, "Reusing open logical channel");
                return Ok(open);
            }
            debug!(aid = %self.aid, "Channel marked open without a persisted handle, reopening");
            self.slot.set_opened(false);
        }

        let response = match guarded("open", || self.transport.open_logical_channel(&self.aid)) {
            Ok(response) => response,
            Err(e) => {
                warn!(aid = %self.aid, error = %e, "Transport failed to open logical channel");
                self.forget();
                return Err(PipelineError::OpenFailed {
                    status: OpenChannelStatus::UnknownError,
                });
            }
        };

        let mut status = response.status;
        let mut open = OpenChannel {
            handle: response.channel,
            select_response: response.select_response,
        };

        if status == OpenChannelStatus::NoSuchElement {
            if let Some(persisted) = self.persisted() {
                debug!(
                    aid = %self.aid,
                    channel = %persisted.handle,
                    "Applet already owns a channel, using the persisted one"
                );
                open = persisted;
                status = OpenChannelStatus::NoError;
            }
        }

        if !status.is_success() || !open.handle.is_valid() {
            let status = if status.is_success() {
                OpenChannelStatus::UnknownError
            } else {
                status
            };
            warn!(aid = %self.aid, %status, "Failed to open logical channel");
            self.forget();
            return Err(PipelineError::OpenFailed { status });
        }

        self.persist(&open);
        self.slot.set_opened(true);
        debug!(
            aid = %self.aid,
            channel = %open.handle,
            select_response = %hex::encode(&open.select_response),
            "Logical channel open"
        );
        Ok(open)
    }

    /// Finish a run on `handle`
    ///
    /// Without `immediately` the channel is left open for the active
    /// session. Otherwise it is closed on the card, unless it was already
    /// invalidated, and its persisted state is cleared.
    pub fn close(&self, handle: ChannelHandle, immediately: bool) {
        if !immediately {
            debug!(aid = %self.aid, channel = %handle, "Keeping logical channel open for session");
            return;
        }

        if self.slot.is_opened() {
            self.close_on_card(handle);
        } else {
            debug!(aid = %self.aid, channel = %handle, "Channel already released, skipping close");
        }
        self.forget();
    }

    /// Forget the channel after the card reported it gone
    pub fn invalidate(&self) {
        debug!(aid = %self.aid, "Logical channel invalidated by the card");
        self.forget();
    }

    /// Close the channel the persisted state points at, if any, and clear it
    ///
    /// Used at startup to recover from a crash and when a session ends. The
    /// caller must hold the gate.
    pub fn close_persisted(&self) {
        match self.persisted_handle() {
            Some(handle) => self.close_on_card(handle),
            None => debug!(aid = %self.aid, "No persisted logical channel to close"),
        }
        self.forget();
    }

    fn close_on_card(&self, handle: ChannelHandle) {
        match guarded("close", || self.transport.close_logical_channel(handle)) {
            Ok(true) => debug!(aid = %self.aid, channel = %handle, "Closed logical channel"),
            Ok(false) => {
                warn!(aid = %self.aid, channel = %handle, "Card refused to close logical channel")
            }
            Err(e) => {
                warn!(aid = %self.aid, channel = %handle, error = %e, "Failed to close logical channel")
            }
        }
    }

    fn persist(&self, open: &OpenChannel) {
        let edits = vec![
            StoreEdit::PutInt(self.id_key.clone(), i64::from(open.handle.id())),
            StoreEdit::PutString(
                self.response_key.clone(),
                BASE64.encode(&open.select_response),
            ),
        ];
        if let Err(e) = self.store.apply(edits) {
            warn!(aid = %self.aid, error = %e, "Failed to persist logical channel");
        }
    }

    fn forget(&self) {
        let edits = vec![
            StoreEdit::Remove(self.id_key.clone()),
            StoreEdit::Remove(self.response_key.clone()),
        ];
        if let Err(e) = self.store.apply(edits) {
            warn!(aid = %self.aid, error = %e, "Failed to clear persisted logical channel");
        }
        self.slot.set_opened(false);
    }
}
