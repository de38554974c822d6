//! Logical channel transport boundary
//!
//! The pipeline talks to the card through [`LogicalChannelTransport`]: open a
//! logical channel to an applet, send commands on it and close it again.
//! Implementations are called from the dispatcher thread while the channel
//! gate is held, one call at a time per applet.

mod managed;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use derive_more::Display;
use nexum_apdu_core::{Aid, ChannelHandle, Command, Error, Response};
use tracing::error;

pub use managed::ManagedChannelTransport;

/// Outcome of an open logical channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum OpenChannelStatus {
    /// Channel opened and applet selected
    #[display("no error")]
    NoError,
    /// The card has no free logical channel
    #[display("missing resource")]
    MissingResource,
    /// The applet could not be selected, or already owns a channel
    #[display("no such element")]
    NoSuchElement,
    /// Any other failure
    #[display("unknown error")]
    UnknownError,
}

impl OpenChannelStatus {
    /// Numeric code of the status
    pub const fn code(self) -> u16 {
        match self {
            Self::NoError => 1,
            Self::MissingResource => 2,
            Self::NoSuchElement => 3,
            Self::UnknownError => 4,
        }
    }

    /// Whether the channel was opened
    pub const fn is_success(self) -> bool {
        matches!(self, Self::NoError)
    }
}

/// Result of [`LogicalChannelTransport::open_logical_channel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelResponse {
    /// Opened channel, [`ChannelHandle::INVALID`] on failure
    pub channel: ChannelHandle,
    /// Open status
    pub status: OpenChannelStatus,
    /// Payload of the applet's SELECT response
    pub select_response: Bytes,
}

impl OpenChannelResponse {
    /// A successfully opened channel
    pub fn success(channel: ChannelHandle, select_response: impl Into<Bytes>) -> Self {
        Self {
            channel,
            status: OpenChannelStatus::NoError,
            select_response: select_response.into(),
        }
    }

    /// A failed open
    pub const fn failure(status: OpenChannelStatus) -> Self {
        Self {
            channel: ChannelHandle::INVALID,
            status,
            select_response: Bytes::new(),
        }
    }
}

/// Hardware operations needed to drive an applet over a logical channel
pub trait LogicalChannelTransport: fmt::Debug + Send + Sync {
    /// Open a logical channel and select `aid` on it
    ///
    /// Failures the card reports are returned as an [`OpenChannelResponse`]
    /// carrying a non-success status; `Err` is reserved for transport level
    /// faults.
    fn open_logical_channel(&self, aid: &Aid) -> Result<OpenChannelResponse, Error>;

    /// Close a logical channel, returning whether the card accepted it
    fn close_logical_channel(&self, channel: ChannelHandle) -> Result<bool, Error>;

    /// Send a single command on the channel it is addressed to
    ///
    /// The response is returned as received: no GET RESPONSE is issued.
    fn transmit(&self, command: &Command) -> Result<Response, Error>;
}

impl<T: LogicalChannelTransport + ?Sized> LogicalChannelTransport for Arc<T> {
    fn open_logical_channel(&self, aid: &Aid) -> Result<OpenChannelResponse, Error> {
        (**self).open_logical_channel(aid)
    }

    fn close_logical_channel(&self, channel: ChannelHandle) -> Result<bool, Error> {
        (**self).close_logical_channel(channel)
    }

    fn transmit(&self, command: &Command) -> Result<Response, Error> {
        (**self).transmit(command)
    }
}

/// Run a transport call, reporting a panic as a transport error
pub(crate) fn guarded<T>(
    operation: &'static str,
    call: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    panic::catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        error!(operation, "Transport panicked");
        Err(Error::message(format!("transport panicked during {operation}")))
    })
}
