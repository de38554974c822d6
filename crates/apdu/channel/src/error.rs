//! Error types for the command pipeline

use nexum_apdu_core::StatusWord;
use nexum_apdu_core::response::status::common;

use crate::request::BuildError;
use crate::transport::OpenChannelStatus;

/// Terminal failure of a pipeline run, delivered to the result callback
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The logical channel could not be opened
    #[error("Failed to open logical channel, status: {status}")]
    OpenFailed {
        /// Status reported by the transport
        status: OpenChannelStatus,
    },

    /// A command came back with an error status
    #[error("APDU response is not successful, status: {}", .status.to_hex())]
    TransmitFailed {
        /// Final status word of the failing command
        status: StatusWord,
    },

    /// The request provider failed or produced no commands
    #[error("Failed to build APDU request: {0}")]
    BuilderFailed(#[source] BuildError),

    /// The channel gate could not be acquired
    #[error("The logical channel is still in use")]
    ChannelBusy,
}

impl PipelineError {
    /// Transmit failure reported when the transport itself failed
    pub const fn transport_failure() -> Self {
        Self::TransmitFailed {
            status: common::NO_PRECISE_DIAGNOSIS,
        }
    }

    pub(crate) fn builder(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::BuilderFailed(message.into())
    }

    /// Numeric status carried by the error, if any
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::OpenFailed { status } => Some(status.code()),
            Self::TransmitFailed { status } => Some(status.to_u16()),
            Self::BuilderFailed(_) | Self::ChannelBusy => None,
        }
    }

    /// Status as four hex digits, e.g. `6A82`
    pub fn status_hex(&self) -> Option<String> {
        self.status_code().map(|code| format!("{code:04X}"))
    }
}

/// Errors raised by a [`KeyValueStore`](crate::store::KeyValueStore)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not valid JSON
    #[error("Store serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
