//! Sender configuration

use nexum_apdu_core::StatusWord;
use nexum_apdu_core::response::status::common;

/// Status word a card returns when the logical channel it was addressed on
/// no longer exists
pub const DEFAULT_CHANNEL_CLOSED_STATUS: StatusWord = common::LOGICAL_CHANNEL_NOT_SUPPORTED;

/// Configuration for an [`ApduSender`](crate::ApduSender)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Status that tells the card dropped our channel
    ///
    /// When a command fails with this status the cached channel is forgotten
    /// and no close is sent for it. `None` disables the check.
    pub channel_closed_status: Option<StatusWord>,

    /// Upper bound on GET RESPONSE rounds per command, unbounded when `None`
    pub max_get_response_rounds: Option<usize>,

    /// Send STORE DATA as a single extended APDU instead of 255 byte blocks
    pub extended_apdu: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            channel_closed_status: Some(DEFAULT_CHANNEL_CLOSED_STATUS),
            max_get_response_rounds: None,
            extended_apdu: false,
        }
    }
}

impl SenderConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel-closed status
    pub const fn with_channel_closed_status(mut self, status: Option<StatusWord>) -> Self {
        self.channel_closed_status = status;
        self
    }

    /// Bound the number of GET RESPONSE rounds
    pub const fn with_max_get_response_rounds(mut self, rounds: Option<usize>) -> Self {
        self.max_get_response_rounds = rounds;
        self
    }

    /// Enable or disable extended length STORE DATA
    pub const fn with_extended_apdu(mut self, extended: bool) -> Self {
        self.extended_apdu = extended;
        self
    }
}
