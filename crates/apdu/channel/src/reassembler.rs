//! Response reassembly across `61 XX` continuations
//!
//! A card that has more response data than fits in one exchange answers with
//! `61 XX`, where `XX` is the number of bytes still pending (`00` meaning 256).
//! The rest is fetched with GET RESPONSE on the same channel until a final
//! status arrives.

use bytes::BytesMut;
use nexum_apdu_core::{ChannelHandle, Command, ExpectedLength, Response};
use tracing::{trace, warn};

/// GET RESPONSE instruction
pub const INS_GET_RESPONSE: u8 = 0xC0;

/// Build the GET RESPONSE command for a `61 XX` status
pub fn get_response_command(channel: ChannelHandle, remaining: u8) -> Command {
    let le = match remaining {
        0 => 256,
        n => ExpectedLength::from(n),
    };
    Command::new(0x00, INS_GET_RESPONSE, 0x00, 0x00)
        .with_le(le)
        .on_channel(channel)
}

/// Follows `61 XX` statuses until the card reports a final status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseReassembler {
    max_rounds: Option<usize>,
}

impl ResponseReassembler {
    /// Create a reassembler with an optional bound on GET RESPONSE rounds
    pub const fn new(max_rounds: Option<usize>) -> Self {
        Self { max_rounds }
    }

    /// Maximum number of GET RESPONSE rounds
    pub const fn max_rounds(&self) -> Option<usize> {
        self.max_rounds
    }

    /// Read the complete response to a command whose first response is `first`
    ///
    /// The returned response carries every payload fragment in order and the
    /// status of the last exchange. When the round limit is reached the last
    /// `61 XX` status is returned as is.
    pub fn read_full<E, F>(
        &self,
        channel: ChannelHandle,
        first: Response,
        mut transmit: F,
    ) -> Result<Response, E>
    where
        F: FnMut(&Command) -> Result<Response, E>,
    {
        if !first.more_data_available() {
            return Ok(first);
        }

        let mut status = first.status();
        let mut buffer = BytesMut::from(first.payload().as_ref());
        let mut rounds = 0;

        while let Some(remaining) = status.remaining_bytes() {
            if self.max_rounds.is_some_and(|max| rounds >= max) {
                warn!(rounds, %status, "GET RESPONSE round limit reached");
                break;
            }

            let next = transmit(&get_response_command(channel, remaining))?;
            buffer.extend_from_slice(next.payload());
            status = next.status();
            rounds += 1;

            trace!(
                rounds,
                received = buffer.len(),
                %status,
                "Read response continuation"
            );
        }

        Ok(Response::new(buffer.freeze(), status))
    }
}
