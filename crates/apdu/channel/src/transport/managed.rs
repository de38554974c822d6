//! Logical channel management on top of a raw card transport

use bytes::Bytes;
use nexum_apdu_core::response::status::common;
use nexum_apdu_core::{Aid, CardTransport, ChannelHandle, Command, Error, Response, ResultExt};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{LogicalChannelTransport, OpenChannelResponse, OpenChannelStatus};
use crate::reassembler::ResponseReassembler;

const CLA_ISO: u8 = 0x00;
const INS_MANAGE_CHANNEL: u8 = 0x70;
const INS_SELECT: u8 = 0xA4;
const P1_CLOSE_CHANNEL: u8 = 0x80;
const P1_SELECT_BY_NAME: u8 = 0x04;

/// [`LogicalChannelTransport`] that drives MANAGE CHANNEL and SELECT over a
/// [`CardTransport`]
///
/// Opening a channel sends `MANAGE CHANNEL (open)` on the basic channel, then
/// `SELECT` by AID on the new channel, following `61 XX` continuations.
#[derive(Debug)]
pub struct ManagedChannelTransport<T: CardTransport> {
    card: Mutex<T>,
    reassembler: ResponseReassembler,
}

impl<T: CardTransport> ManagedChannelTransport<T> {
    /// Wrap a card transport
    pub fn new(card: T) -> Self {
        Self {
            card: Mutex::new(card),
            reassembler: ResponseReassembler::default(),
        }
    }

    /// Bound the GET RESPONSE rounds used while reading SELECT responses
    pub const fn with_reassembler(mut self, reassembler: ResponseReassembler) -> Self {
        self.reassembler = reassembler;
        self
    }

    /// Unwrap the card transport
    pub fn into_inner(self) -> T {
        self.card.into_inner()
    }

    fn close_locked(card: &mut T, channel: ChannelHandle) -> Result<bool, Error> {
        let Some(number) = channel.number() else {
            return Ok(false);
        };
        if number == 0 {
            // the basic channel cannot be closed
            return Ok(false);
        }
        let command = Command::new(CLA_ISO, INS_MANAGE_CHANNEL, P1_CLOSE_CHANNEL, number);
        let response = exchange(card, &command).context("MANAGE CHANNEL (close) failed")?;
        Ok(response.is_success())
    }
}

fn exchange<T: CardTransport>(card: &mut T, command: &Command) -> Result<Response, Error> {
    let raw = card.transmit_raw(&command.to_bytes())?;
    Response::from_bytes(&raw)
}

impl<T: CardTransport> LogicalChannelTransport for ManagedChannelTransport<T> {
    fn open_logical_channel(&self, aid: &Aid) -> Result<OpenChannelResponse, Error> {
        let mut card = self.card.lock();

        let open = Command::new(CLA_ISO, INS_MANAGE_CHANNEL, 0x00, 0x00).with_le(1);
        let response = exchange(&mut *card, &open).context("MANAGE CHANNEL (open) failed")?;
        if !response.is_success() {
            let status = response.status();
            debug!(%status, "Card refused to open a logical channel");
            let open_status = if status == common::FUNCTION_NOT_SUPPORTED
                || status.is_logical_channel_not_supported()
            {
                OpenChannelStatus::MissingResource
            } else {
                OpenChannelStatus::UnknownError
            };
            return Ok(OpenChannelResponse::failure(open_status));
        }

        let channel = match response.payload().first() {
            Some(&number) => ChannelHandle::new(i32::from(number)),
            None => {
                warn!("MANAGE CHANNEL response carries no channel number");
                return Ok(OpenChannelResponse::failure(OpenChannelStatus::UnknownError));
            }
        };
        if channel.number().is_none() {
            warn!(%channel, "Card assigned a channel that cannot be addressed");
            return Ok(OpenChannelResponse::failure(OpenChannelStatus::UnknownError));
        }

        let select = Command::new_with_data(
            CLA_ISO,
            INS_SELECT,
            P1_SELECT_BY_NAME,
            0x00,
            Bytes::copy_from_slice(aid.as_bytes()),
        )
        .with_le(256)
        .on_channel(channel);
        let selected = exchange(&mut *card, &select)
            .context("SELECT failed")
            .and_then(|first| {
                self.reassembler
                    .read_full(channel, first, |command| exchange(&mut *card, command))
                    .context("SELECT continuation failed")
            });
        let selected = match selected {
            Ok(selected) => selected,
            Err(e) => {
                warn!(%aid, %channel, error = %e, "Applet selection aborted, closing channel");
                if let Err(close_error) = Self::close_locked(&mut card, channel) {
                    warn!(%channel, error = %close_error, "Failed to close channel after aborted SELECT");
                }
                return Err(e);
            }
        };

        if !selected.is_success() {
            let status = selected.status();
            debug!(%aid, %channel, %status, "Applet selection failed, closing channel");
            if let Err(e) = Self::close_locked(&mut card, channel) {
                warn!(%channel, error = %e, "Failed to close channel after failed SELECT");
            }
            let open_status = if status.is_file_not_found() {
                OpenChannelStatus::NoSuchElement
            } else {
                OpenChannelStatus::UnknownError
            };
            return Ok(OpenChannelResponse::failure(open_status));
        }

        debug!(%aid, %channel, "Opened logical channel");
        Ok(OpenChannelResponse::success(channel, selected.into_payload()))
    }

    fn close_logical_channel(&self, channel: ChannelHandle) -> Result<bool, Error> {
        let mut card = self.card.lock();
        Self::close_locked(&mut card, channel)
    }

    fn transmit(&self, command: &Command) -> Result<Response, Error> {
        command.validate()?;
        let mut card = self.card.lock();
        exchange(&mut *card, command)
    }
}
