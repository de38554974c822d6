//! APDU command definitions
//!
//! This module provides the command type used to talk to an applet over a
//! logical channel according to ISO/IEC 7816-4. The channel number is not a
//! separate field on the wire: it is folded into the class byte when the
//! command is serialised.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ChannelHandle, Error};

/// Expected length type for APDU commands
///
/// A value of 256 is encoded as `00` in a short APDU and 65536 as `00 00`
/// in an extended one.
pub type ExpectedLength = u32;

/// Largest data field of a short APDU
pub const MAX_SHORT_DATA_LEN: usize = 0xFF;

/// Largest data field of an extended APDU
pub const MAX_EXTENDED_DATA_LEN: usize = 0xFFFF;

/// Largest expected length of a short APDU
pub const MAX_SHORT_LE: ExpectedLength = 0x100;

/// Largest expected length of an extended APDU
pub const MAX_EXTENDED_LE: ExpectedLength = 0x10000;

/// Fold a logical channel number into a class byte
///
/// Channels 0 to 3 use the first interindustry coding (b2 b1), channels 4
/// to 19 the further interindustry coding (b7 set, b4..b1 = channel - 4).
/// The proprietary (b8) and chaining (b5) bits of `cla` are kept.
pub const fn encode_class(cla: u8, channel: u8) -> u8 {
    if channel <= 3 {
        (cla & 0xBC) | channel
    } else {
        (cla & 0xB0) | 0x40 | ((channel - 4) & 0x0F)
    }
}

/// Split a class byte into its channel-free class and channel number
pub const fn decode_class(cla: u8) -> (u8, u8) {
    if cla & 0x40 == 0 {
        (cla & 0xBC, cla & 0x03)
    } else {
        (cla & 0xB0, (cla & 0x0F) + 4)
    }
}

/// APDU command addressed to a logical channel
///
/// Commands are immutable once built; the `with_*` methods consume the
/// command and return a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Logical channel the command is sent on
    channel: ChannelHandle,
    /// Command class byte, without channel bits
    cla: u8,
    /// Instruction byte
    ins: u8,
    /// Parameter 1
    p1: u8,
    /// Parameter 2
    p2: u8,
    /// Command data, empty when absent
    data: Bytes,
    /// Expected length (optional)
    le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes on the basic channel
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            channel: ChannelHandle::BASIC,
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: None,
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = data.into();
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Address the command to another logical channel
    pub const fn on_channel(mut self, channel: ChannelHandle) -> Self {
        self.channel = channel;
        self
    }

    /// Logical channel
    pub const fn channel(&self) -> ChannelHandle {
        self.channel
    }

    /// Command class (CLA), without channel bits
    pub const fn class(&self) -> u8 {
        self.cla
    }

    /// Class byte as sent on the wire, with the channel number folded in
    pub const fn encoded_class(&self) -> u8 {
        match self.channel.number() {
            Some(number) => encode_class(self.cla, number),
            None => self.cla,
        }
    }

    /// Instruction code (INS)
    pub const fn instruction(&self) -> u8 {
        self.ins
    }

    /// First parameter (P1)
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Second parameter (P2)
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Command payload data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Expected response length (optional)
    pub const fn expected_length(&self) -> Option<ExpectedLength> {
        self.le
    }

    /// Whether this command needs the extended length encoding
    pub fn is_extended(&self) -> bool {
        self.data.len() > MAX_SHORT_DATA_LEN
            || matches!(self.le, Some(le) if le > MAX_SHORT_LE)
    }

    /// Check that the data field and Le fit the extended encoding
    pub fn validate(&self) -> Result<(), Error> {
        if self.data.len() > MAX_EXTENDED_DATA_LEN {
            return Err(Error::DataTooLong(self.data.len(), MAX_EXTENDED_DATA_LEN));
        }
        if let Some(le) = self.le {
            if le > MAX_EXTENDED_LE {
                return Err(Error::InvalidCommandLength(le as usize));
            }
        }
        if !self.channel.is_valid() {
            return Err(Error::message(format!(
                "Command addressed to invalid channel {}",
                self.channel
            )));
        }
        Ok(())
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        // Header (CLA, INS, P1, P2) is always 4 bytes
        let mut length = 4;
        let extended = self.is_extended();

        if !self.data.is_empty() {
            length += self.data.len() + if extended { 3 } else { 1 };
        }

        if self.le.is_some() {
            length += if !extended {
                1
            } else if self.data.is_empty() {
                3
            } else {
                2
            };
        }

        length
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());
        let extended = self.is_extended();

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.encoded_class());
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        // Add Lc and data if present
        if !self.data.is_empty() {
            if extended {
                buffer.put_u8(0x00);
                buffer.put_u16(self.data.len() as u16);
            } else {
                buffer.put_u8(self.data.len() as u8);
            }
            buffer.put_slice(&self.data);
        }

        // Add Le if present, the maximum of each form wraps to zero
        if let Some(le) = self.le {
            if extended {
                if self.data.is_empty() {
                    buffer.put_u8(0x00);
                }
                buffer.put_u16(le as u16);
            } else {
                buffer.put_u8(le as u8);
            }
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes, recovering the channel from CLA
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let (cla, channel) = decode_class(data[0]);
        let mut command =
            Self::new(cla, data[1], data[2], data[3]).on_channel(ChannelHandle::new(channel.into()));
        let body = &data[4..];

        match body.len() {
            0 => {}
            // Only Le present
            1 => command.le = Some(short_le(body[0])),
            // Extended forms start with a zero byte
            n if n >= 3 && body[0] == 0x00 => {
                let value = u16::from_be_bytes([body[1], body[2]]) as usize;
                if n == 3 {
                    command.le = Some(extended_le(value));
                } else if n == 3 + value {
                    command.data = Bytes::copy_from_slice(&body[3..]);
                } else if n == 3 + value + 2 {
                    command.data = Bytes::copy_from_slice(&body[3..3 + value]);
                    command.le = Some(extended_le(u16::from_be_bytes([
                        body[3 + value],
                        body[4 + value],
                    ]) as usize));
                } else {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
            }
            n => {
                let lc = body[0] as usize;
                if n == 1 + lc {
                    command.data = Bytes::copy_from_slice(&body[1..]);
                } else if n == 2 + lc {
                    command.data = Bytes::copy_from_slice(&body[1..1 + lc]);
                    command.le = Some(short_le(body[1 + lc]));
                } else {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
            }
        }

        Ok(command)
    }
}

const fn short_le(value: u8) -> ExpectedLength {
    if value == 0 { MAX_SHORT_LE } else { value as ExpectedLength }
}

const fn extended_le(value: usize) -> ExpectedLength {
    if value == 0 {
        MAX_EXTENDED_LE
    } else {
        value as ExpectedLength
    }
}
