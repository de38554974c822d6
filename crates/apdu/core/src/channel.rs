//! Logical channel and applet identifiers

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use derive_more::{Deref, Display};

use crate::Error;

/// Identifier of a logical channel on the card
///
/// Channel numbers are small non-negative integers. [`ChannelHandle::INVALID`]
/// is reserved and never refers to an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub struct ChannelHandle(i32);

impl ChannelHandle {
    /// Reserved sentinel for "no channel"
    pub const INVALID: Self = Self(-1);

    /// The basic channel, always open
    pub const BASIC: Self = Self(0);

    /// Highest channel number addressable through the class byte
    pub const MAX_NUMBER: u8 = 19;

    /// Wrap a raw channel id
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Raw channel id, as persisted
    pub const fn id(self) -> i32 {
        self.0
    }

    /// Whether this handle can refer to a channel at all
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Channel number if it can be encoded in a class byte
    pub const fn number(self) -> Option<u8> {
        if self.0 >= 0 && self.0 <= Self::MAX_NUMBER as i32 {
            Some(self.0 as u8)
        } else {
            None
        }
    }
}

impl From<i32> for ChannelHandle {
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

impl From<ChannelHandle> for i32 {
    fn from(handle: ChannelHandle) -> Self {
        handle.id()
    }
}

/// Application identifier of an applet (ISO/IEC 7816-5)
#[derive(Clone, PartialEq, Eq, Hash, Deref)]
pub struct Aid(Bytes);

impl Aid {
    /// Shortest valid AID
    pub const MIN_LEN: usize = 5;
    /// Longest valid AID
    pub const MAX_LEN: usize = 16;

    /// Create an AID from raw bytes
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self, Error> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN || bytes.len() > Self::MAX_LEN {
            return Err(Error::InvalidAid("AID must be between 5 and 16 bytes"));
        }
        Ok(Self(bytes))
    }

    /// Parse an AID from its hex representation
    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex_str).map_err(|_| Error::InvalidAid("AID is not valid hex"))?;
        Self::new(bytes)
    }

    /// Upper-case hex representation
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }

    /// Raw AID bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Aid").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Aid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
