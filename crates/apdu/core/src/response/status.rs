//! Status word definitions for APDU responses

use std::fmt;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Four hex digits, e.g. `6A82`
    pub fn to_hex(&self) -> String {
        format!("{:04X}", self.to_u16())
    }

    /// Check if this status word is exactly 90 00
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word reports no error (90 00 or 91 XX)
    ///
    /// `91 XX` is returned by eUICC-style applets when the command succeeded
    /// and a proactive command is pending.
    pub const fn is_no_error(&self) -> bool {
        self.is_success() || self.sw1 == 0x91
    }

    /// Check if this status word indicates more data is available (61 XX)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Get the number of remaining bytes when SW1 = 61
    pub const fn remaining_bytes(&self) -> Option<u8> {
        if self.sw1 == 0x61 {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Check if this status word indicates a warning (62 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62
    }

    /// Check if this status word indicates a file not found (6A 82)
    pub const fn is_file_not_found(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x82
    }

    /// Check if this status word indicates the logical channel is not supported (68 81)
    pub const fn is_logical_channel_not_supported(&self) -> bool {
        self.sw1 == 0x68 && self.sw2 == 0x81
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x91, _) => "Success, proactive command pending",
            (0x61, _) => "More data available",
            (0x62, _) => "Warning, state of non-volatile memory unchanged",
            (0x63, _) => "Warning, state of non-volatile memory changed",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x81) => "Logical channel not supported",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6D, 0x00) => "Instruction code not supported",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Logical channel not supported (68 81)
    pub const LOGICAL_CHANNEL_NOT_SUPPORTED: StatusWord = StatusWord::new(0x68, 0x81);

    /// Function not supported (6A 81)
    pub const FUNCTION_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6A, 0x81);

    /// File not found (6A 82)
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);

    /// No precise diagnosis (6F 00)
    pub const NO_PRECISE_DIAGNOSIS: StatusWord = StatusWord::new(0x6F, 0x00);
}
