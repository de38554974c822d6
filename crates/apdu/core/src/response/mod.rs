//! APDU response definitions
//!
//! This module provides the response type for APDU exchanges according to
//! ISO/IEC 7816-4.

pub mod status;
pub mod utils;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::Error;
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data, empty when absent
    payload: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, status::common::SUCCESS)
    }

    /// Create an error response from a status word
    pub fn error(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let (status, payload) = utils::extract_status_and_payload(data)?;

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self {
            payload: Bytes::copy_from_slice(payload),
            status,
        })
    }

    /// Get the response payload data
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take the payload out of the response
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// First status byte
    pub const fn sw1(&self) -> u8 {
        self.status.sw1
    }

    /// Second status byte
    pub const fn sw2(&self) -> u8 {
        self.status.sw2
    }

    /// Check if the response reports no error (90 00 or 91 XX)
    pub const fn is_success(&self) -> bool {
        self.status.is_no_error()
    }

    /// Check if more data can be fetched with GET RESPONSE (61 XX)
    pub const fn more_data_available(&self) -> bool {
        self.status.is_more_data_available()
    }

    /// Convert to a payload result
    pub fn into_result(self) -> Result<Bytes, Error> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(Error::StatusError {
                status: self.status,
            })
        }
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self, Error> {
        Self::from_bytes(data)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(data: Bytes) -> Result<Self, Error> {
        Self::from_bytes(&data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        let mut buf = BytesMut::with_capacity(response.payload.len() + 2);
        buf.put_slice(&response.payload);
        buf.put_u8(response.status.sw1);
        buf.put_u8(response.status.sw2);
        buf.freeze()
    }
}
