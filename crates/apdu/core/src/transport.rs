//! Transport layer for card communication
//!
//! A transport is responsible for sending and receiving raw APDU bytes.
//! It has no knowledge of command structure, logical channels or protocol
//! details such as GET RESPONSE.

use std::fmt;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::Error;

/// Trait for card transport connections
///
/// Implementors provide [`CardTransport::do_transmit_raw`];
/// [`CardTransport::transmit_raw`] wraps the exchange with tracing.
pub trait CardTransport: fmt::Debug + Send {
    /// Send a raw APDU command and get the response
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error>;
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).do_transmit_raw(command)
    }
}
