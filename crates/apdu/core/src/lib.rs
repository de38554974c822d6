//! Core types for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types for talking to an applet on a
//! secure element through a logical channel, according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! - [`Command`]: a command addressed to a logical channel, serialised in
//!   short or extended form with the channel folded into the class byte
//! - [`Response`]: a response payload with its [`StatusWord`]
//! - [`ChannelHandle`] and [`Aid`]: identifiers for the channel and the applet
//!   it is bound to
//! - [`CardTransport`]: raw byte exchange with a card
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod channel;
pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use channel::{Aid, ChannelHandle};
pub use command::{Command, ExpectedLength};
pub use error::{Error, ResultExt};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::CardTransport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error, ResultExt};

    pub use crate::channel::{Aid, ChannelHandle};
    pub use crate::command::{Command, ExpectedLength};

    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};
    pub use crate::response::utils;

    pub use crate::CardTransport;
}
