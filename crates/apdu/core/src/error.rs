//! Core error type for all APDU operations
//!
//! This module provides a centralized error type used throughout the
//! nexum_apdu_core crate and by card transports.

use crate::response::status::StatusWord;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// Failed to connect to the device
    #[error("Connection error: failed to connect to device")]
    ConnectionError,

    /// Failed to transmit data
    #[error("Transmission error: failed to transmit data")]
    TransmissionError,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    //
    // Response related errors
    //
    /// Parse error when processing response
    #[error("Parse error: {0}")]
    ParseError(&'static str),

    /// Status error from response
    #[error("Status error {status}, message: {}", .status.description())]
    StatusError {
        /// Status word that caused the error
        status: StatusWord,
    },

    //
    // Command related errors
    //
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Data too long for the command encoding
    #[error("Data too long: {0} bytes (max {1})")]
    DataTooLong(usize, usize),

    /// Invalid applet identifier
    #[error("Invalid AID: {0}")]
    InvalidAid(&'static str),

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },

    /// Generic dynamic error with string message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new error with a dynamic message
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }

    /// Create a new status error
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::StatusError {
            status: StatusWord::new(sw1, sw2),
        }
    }

    /// Create a new parse error
    pub const fn parse(message: &'static str) -> Self {
        Self::ParseError(message)
    }

    /// Status word carried by this error, looking through context layers
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::StatusError { status } => Some(*status),
            Self::Context { source, .. } => source.status_word(),
            _ => None,
        }
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}
