use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

/// Errors surfaced by the daemon link.
///
/// Channel-level failures ([`LinkError::ChannelClosed`]) are recoverable: they
/// drive a lifecycle transition and mass-cancellation, never a crash. Loss of
/// the channel degrades observer-facing state instead of propagating a fault.
#[derive(Debug, ThisError)]
pub enum LinkError {
    #[error("Handshake Error: {message} {location}")]
    Handshake {
        message: String,
        location: ErrorLocation,
    },

    #[error("Send Error: {message} {location}")]
    Send {
        message: String,
        location: ErrorLocation,
    },

    #[error("Read Error: {message} {location}")]
    Read {
        message: String,
        location: ErrorLocation,
    },

    #[error("Decode Error: {message} {location}")]
    Decode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error("IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },

    /// A request was issued while the link was not in the Connected state.
    #[error("Not Connected Error: {message} {location}")]
    NotConnected {
        message: String,
        location: ErrorLocation,
    },

    /// The daemon closed the channel. Distinguished from generic read errors so
    /// the lifecycle and correlator can treat it specially.
    #[error("Channel Closed: {message} {location}")]
    ChannelClosed {
        message: String,
        location: ErrorLocation,
    },

    /// The pending request was cancelled (disconnect or teardown) before a
    /// response arrived. Surfaced only to that request's awaiting caller.
    #[error("Request Cancelled: {message} {location}")]
    RequestCancelled {
        message: String,
        location: ErrorLocation,
    },
}

impl From<IoError> for LinkError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        LinkError::Io {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<serde_json::Error> for LinkError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        LinkError::Decode {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
