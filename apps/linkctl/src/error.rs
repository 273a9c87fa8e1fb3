use common::ErrorLocation;

use std::panic::Location;

use daemon_link::error::{ConfigError, LinkError};
use thiserror::Error;

/// Errors that can occur while running the CLI.
#[derive(Debug, Error)]
pub enum LinkctlError {
    /// Error from this app (setup, filesystem, output)
    #[error("Linkctl Error: {message} {location}")]
    Linkctl {
        message: String,
        location: ErrorLocation,
    },

    /// Error from the daemon link
    #[error("Link Error: {message} {location}")]
    Link {
        message: String,
        location: ErrorLocation,
    },

    /// Error in the link configuration
    #[error("Config Error: {message} {location}")]
    Config {
        message: String,
        location: ErrorLocation,
    },
}

impl From<LinkError> for LinkctlError {
    #[track_caller]
    fn from(error: LinkError) -> Self {
        LinkctlError::Link {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ConfigError> for LinkctlError {
    #[track_caller]
    fn from(error: ConfigError) -> Self {
        LinkctlError::Config {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
