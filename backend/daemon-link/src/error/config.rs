use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("Config Read Error: {message} {location}")]
    Read {
        message: String,
        location: ErrorLocation,
    },

    #[error("Config Write Error: {message} {location}")]
    Write {
        message: String,
        location: ErrorLocation,
    },

    #[error("Config Parse Error: {message} {location}")]
    Parse {
        message: String,
        location: ErrorLocation,
    },

    #[error("Config Invalid: {message} {location}")]
    Invalid {
        message: String,
        location: ErrorLocation,
    },
}

impl From<IoError> for ConfigError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        ConfigError::Read {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
