//! Domain shapes decoded from daemon event payloads.
//!
//! Only the shapes matter to the link layer; the daemon owns their meaning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of this device as reported by the daemon's `DeviceState` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeviceState {
    /// Nothing received from the daemon yet (or state is stale).
    Unknown,
    LoggedOut,
    LoggedIn {
        device_name: String,
        account_number: String,
    },
}

impl DeviceState {
    pub fn device_name(&self) -> Option<&str> {
        match self {
            DeviceState::LoggedIn { device_name, .. } => Some(device_name),
            _ => None,
        }
    }

    pub fn account_number(&self) -> Option<&str> {
        match self {
            DeviceState::LoggedIn { account_number, .. } => Some(account_number),
            _ => None,
        }
    }
}

/// Payload of the daemon's `AccountExpiry` event.
///
/// `expiry: None` means the daemon does not know (for example, logged out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountExpiryEvent {
    pub expiry: Option<DateTime<Utc>>,
}
