//! Link configuration.
//!
//! A small versioned JSON file, loaded once at startup by the embedding
//! application. Every field has a serde default so a partial or missing file
//! degrades gracefully instead of failing startup.

use crate::DAEMON_DEFAULT_ENDPOINT;
use crate::error::ConfigError;
use crate::message::RequestKind;

use common::ErrorLocation;

use std::fs;
use std::panic::Location;
use std::path::Path;
use std::time::Duration;

use backoff::ExponentialBackoff;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

pub const CONFIG_FILE_NAME: &str = "daemon-link.json";
const CONFIG_VERSION: u32 = 1;

/// Reconnect behavior after the channel to the daemon is lost.
///
/// Automatic reconnect is opt-in: an unprompted reconnect loop against a
/// service that was stopped on purpose is a correctness hazard, so the default
/// requires an explicit `connect()` from the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectPolicy {
    #[serde(default)]
    pub auto_reconnect: bool,
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Give up dialing after this long. `None` keeps retrying forever.
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: Option<u64>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: false,
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

impl ReconnectPolicy {
    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_elapsed_time: self.max_elapsed_ms.map(Duration::from_millis),
            ..ExponentialBackoff::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// WebSocket endpoint of the local daemon.
    #[serde(default = "default_endpoint")]
    pub daemon_endpoint: String,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Wait after a purchase attempt completes before re-querying payment
    /// availability, so the daemon's own state has caught up with the
    /// just-completed purchase and the query reliably observes the
    /// post-purchase state.
    #[serde(default = "default_payment_availability_delay_ms")]
    pub payment_availability_delay_ms: u64,

    /// Requests re-issued on every (re)connect to prime replay-latest state.
    /// Events that occurred before the subscription existed are otherwise lost.
    #[serde(default = "default_initial_requests")]
    pub initial_requests: Vec<RequestKind>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            daemon_endpoint: default_endpoint(),
            reconnect: ReconnectPolicy::default(),
            payment_availability_delay_ms: default_payment_availability_delay_ms(),
            initial_requests: default_initial_requests(),
        }
    }
}

impl LinkConfig {
    pub fn payment_availability_delay(&self) -> Duration {
        Duration::from_millis(self.payment_availability_delay_ms)
    }

    /// Load from `path`, falling back to defaults on a missing or corrupt
    /// file. The fallback is logged, never fatal.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Read { .. }) => {
                info!("No link config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Ignoring corrupt link config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load and validate from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;

        let config: Self = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            message: format!("Failed to parse {}: {e}", path.display()),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if config.version > CONFIG_VERSION {
            warn!(
                "Link config version {} is newer than supported version {CONFIG_VERSION}",
                config.version
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Write to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Write {
            message: format!("Failed to serialize link config: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        fs::write(path, contents).map_err(|e| ConfigError::Write {
            message: format!("Failed to write {}: {e}", path.display()),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.daemon_endpoint).map_err(|e| ConfigError::Invalid {
            message: format!("Invalid daemon endpoint '{}': {e}", self.daemon_endpoint),
            location: ErrorLocation::from(Location::caller()),
        })?;

        match endpoint.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(ConfigError::Invalid {
                message: format!("Daemon endpoint scheme must be ws or wss, got '{other}'"),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_endpoint() -> String {
    DAEMON_DEFAULT_ENDPOINT.to_string()
}

fn default_initial_interval_ms() -> u64 {
    500
}

fn default_max_interval_ms() -> u64 {
    10_000
}

fn default_max_elapsed_ms() -> Option<u64> {
    Some(30_000)
}

fn default_payment_availability_delay_ms() -> u64 {
    500
}

fn default_initial_requests() -> Vec<RequestKind> {
    vec![
        RequestKind::FetchDeviceState,
        RequestKind::FetchAccountExpiry,
        RequestKind::FetchRelayList,
        RequestKind::FetchSettings,
    ]
}
