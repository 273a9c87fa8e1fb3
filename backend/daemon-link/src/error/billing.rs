use common::ErrorLocation;

use thiserror::Error as ThisError;

/// Errors from the external in-app billing collaborator.
#[derive(Debug, ThisError)]
pub enum BillingError {
    /// The billing backend is not reachable on this device.
    #[error("Billing Unavailable: {message} {location}")]
    Unavailable {
        message: String,
        location: ErrorLocation,
    },

    /// The purchase flow itself failed (not a user cancellation).
    #[error("Purchase Error: {message} {location}")]
    Purchase {
        message: String,
        location: ErrorLocation,
    },

    /// Verification of a completed purchase against the daemon failed.
    #[error("Verification Error: {message} {location}")]
    Verification {
        message: String,
        location: ErrorLocation,
    },
}
