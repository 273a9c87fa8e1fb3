//! Support types shared across the tunnel client workspace.
//!
//! This crate contains the small, dependency-light pieces every other crate
//! needs: error location tracking and secret redaction. It has no business
//! logic of its own.
//!
//! ## Architecture
//!
//! - **common** (this crate): location-carrying error support, redacted secrets
//! - **daemon-link**: the client-to-daemon communication layer
//! - **linkctl**: headless binary wiring everything together

pub mod error;
pub mod redacted_account;

pub use error::error_location::ErrorLocation;
pub use error::redact_error::RedactError;
pub use redacted_account::RedactedAccountNumber;
