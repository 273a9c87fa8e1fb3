//! Secure account number handling with redacted Debug output.

use crate::{ErrorLocation, RedactError};

use std::fmt;
use std::panic::Location;

use serde::ser::Error;
use zeroize::Zeroize;

/// A tunnel account number that never exposes its value in logs or debug output.
///
/// Account numbers are the only credential in this system, so leaking one into a
/// log file is equivalent to leaking a password.
#[derive(Clone)]
pub struct RedactedAccountNumber {
    inner: String,
}

impl RedactedAccountNumber {
    /// Create a new redacted account number.
    pub fn new(account_number: String) -> Self {
        Self {
            inner: account_number,
        }
    }

    /// Get the actual account number for transmission.
    ///
    /// # Security Note
    /// Only call this when actually sending the account number to the daemon.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Get the account number length (safe to log).
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if the account number is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl PartialEq for RedactedAccountNumber {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl Eq for RedactedAccountNumber {}

impl fmt::Debug for RedactedAccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RedactedAccountNumber([REDACTED])")
    }
}

impl fmt::Display for RedactedAccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED ACCOUNT NUMBER]")
    }
}

impl Drop for RedactedAccountNumber {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

// Prevent accidental serialization
impl serde::Serialize for RedactedAccountNumber {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Err(S::Error::custom(RedactError::Serialization {
            message: String::from(
                "RedactedAccountNumber cannot be serialized - use as_str() explicitly",
            ),
            location: ErrorLocation::from(Location::caller()),
        }))
    }
}
