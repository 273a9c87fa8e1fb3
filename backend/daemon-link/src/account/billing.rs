//! Seam to the external in-app billing collaborator.
//!
//! Real implementations wrap a platform billing SDK; tests substitute scripted
//! fakes. The link layer only depends on this trait.

use crate::error::BillingError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A purchasable time product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub price: String,
}

/// Outcome of a payment-availability query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAvailability {
    ProductsAvailable(Vec<Product>),
    ProductsUnavailable,
    Error(String),
}

/// Outcome of one purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseResult {
    Completed,
    /// Payment accepted but verification against the daemon is still pending.
    Pending,
    /// The user backed out; not an error.
    Cancelled,
    VerificationFailed(String),
    Error(String),
}

/// Outcome of verifying previously made purchases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    NothingToVerify,
    Verified,
    Error(String),
}

impl VerificationResult {
    /// The purchase result a verification outcome implies, if any.
    pub fn to_purchase_result(&self) -> Option<PurchaseResult> {
        match self {
            VerificationResult::NothingToVerify => None,
            VerificationResult::Verified => Some(PurchaseResult::Completed),
            VerificationResult::Error(reason) => {
                Some(PurchaseResult::VerificationFailed(reason.clone()))
            }
        }
    }
}

/// External billing backend.
#[async_trait]
pub trait BillingClient: Send + Sync + 'static {
    /// What products, if any, can currently be purchased.
    async fn query_availability(&self) -> Result<PaymentAvailability, BillingError>;

    /// Run the purchase flow for `product_id` to completion.
    async fn purchase_product(&self, product_id: &str) -> Result<PurchaseResult, BillingError>;

    /// Verify any outstanding purchases against the daemon.
    async fn verify_purchases(&self) -> Result<VerificationResult, BillingError>;
}
