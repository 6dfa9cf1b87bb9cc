//! Billing domain errors

use core_kernel::{Money, MoneyError, PaymentId, PortError};
use thiserror::Error;

use crate::ports::GatewayError;

/// Result alias for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Entity failed validation before persisting
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// The payment gateway rejected or failed an operation
    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        code: Option<String>,
    },

    /// A second completion attempt for the same payment
    #[error("A completed transaction already exists for payment {payment_id}")]
    DuplicateTransaction { payment_id: PaymentId },

    /// Payment below the minimum chargeable amount
    #[error("Payment amount must be greater than {minimum}")]
    InsufficientAmount { minimum: Money },

    /// Coupon cannot be redeemed in this context
    #[error("Ineligible coupon: {0}")]
    IneligibleCoupon(String),

    /// Operation not allowed in the entity's current state
    #[error("Invalid state transition: {from} -> {to}")]
    StateTransition { from: String, to: String },

    /// Storage adapter failure
    #[error("Storage error: {0}")]
    Storage(#[from] PortError),

    /// Money arithmetic failure
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),
}

impl BillingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn state_transition(from: impl std::fmt::Debug, to: impl Into<String>) -> Self {
        BillingError::StateTransition {
            from: format!("{from:?}"),
            to: to.into(),
        }
    }

    pub fn ineligible_coupon(message: impl Into<String>) -> Self {
        BillingError::IneligibleCoupon(message.into())
    }

    /// Returns true if the error indicates a duplicate ledger entry
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BillingError::DuplicateTransaction { .. })
    }
}

impl From<GatewayError> for BillingError {
    fn from(err: GatewayError) -> Self {
        BillingError::Gateway {
            message: err.message,
            code: err.code.map(|c| c.as_str().to_string()),
        }
    }
}
