//! Payment attempts
//!
//! A payment is one attempt to move money through the gateway. It
//! produces at most one completed transaction; the ledger's idempotency
//! guard enforces that, not the payment itself. Failed attempts are kept
//! as error-state records carrying the gateway status.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, Money, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::payment_method::PaymentMethodSnapshot;

/// Payment lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Entered,
    Completed,
    Error,
}

/// One gateway charge attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    pub account_id: AccountId,
    pub amount: Money,
    pub state: PaymentState,
    pub description: String,
    /// Snapshot of the instrument charged
    pub payment_method: PaymentMethodSnapshot,
    /// Gateway-side charge id once the call succeeds
    pub ref_id: Option<String>,
    /// Gateway status or a user-safe failure message
    pub status: Option<String>,
    pub state_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a payment in the entered state
    pub fn new(
        account_id: AccountId,
        amount: Money,
        payment_method: PaymentMethodSnapshot,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new_v7(),
            account_id,
            amount,
            state: PaymentState::Entered,
            description: "Payment".to_string(),
            payment_method,
            ref_id: None,
            status: None,
            state_changed_at: now,
            created_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == PaymentState::Completed
    }

    /// Marks the payment completed with the gateway reference
    pub fn complete(
        &mut self,
        ref_id: impl Into<String>,
        status: impl Into<String>,
    ) -> BillingResult<()> {
        if self.state != PaymentState::Entered {
            return Err(BillingError::state_transition(self.state, "Completed"));
        }
        self.state = PaymentState::Completed;
        self.ref_id = Some(ref_id.into());
        self.status = Some(status.into());
        self.state_changed_at = Utc::now();
        Ok(())
    }

    /// Settles the payment in the error state with a user-safe message
    pub fn fail(&mut self, status: impl Into<String>) {
        self.state = PaymentState::Error;
        self.status = Some(status.into());
        self.state_changed_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_method::PaymentMethodKind;

    fn snapshot() -> PaymentMethodSnapshot {
        PaymentMethodSnapshot {
            platform: "mock".to_string(),
            token: "tok_1".to_string(),
            kind: PaymentMethodKind::CreditCard,
            masked_number: None,
            last_4: None,
            expiration_date: None,
        }
    }

    #[test]
    fn test_complete_records_reference() {
        let mut payment = Payment::new(AccountId::new(), Money::from_minor(500), snapshot());
        payment.complete("ch_1", "settled").unwrap();

        assert!(payment.is_completed());
        assert_eq!(payment.ref_id.as_deref(), Some("ch_1"));
    }

    #[test]
    fn test_complete_twice_rejected() {
        let mut payment = Payment::new(AccountId::new(), Money::from_minor(500), snapshot());
        payment.complete("ch_1", "settled").unwrap();
        assert!(payment.complete("ch_2", "settled").is_err());
    }

    #[test]
    fn test_fail_from_completed_keeps_reference() {
        let mut payment = Payment::new(AccountId::new(), Money::from_minor(500), snapshot());
        payment.complete("ch_1", "settled").unwrap();
        payment.fail("recording failed; charge voided");

        assert_eq!(payment.state, PaymentState::Error);
        assert_eq!(payment.ref_id.as_deref(), Some("ch_1"));
    }
}
