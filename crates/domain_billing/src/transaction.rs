//! Ledger transactions
//!
//! A transaction is an immutable row recording one money movement and
//! its state. Completed charges and refunds raise the account balance;
//! completed payments and credits lower it. History is never edited,
//! only voided.

use chrono::{DateTime, Utc};
use core_kernel::{
    AccountId, CouponId, InvoiceId, Money, PaymentId, SubscriptionId, TransactionId,
};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::payment_method::PaymentMethodSnapshot;

/// Direction of the money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Amount the account owes (balance up)
    Charge,
    /// Money collected through the gateway (balance down)
    Payment,
    /// Ledger-only reduction of debt (balance down)
    Credit,
    /// Money returned to the account holder (balance up)
    Refund,
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Entered,
    Processing,
    Completed,
    Void,
    Error,
}

/// An immutable ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub state: TransactionState,
    pub description: String,
    /// Magnitude of the movement; direction comes from `kind`
    pub amount: Money,
    pub account_id: AccountId,
    pub subscription_id: Option<SubscriptionId>,
    pub invoice_id: Option<InvoiceId>,
    pub coupon_id: Option<CouponId>,
    /// The payment attempt that produced this row, if any
    pub payment_id: Option<PaymentId>,
    /// Gateway-side reference for payments and refunds
    pub ref_id: Option<String>,
    /// Human-readable status detail, set on error
    pub status: Option<String>,
    pub payment_method: Option<PaymentMethodSnapshot>,
    pub state_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a transaction in the entered state
    pub fn new(
        kind: TransactionKind,
        account_id: AccountId,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId::new_v7(),
            kind,
            state: TransactionState::Entered,
            description: description.into(),
            amount,
            account_id,
            subscription_id: None,
            invoice_id: None,
            coupon_id: None,
            payment_id: None,
            ref_id: None,
            status: None,
            payment_method: None,
            state_changed_at: now,
            created_at: now,
        }
    }

    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    pub fn for_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn for_coupon(mut self, coupon_id: CouponId) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }

    pub fn for_payment(mut self, payment_id: PaymentId) -> Self {
        self.payment_id = Some(payment_id);
        self
    }

    pub fn with_payment_method(mut self, snapshot: PaymentMethodSnapshot) -> Self {
        self.payment_method = Some(snapshot);
        self
    }

    pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.state == TransactionState::Completed
    }

    /// Signed effect of this transaction on the account balance
    ///
    /// Charges and refunds add to what the account owes; payments and
    /// credits subtract. Only completed transactions count.
    pub fn balance_effect(&self) -> Money {
        match self.kind {
            TransactionKind::Charge | TransactionKind::Refund => self.amount,
            TransactionKind::Payment | TransactionKind::Credit => -self.amount,
        }
    }

    /// Checks if a state transition is valid
    fn can_transition_to(&self, target: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self.state, target),
            (Entered, Processing)
                | (Entered, Completed)
                | (Entered, Error)
                | (Processing, Completed)
                | (Processing, Error)
                | (Completed, Void)
        )
    }

    /// Moves the transaction to a new state
    pub fn transition_to(&mut self, target: TransactionState) -> BillingResult<()> {
        if !self.can_transition_to(target) {
            return Err(BillingError::state_transition(self.state, format!("{target:?}")));
        }
        self.state = target;
        self.state_changed_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(amount: i64) -> Transaction {
        Transaction::new(
            TransactionKind::Charge,
            AccountId::new(),
            Money::from_minor(amount),
            "Charge",
        )
    }

    #[test]
    fn test_balance_effect_signs() {
        let account_id = AccountId::new();
        let amount = Money::from_minor(500);

        let effect = |kind| {
            Transaction::new(kind, account_id, amount, "t").balance_effect()
        };

        assert_eq!(effect(TransactionKind::Charge), amount);
        assert_eq!(effect(TransactionKind::Refund), amount);
        assert_eq!(effect(TransactionKind::Payment), -amount);
        assert_eq!(effect(TransactionKind::Credit), -amount);
    }

    #[test]
    fn test_valid_transitions() {
        let mut t = charge(100);
        assert!(t.transition_to(TransactionState::Completed).is_ok());
        assert!(t.transition_to(TransactionState::Void).is_ok());
    }

    #[test]
    fn test_void_requires_completed() {
        let mut t = charge(100);
        let err = t.transition_to(TransactionState::Void).unwrap_err();
        assert!(matches!(err, BillingError::StateTransition { .. }));
    }

    #[test]
    fn test_no_resurrecting_voided() {
        let mut t = charge(100);
        t.transition_to(TransactionState::Completed).unwrap();
        t.transition_to(TransactionState::Void).unwrap();
        assert!(t.transition_to(TransactionState::Completed).is_err());
    }

    #[test]
    fn test_error_is_terminal() {
        let mut t = charge(100);
        t.transition_to(TransactionState::Error).unwrap();
        assert!(t.transition_to(TransactionState::Completed).is_err());
    }
}
