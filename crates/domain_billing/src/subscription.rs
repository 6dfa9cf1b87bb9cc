//! Subscriptions
//!
//! A subscription owns recurring entries, periodically builds and
//! charges an invoice, and manages proration on early cancellation.
//! Orchestration lives in `services::subscriptions`; this module is the
//! state machine and the proration arithmetic.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, InvoiceId, Money, ProductId, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};

/// Subscription lifecycle state
///
/// A failed renewal parks the subscription in `Inactive` until a later
/// renewal succeeds. Cancellation is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Created,
    Inactive,
    Active,
    Cancelled,
}

/// A recurring billing agreement for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique identifier
    pub id: SubscriptionId,
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub state: SubscriptionState,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub is_autorenewable: bool,
    pub is_prorateable: bool,
    pub last_invoice_id: Option<InvoiceId>,
    pub last_charged_at: Option<DateTime<Utc>>,
    pub last_charged_amount: Option<Money>,
    pub state_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates a subscription awaiting its first successful renewal
    pub fn new(account_id: AccountId, product_id: ProductId) -> Self {
        let now = Utc::now();
        Self {
            id: SubscriptionId::new_v7(),
            account_id,
            product_id,
            state: SubscriptionState::Created,
            period_start: None,
            period_end: None,
            is_autorenewable: true,
            is_prorateable: false,
            last_invoice_id: None,
            last_charged_at: None,
            last_charged_amount: None,
            state_changed_at: now,
            created_at: now,
        }
    }

    pub fn prorateable(mut self) -> Self {
        self.is_prorateable = true;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == SubscriptionState::Active
    }

    /// Whether the current period has lapsed; a subscription without a
    /// period yet counts as expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.period_end.map_or(true, |end| end < now)
    }

    /// Active and unexpired is the only state renewal must not touch
    pub fn is_renewable(&self, now: DateTime<Utc>) -> bool {
        self.state != SubscriptionState::Cancelled
            && (self.state != SubscriptionState::Active || self.is_expired(now))
    }

    /// Credit owed for the unused remainder of the period, if any
    ///
    /// `min(last_charged, floor(last_charged × remaining / period))`,
    /// computed only while the period has not expired and the last
    /// charge was positive.
    pub fn prorated_credit(&self, now: DateTime<Utc>) -> Option<Money> {
        if !self.is_prorateable || self.is_expired(now) {
            return None;
        }
        let (start, end) = (self.period_start?, self.period_end?);
        let charged = self.last_charged_amount.filter(Money::is_positive)?;

        let period = (end - start).num_seconds();
        let remaining = (end - now).num_seconds();
        if period <= 0 || remaining <= 0 {
            return None;
        }

        let credit = charged.prorate(remaining, period).ok()?;
        Some(credit.min(charged)).filter(Money::is_positive)
    }

    /// Checks if a state transition is valid
    fn can_transition_to(&self, target: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (self.state, target),
            (Created, Active)
                | (Created, Inactive)
                | (Inactive, Active)
                | (Inactive, Inactive)
                | (Active, Active)
                | (Active, Inactive)
                | (Active, Cancelled)
        )
    }

    /// Moves the subscription to a new state
    pub fn transition_to(&mut self, target: SubscriptionState) -> BillingResult<()> {
        if !self.can_transition_to(target) {
            return Err(BillingError::state_transition(self.state, format!("{target:?}")));
        }
        self.state = target;
        self.state_changed_at = Utc::now();
        Ok(())
    }

    /// Records a successful renewal charge and advances the period
    pub fn note_renewal(
        &mut self,
        period: (DateTime<Utc>, DateTime<Utc>),
        invoice_id: InvoiceId,
        charged: Money,
        now: DateTime<Utc>,
    ) -> BillingResult<()> {
        self.transition_to(SubscriptionState::Active)?;
        self.period_start = Some(period.0);
        self.period_end = Some(period.1);
        self.last_invoice_id = Some(invoice_id);
        self.last_charged_at = Some(now);
        self.last_charged_amount = Some(charged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn active_subscription(now: DateTime<Utc>, days_total: i64, days_elapsed: i64) -> Subscription {
        let mut sub = Subscription::new(AccountId::new(), ProductId::new());
        sub.state = SubscriptionState::Active;
        sub.period_start = Some(now - Duration::days(days_elapsed));
        sub.period_end = Some(now + Duration::days(days_total - days_elapsed));
        sub
    }

    #[test]
    fn test_new_subscription_is_renewable() {
        let sub = Subscription::new(AccountId::new(), ProductId::new());
        assert!(sub.is_renewable(Utc::now()));
        assert!(sub.is_expired(Utc::now()));
    }

    #[test]
    fn test_active_unexpired_not_renewable() {
        let now = Utc::now();
        let sub = active_subscription(now, 30, 10);
        assert!(!sub.is_renewable(now));
    }

    #[test]
    fn test_active_expired_renewable() {
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 10);
        sub.period_end = Some(now - Duration::hours(1));
        assert!(sub.is_renewable(now));
    }

    #[test]
    fn test_cancelled_never_renewable() {
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 40);
        sub.state = SubscriptionState::Cancelled;
        assert!(!sub.is_renewable(now));
        assert!(sub.transition_to(SubscriptionState::Active).is_err());
    }

    #[test]
    fn test_cancel_only_from_active() {
        let mut sub = Subscription::new(AccountId::new(), ProductId::new());
        assert!(sub.transition_to(SubscriptionState::Cancelled).is_err());

        sub.state = SubscriptionState::Active;
        assert!(sub.transition_to(SubscriptionState::Cancelled).is_ok());
    }

    #[test]
    fn test_prorated_credit_worked_example() {
        // charged 1000 for a 30-day period, cancelling at day 10
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 10);
        sub.is_prorateable = true;
        sub.last_charged_amount = Some(Money::from_minor(1000));

        assert_eq!(sub.prorated_credit(now), Some(Money::from_minor(666)));
    }

    #[test]
    fn test_prorated_credit_requires_flag() {
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 10);
        sub.last_charged_amount = Some(Money::from_minor(1000));
        assert_eq!(sub.prorated_credit(now), None);
    }

    #[test]
    fn test_prorated_credit_none_when_expired() {
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 10);
        sub.is_prorateable = true;
        sub.last_charged_amount = Some(Money::from_minor(1000));
        sub.period_end = Some(now - Duration::hours(1));
        assert_eq!(sub.prorated_credit(now), None);
    }

    #[test]
    fn test_prorated_credit_none_without_positive_charge() {
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 10);
        sub.is_prorateable = true;
        sub.last_charged_amount = Some(Money::ZERO);
        assert_eq!(sub.prorated_credit(now), None);
    }

    #[test]
    fn test_prorated_credit_capped_at_last_charge() {
        let now = Utc::now();
        let mut sub = active_subscription(now, 30, 10);
        sub.is_prorateable = true;
        sub.last_charged_amount = Some(Money::from_minor(1000));
        // a degenerate period where "remaining" rounds to the whole charge
        sub.period_start = Some(now - Duration::seconds(1));
        sub.period_end = Some(now + Duration::days(30));
        let credit = sub.prorated_credit(now).unwrap();
        assert!(credit <= Money::from_minor(1000));
    }

    #[test]
    fn test_note_renewal_advances_period() {
        let now = Utc::now();
        let mut sub = Subscription::new(AccountId::new(), ProductId::new());
        let invoice_id = InvoiceId::new();
        let period = (now, now + Duration::days(30));

        sub.note_renewal(period, invoice_id, Money::from_minor(1000), now)
            .unwrap();

        assert_eq!(sub.state, SubscriptionState::Active);
        assert_eq!(sub.period_start, Some(period.0));
        assert_eq!(sub.period_end, Some(period.1));
        assert_eq!(sub.last_invoice_id, Some(invoice_id));
        assert_eq!(sub.last_charged_amount, Some(Money::from_minor(1000)));
    }
}
