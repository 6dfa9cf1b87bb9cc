//! Billing accounts
//!
//! The account is the balance aggregate. Its balance is derivable from
//! the completed transactions that reference it; the stored value is a
//! cache maintained by fast-path increments and corrected by the
//! authoritative recompute in `LedgerService::update_balance`.

use chrono::{DateTime, Duration, Utc};
use core_kernel::{AccountId, Money, PaymentMethodId};
use serde::{Deserialize, Serialize};

/// Minimum positive balance, in minor units, before an overdue account
/// counts as delinquent
pub const DELINQUENCY_FLOOR: Money = Money::from_minor(200);

/// Whether the account is in good standing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceState {
    Paid,
    Delinquent,
}

/// The balance aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: AccountId,
    /// Customer id at the payment gateway, created lazily
    pub customer_id: Option<String>,
    /// Gateway platform the customer was created on
    pub platform: Option<String>,
    /// Cached balance in minor units; positive means the account owes
    pub balance: Money,
    /// Set while balance > 0; once past, the account is delinquent
    pub balance_overdue_at: Option<DateTime<Utc>>,
    pub last_payment_attempted_at: Option<DateTime<Utc>>,
    pub default_payment_method_id: Option<PaymentMethodId>,
    /// Flagged when fast-path increments may have drifted
    pub needs_balancing: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new account with a zero balance
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new_v7(),
            customer_id: None,
            platform: None,
            balance: Money::ZERO,
            balance_overdue_at: None,
            last_payment_attempted_at: None,
            default_payment_method_id: None,
            needs_balancing: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Delinquent iff the balance exceeds the floor and the grace period
    /// has lapsed
    pub fn balance_state(&self, now: DateTime<Utc>) -> BalanceState {
        if self.balance > DELINQUENCY_FLOOR && self.is_balance_overdue(now) {
            BalanceState::Delinquent
        } else {
            BalanceState::Paid
        }
    }

    pub fn is_balance_overdue(&self, now: DateTime<Utc>) -> bool {
        self.balance_overdue_at.map_or(false, |at| at < now)
    }

    /// Records a new balance, maintaining the overdue marker:
    /// set to now + grace the moment the balance goes positive, cleared
    /// the moment it returns to zero or below.
    pub fn note_balance(&mut self, balance: Money, now: DateTime<Utc>, grace_days: i64) {
        if self.balance_overdue_at.is_some() && !balance.is_positive() {
            self.balance_overdue_at = None;
        } else if self.balance_overdue_at.is_none() && balance.is_positive() {
            self.balance_overdue_at = Some(now + Duration::days(grace_days));
        }
        self.balance = balance;
        self.updated_at = now;
    }

    /// Whether an automatic payment attempt is allowed yet
    pub fn is_payment_attempt_ready(&self, now: DateTime<Utc>, cooldown_hours: i64) -> bool {
        self.last_payment_attempted_at
            .map_or(true, |at| at + Duration::hours(cooldown_hours) < now)
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new()
    }
}
