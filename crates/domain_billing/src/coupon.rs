//! Coupons
//!
//! A coupon bounds the redemption of a discount. Invoice- and
//! subscription-style coupons are realized as discount entries; an
//! account-style coupon is realized directly as a credit transaction.
//! Redemption counting lives in `services::coupons` because it needs the
//! store.

use chrono::{DateTime, Utc};
use core_kernel::{CouponId, Money};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// How a redeemed coupon is realized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponStyle {
    /// Discount entry on a single invoice
    Invoice,
    /// Recurring discount entry owned by a subscription
    Subscription,
    /// Direct credit transaction against an account
    Account,
}

/// Coupon lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponState {
    Active,
    Inactive,
}

/// A redeemable discount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    /// Unique identifier
    pub id: CouponId,
    /// Display title
    pub title: String,
    /// Redemption code (unique)
    pub code: String,
    pub style: CouponStyle,
    pub state: CouponState,
    /// Fixed discount in minor units (negative)
    pub amount: Option<Money>,
    /// Percentage discount (negative)
    pub percent: Option<i64>,
    /// Total redemptions allowed across all accounts
    pub max_redemptions: Option<u32>,
    /// Redemptions allowed per account
    pub max_uses: Option<u32>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    /// Creates a new active coupon with a generated code
    pub fn new(title: impl Into<String>, style: CouponStyle) -> Self {
        Self {
            id: CouponId::new_v7(),
            title: title.into(),
            code: generate_code(8),
            style,
            state: CouponState::Active,
            amount: None,
            percent: None,
            max_redemptions: None,
            max_uses: Some(1),
            created_at: Utc::now(),
        }
    }

    /// Sets the redemption code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Sets a fixed discount amount (must be negative)
    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Sets a percentage discount (must be negative)
    pub fn with_percent(mut self, percent: i64) -> Self {
        self.percent = Some(percent);
        self
    }

    /// Caps total redemptions across all accounts
    pub fn with_max_redemptions(mut self, max: u32) -> Self {
        self.max_redemptions = Some(max);
        self
    }

    /// Caps redemptions per account (None removes the cap)
    pub fn with_max_uses(mut self, max: Option<u32>) -> Self {
        self.max_uses = max;
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == CouponState::Active
    }

    /// True when redemption is realized as a discount entry
    pub fn is_invoiceable(&self) -> bool {
        matches!(self.style, CouponStyle::Invoice | CouponStyle::Subscription)
    }

    /// True when redemption is realized as a credit transaction
    pub fn is_transactionable(&self) -> bool {
        self.style == CouponStyle::Account
    }

    /// Validates the coupon before persisting
    pub fn validate(&self) -> BillingResult<()> {
        if self.title.trim().is_empty() {
            return Err(BillingError::validation("Title cannot be blank"));
        }
        if self.code.trim().is_empty() {
            return Err(BillingError::validation("Code cannot be blank"));
        }
        if self.amount.is_none() && self.percent.is_none() {
            return Err(BillingError::validation(
                "Coupon must specify an amount or a percent",
            ));
        }
        if self.amount.is_some_and(|a| !a.is_negative()) {
            return Err(BillingError::validation("Coupon amount must be negative"));
        }
        if self.percent.is_some_and(|p| p >= 0) {
            return Err(BillingError::validation("Coupon percent must be negative"));
        }
        Ok(())
    }
}

/// Generates an alphanumeric redemption code
pub fn generate_code(len: usize) -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(len)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_coupon_defaults() {
        let coupon = Coupon::new("Launch discount", CouponStyle::Subscription);
        assert_eq!(coupon.state, CouponState::Active);
        assert_eq!(coupon.max_uses, Some(1));
        assert_eq!(coupon.code.len(), 8);
    }

    #[test]
    fn test_style_predicates() {
        assert!(Coupon::new("a", CouponStyle::Invoice).is_invoiceable());
        assert!(Coupon::new("b", CouponStyle::Subscription).is_invoiceable());
        assert!(Coupon::new("c", CouponStyle::Account).is_transactionable());
        assert!(!Coupon::new("d", CouponStyle::Account).is_invoiceable());
    }

    #[test]
    fn test_validation_requires_discount() {
        let coupon = Coupon::new("No discount", CouponStyle::Invoice);
        assert!(coupon.validate().is_err());

        let ok = Coupon::new("Ten off", CouponStyle::Invoice).with_percent(-10);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_positive_discount() {
        let coupon = Coupon::new("Backwards", CouponStyle::Invoice)
            .with_amount(Money::from_minor(500));
        assert!(coupon.validate().is_err());

        let percent = Coupon::new("Backwards", CouponStyle::Invoice).with_percent(10);
        assert!(percent.validate().is_err());
    }

    #[test]
    fn test_generate_code_length() {
        assert_eq!(generate_code(8).len(), 8);
        assert_eq!(generate_code(12).len(), 12);
    }
}
