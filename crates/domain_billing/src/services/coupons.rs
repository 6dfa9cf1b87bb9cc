//! Coupon redemption
//!
//! Redemption counting depends on where a coupon's style realizes it:
//! invoice- and subscription-style coupons count their discount entries,
//! account-style coupons count their completed credit transactions.

use std::sync::Arc;

use core_kernel::AccountId;

use crate::coupon::Coupon;
use crate::entry::EntryState;
use crate::error::{BillingError, BillingResult};
use crate::ports::BillingStore;
use crate::services::ledger::LedgerService;
use crate::transaction::Transaction;

/// Checks and applies coupon redemption constraints
pub struct CouponService {
    store: Arc<dyn BillingStore>,
    ledger: Arc<LedgerService>,
}

impl CouponService {
    pub fn new(store: Arc<dyn BillingStore>, ledger: Arc<LedgerService>) -> Self {
        Self { store, ledger }
    }

    /// Total redemptions across all accounts
    ///
    /// Entry-realized coupons count only entries a charged invoice has
    /// consumed; account-style coupons count completed transactions.
    pub async fn times_redeemed(&self, coupon: &Coupon) -> BillingResult<u32> {
        let count = if coupon.is_invoiceable() {
            self.store
                .entries_for_coupon(coupon.id)
                .await?
                .iter()
                .filter(|e| e.state == EntryState::Valid && e.is_invoiced())
                .count()
        } else {
            self.store.completed_for_coupon(coupon.id).await?.len()
        };
        Ok(count as u32)
    }

    /// Redemptions attributable to one account
    ///
    /// A valid attached entry counts as a use even before it is
    /// invoiced, so an account cannot stack the same coupon across
    /// subscriptions ahead of billing.
    pub async fn times_redeemed_by_account(
        &self,
        coupon: &Coupon,
        account_id: AccountId,
    ) -> BillingResult<u32> {
        let count = if coupon.is_invoiceable() {
            self.store
                .entries_for_coupon(coupon.id)
                .await?
                .iter()
                .filter(|e| e.state == EntryState::Valid && e.account_id == Some(account_id))
                .count()
        } else {
            self.store
                .completed_for_coupon(coupon.id)
                .await?
                .iter()
                .filter(|t| t.account_id == account_id)
                .count()
        };
        Ok(count as u32)
    }

    /// Whether the coupon has redemptions left at all
    pub async fn is_redeemable(&self, coupon: &Coupon) -> BillingResult<bool> {
        match coupon.max_redemptions {
            None => Ok(true),
            Some(max) => Ok(self.times_redeemed(coupon).await? < max),
        }
    }

    /// Checks every redemption constraint for an account, returning the
    /// specific reason a redemption would be refused
    pub async fn ensure_redeemable_by_account(
        &self,
        coupon: &Coupon,
        account_id: AccountId,
    ) -> BillingResult<()> {
        if !coupon.is_active() {
            return Err(BillingError::ineligible_coupon("This coupon is not active"));
        }
        if !self.is_redeemable(coupon).await? {
            return Err(BillingError::ineligible_coupon(
                "This coupon has been fully redeemed",
            ));
        }
        if let Some(max_uses) = coupon.max_uses {
            if self.times_redeemed_by_account(coupon, account_id).await? >= max_uses {
                return Err(BillingError::ineligible_coupon(
                    "This coupon has already been used by this account",
                ));
            }
        }
        Ok(())
    }

    pub async fn is_redeemable_by_account(
        &self,
        coupon: &Coupon,
        account_id: AccountId,
    ) -> BillingResult<bool> {
        match self.ensure_redeemable_by_account(coupon, account_id).await {
            Ok(()) => Ok(true),
            Err(BillingError::IneligibleCoupon(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Redeems an account-style coupon as a credit transaction
    pub async fn redeem_for_account(
        &self,
        account_id: AccountId,
        code: &str,
    ) -> BillingResult<Transaction> {
        let coupon = self
            .store
            .find_coupon_by_code(code)
            .await?
            .ok_or_else(|| BillingError::not_found("Coupon", code))?;

        if !coupon.is_transactionable() {
            return Err(BillingError::ineligible_coupon(
                "This coupon must be redeemed against an invoice or subscription",
            ));
        }
        self.ensure_redeemable_by_account(&coupon, account_id).await?;

        self.ledger.enter_redeemed_coupon(account_id, &coupon).await
    }
}
