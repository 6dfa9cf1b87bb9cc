//! Subscription lifecycle
//!
//! Renewal builds and charges an invoice from the subscription's
//! invoiceable entries; cancellation credits unused time when the
//! subscription allows proration. Charge failures park the subscription
//! inactive with the failed invoice voided.

use std::sync::Arc;

use chrono::Utc;
use core_kernel::{AccountId, EntryId, SubscriptionId};
use tracing::{info, warn};

use crate::config::BillingConfig;
use crate::coupon::CouponStyle;
use crate::entry::{Entry, EntryState};
use crate::error::{BillingError, BillingResult};
use crate::ports::BillingStore;
use crate::services::coupons::CouponService;
use crate::services::invoicing::InvoiceService;
use crate::services::ledger::{CreditOptions, LedgerService};
use crate::subscription::{Subscription, SubscriptionState};

/// Drives subscription renewal, cancellation, and entry management
pub struct SubscriptionService {
    store: Arc<dyn BillingStore>,
    config: BillingConfig,
    ledger: Arc<LedgerService>,
    invoices: Arc<InvoiceService>,
    coupons: Arc<CouponService>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        config: BillingConfig,
        ledger: Arc<LedgerService>,
        invoices: Arc<InvoiceService>,
        coupons: Arc<CouponService>,
    ) -> Self {
        Self {
            store,
            config,
            ledger,
            invoices,
            coupons,
        }
    }

    /// Creates a subscription to a product and attempts the first charge
    ///
    /// The subscription is returned whatever the charge outcome; a
    /// declined first charge leaves it inactive for a later retry.
    pub async fn subscribe(
        &self,
        account_id: AccountId,
        product_key: &str,
    ) -> BillingResult<Subscription> {
        let product = self
            .store
            .find_product_by_key(product_key)
            .await?
            .ok_or_else(|| BillingError::not_found("Product", product_key))?;
        if !product.is_available {
            return Err(BillingError::validation("Product is not available"));
        }
        if self.store.find_account(account_id).await?.is_none() {
            return Err(BillingError::not_found("Account", account_id));
        }

        let subscription = Subscription::new(account_id, product.id);
        self.store.save_subscription(&subscription).await?;

        let entry = Entry::from_product(&product, 1).for_subscription(subscription.id, account_id);
        entry.validate()?;
        self.store.save_entry(&entry).await?;

        match self.renew(subscription.id).await {
            Ok(renewed) => Ok(renewed),
            Err(err) => {
                warn!(subscription = %subscription.id, error = %err, "first charge failed");
                self.require_subscription(subscription.id).await
            }
        }
    }

    /// Renews the subscription: invoice, charge, advance the period
    ///
    /// Allowed only when the subscription is not active or its period
    /// has expired. On charge failure the just-built invoice is voided
    /// and the subscription goes inactive.
    pub async fn renew(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        let mut subscription = self.require_subscription(subscription_id).await?;
        let now = Utc::now();
        if !subscription.is_renewable(now) {
            return Err(BillingError::state_transition(
                subscription.state,
                "Active (renewal)",
            ));
        }

        let product = self
            .store
            .find_product(subscription.product_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Product", subscription.product_id))?;

        let start = subscription.period_end.unwrap_or(now);
        let period = (start, product.advance_period(start));

        let invoice = self
            .invoices
            .build_for_subscription(
                &subscription,
                self.config.default_invoice_description.clone(),
                period,
            )
            .await?;

        match self.invoices.charge_to_account(invoice.id).await {
            Ok(transaction) => {
                subscription.note_renewal(period, invoice.id, transaction.amount, now)?;
                self.store.save_subscription(&subscription).await?;
                info!(subscription = %subscription.id, invoice = %invoice.id, "subscription renewed");
                Ok(subscription)
            }
            Err(charge_err) => {
                if let Err(void_err) = self.invoices.void(invoice.id).await {
                    warn!(invoice = %invoice.id, error = %void_err, "could not void failed renewal invoice");
                }
                subscription.transition_to(SubscriptionState::Inactive)?;
                self.store.save_subscription(&subscription).await?;
                warn!(subscription = %subscription.id, error = %charge_err, "renewal charge failed");
                Err(charge_err)
            }
        }
    }

    /// Cancels an active subscription, crediting unused time when
    /// proration applies. Terminal.
    pub async fn cancel(&self, subscription_id: SubscriptionId) -> BillingResult<Subscription> {
        let mut subscription = self.require_subscription(subscription_id).await?;
        if !subscription.is_active() {
            return Err(BillingError::state_transition(
                subscription.state,
                "Cancelled",
            ));
        }

        let now = Utc::now();
        if let Some(credit) = subscription.prorated_credit(now) {
            self.ledger
                .enter_credit(
                    subscription.account_id,
                    credit,
                    CreditOptions {
                        description: Some("Credit for unused subscription time".to_string()),
                        subscription_id: Some(subscription.id),
                        coupon_id: None,
                    },
                )
                .await?;
            info!(subscription = %subscription.id, credit = %credit, "prorated credit issued");
        }

        subscription.period_end = Some(now);
        subscription.transition_to(SubscriptionState::Cancelled)?;
        self.store.save_subscription(&subscription).await?;
        Ok(subscription)
    }

    /// Attaches a billable entry to the subscription
    pub async fn add_entry(
        &self,
        subscription_id: SubscriptionId,
        entry: Entry,
    ) -> BillingResult<Entry> {
        let subscription = self.require_subscription(subscription_id).await?;
        let entry = entry.for_subscription(subscription.id, subscription.account_id);
        entry.validate()?;
        self.store.save_entry(&entry).await?;
        Ok(entry)
    }

    /// Removes an entry from the subscription
    ///
    /// A never-invoiced entry is deleted outright; an entry some charged
    /// invoice has consumed is voided instead, preserving history.
    pub async fn remove_entry(
        &self,
        subscription_id: SubscriptionId,
        entry_id: EntryId,
    ) -> BillingResult<()> {
        let mut entry = self
            .store
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Entry", entry_id))?;
        if entry.subscription_id != Some(subscription_id) {
            return Err(BillingError::validation(
                "Entry does not belong to this subscription",
            ));
        }

        if entry.is_invoiced() {
            entry.void();
            self.store.save_entry(&entry).await?;
        } else {
            self.store.delete_entry(entry_id).await?;
        }
        Ok(())
    }

    /// Attaches a subscription-style coupon as a recurring discount
    pub async fn attach_coupon(
        &self,
        subscription_id: SubscriptionId,
        code: &str,
    ) -> BillingResult<Entry> {
        let subscription = self.require_subscription(subscription_id).await?;
        let coupon = self
            .store
            .find_coupon_by_code(code)
            .await?
            .ok_or_else(|| BillingError::not_found("Coupon", code))?;

        if coupon.style != CouponStyle::Subscription {
            return Err(BillingError::ineligible_coupon(
                "This coupon cannot be attached to a subscription",
            ));
        }
        let already_attached = self
            .store
            .entries_for_coupon(coupon.id)
            .await?
            .iter()
            .any(|e| e.subscription_id == Some(subscription_id) && e.state == EntryState::Valid);
        if already_attached {
            return Err(BillingError::ineligible_coupon(
                "This coupon is already attached to this subscription",
            ));
        }
        self.coupons
            .ensure_redeemable_by_account(&coupon, subscription.account_id)
            .await?;

        let entry = Entry::from_coupon(&coupon)
            .for_subscription(subscription.id, subscription.account_id);
        entry.validate()?;
        self.store.save_entry(&entry).await?;
        Ok(entry)
    }

    /// Renews every autorenewable subscription whose period has lapsed
    ///
    /// Safe to run repeatedly: a subscription renewed by an earlier run
    /// is no longer expired and drops out of the query.
    pub async fn process_expired_subscriptions(&self) -> BillingResult<usize> {
        let expired = self
            .store
            .active_expired_subscriptions(Utc::now())
            .await?;
        let mut renewed = 0;
        for subscription in expired.iter().filter(|s| s.is_autorenewable) {
            match self.renew(subscription.id).await {
                Ok(_) => renewed += 1,
                Err(err) => {
                    warn!(subscription = %subscription.id, error = %err, "scheduled renewal failed");
                }
            }
        }
        Ok(renewed)
    }

    async fn require_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> BillingResult<Subscription> {
        self.store
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription", subscription_id))
    }
}
