//! Billable entries
//!
//! An entry is a billable line-item template attached to an account,
//! subscription, or invoice. The invoices_limit/invoiced_count pair lets
//! an owner know which entries are still invoiceable (recurring or
//! once-only) when it builds the next invoice.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, CouponId, EntryId, InvoiceId, Money, ProductId, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::coupon::Coupon;
use crate::error::{BillingError, BillingResult};
use crate::product::Product;

/// What the entry adjusts or charges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Product charge
    Product,
    /// Manual one-off charge
    General,
    /// Partial-period adjustment
    Prorate,
    /// Discount (percent or fixed)
    Discount,
    /// Tax or fee
    Tax,
}

impl EntrySource {
    /// Display precedence on an invoice: charges first, adjustments last
    pub fn precedence(&self) -> u8 {
        match self {
            EntrySource::Product => 0,
            EntrySource::General => 1,
            EntrySource::Prorate => 2,
            EntrySource::Discount => 3,
            EntrySource::Tax => 4,
        }
    }

    /// True for sources that contribute to the invoice subtotal
    pub fn is_line_item(&self) -> bool {
        !matches!(self, EntrySource::Discount | EntrySource::Tax)
    }
}

/// What kind of owner the entry is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryContext {
    Account,
    Subscription,
    Invoice,
}

/// Entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Valid,
    Voided,
}

/// A billable line-item template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Unique identifier
    pub id: EntryId,
    pub description: String,
    pub context: EntryContext,
    pub source: EntrySource,
    pub state: EntryState,
    /// Fixed contribution per unit in minor units
    pub amount: Option<Money>,
    /// Percentage contribution against a reference amount
    pub percent: Option<i64>,
    /// Unit count, must be positive
    pub quantity: i64,
    /// How many invoices may consume this entry (None = unlimited)
    pub invoices_limit: Option<u32>,
    /// How many charged invoices have consumed it
    pub invoiced_count: u32,
    pub account_id: Option<AccountId>,
    pub subscription_id: Option<SubscriptionId>,
    pub invoice_id: Option<InvoiceId>,
    pub coupon_id: Option<CouponId>,
    pub product_id: Option<ProductId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    /// Creates a bare entry; callers attach a context before saving
    pub fn new(description: impl Into<String>, source: EntrySource) -> Self {
        let now = Utc::now();
        Self {
            id: EntryId::new_v7(),
            description: description.into(),
            context: EntryContext::Account,
            source,
            state: EntryState::Valid,
            amount: None,
            percent: None,
            quantity: 1,
            invoices_limit: None,
            invoiced_count: 0,
            account_id: None,
            subscription_id: None,
            invoice_id: None,
            coupon_id: None,
            product_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a product charge entry
    pub fn from_product(product: &Product, quantity: i64) -> Self {
        let mut entry = Entry::new(product.name.clone(), EntrySource::Product);
        entry.amount = Some(product.price);
        entry.quantity = quantity;
        entry.product_id = Some(product.id);
        entry
    }

    /// Builds a discount entry from a coupon; the coupon's per-account
    /// cap becomes the entry's invoice limit
    pub fn from_coupon(coupon: &Coupon) -> Self {
        let mut entry = Entry::new(format!("Coupon: {}", coupon.title), EntrySource::Discount);
        entry.amount = coupon.amount;
        entry.percent = coupon.percent;
        entry.invoices_limit = coupon.max_uses;
        entry.coupon_id = Some(coupon.id);
        entry
    }

    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_percent(mut self, percent: i64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn with_invoices_limit(mut self, limit: u32) -> Self {
        self.invoices_limit = Some(limit);
        self
    }

    /// Attaches the entry to an account
    pub fn for_account(mut self, account_id: AccountId) -> Self {
        self.context = EntryContext::Account;
        self.account_id = Some(account_id);
        self
    }

    /// Attaches the entry to a subscription
    pub fn for_subscription(mut self, subscription_id: SubscriptionId, account_id: AccountId) -> Self {
        self.context = EntryContext::Subscription;
        self.subscription_id = Some(subscription_id);
        self.account_id = Some(account_id);
        self
    }

    /// Attaches the entry to a single invoice
    pub fn for_invoice(mut self, invoice_id: InvoiceId, account_id: AccountId) -> Self {
        self.context = EntryContext::Invoice;
        self.invoice_id = Some(invoice_id);
        self.account_id = Some(account_id);
        self
    }

    /// The entry's contribution to an invoice total
    ///
    /// A percent entry contributes `reference × percent / 100` rounded to
    /// the cent; the fixed amount × quantity is always added on top.
    /// Entries without a percent ignore `reference`.
    pub fn total_amount(&self, reference: Option<Money>) -> Money {
        let mut total = self
            .amount
            .unwrap_or(Money::ZERO)
            .checked_mul(self.quantity)
            .unwrap_or(Money::ZERO);
        if let (Some(percent), Some(reference)) = (self.percent, reference) {
            total += reference.percent_of(percent);
        }
        total
    }

    /// Whether this entry may still be consumed into an invoice
    pub fn is_invoiceable(&self) -> bool {
        self.state != EntryState::Voided
            && self
                .invoices_limit
                .map_or(true, |limit| self.invoiced_count < limit)
    }

    /// Whether a charged invoice has consumed this entry
    pub fn is_invoiced(&self) -> bool {
        self.invoiced_count > 0
    }

    /// Voids the entry, keeping it for invoice history
    pub fn void(&mut self) {
        self.state = EntryState::Voided;
        self.updated_at = Utc::now();
    }

    /// Validates the entry before persisting
    pub fn validate(&self) -> BillingResult<()> {
        if self.description.trim().is_empty() {
            return Err(BillingError::validation("Entry needs a description"));
        }
        if self.amount.is_none() && self.percent.is_none() {
            return Err(BillingError::validation(
                "Entry must specify an amount or a percent",
            ));
        }
        if self.quantity <= 0 {
            return Err(BillingError::validation("Quantity must be greater than 0"));
        }
        let has_owner = match self.context {
            EntryContext::Account => self.account_id.is_some(),
            EntryContext::Subscription => self.subscription_id.is_some(),
            EntryContext::Invoice => self.invoice_id.is_some(),
        };
        if !has_owner {
            return Err(BillingError::validation("Entry is missing its context owner"));
        }
        Ok(())
    }
}
