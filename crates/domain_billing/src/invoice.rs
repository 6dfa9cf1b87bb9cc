//! Invoices
//!
//! An invoice snapshots a set of invoiceable entries and computes its
//! totals in a fixed three-pass order:
//! 1. subtotal over the line items (product, general, proration)
//! 2. discounts against the subtotal, clamped so they can never exceed it
//! 3. taxes and fees against the discount total
//!
//! The tax base in pass 3 is the discount total, not the discounted
//! subtotal. That matches the behavior billing history was built on;
//! change it only with a migration plan for open invoices.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, EntryId, InvoiceId, Money, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntrySource};
use crate::error::{BillingError, BillingResult};

/// Invoice lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Open,
    Charged,
    Paid,
    Voided,
}

/// Computed invoice totals, all in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Money,
    pub discount_total: Money,
    pub tax_total: Money,
    pub total: Money,
}

/// A point-in-time snapshot of entries with a charge outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: InvoiceId,
    pub account_id: AccountId,
    pub subscription_id: Option<SubscriptionId>,
    pub description: String,
    pub state: InvoiceState,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    /// Entry snapshot in display order
    pub entries: Vec<Entry>,
    /// Amount actually charged, set on the open -> charged transition
    pub charged_amount: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Builds an open invoice from the invoiceable subset of `entries`,
    /// snapshotted in display-precedence order
    pub fn from_entries(
        account_id: AccountId,
        description: impl Into<String>,
        entries: Vec<Entry>,
    ) -> Self {
        let now = Utc::now();
        let mut snapshot: Vec<Entry> = entries.into_iter().filter(Entry::is_invoiceable).collect();
        snapshot.sort_by_key(|e| e.source.precedence());

        Self {
            id: InvoiceId::new_v7(),
            account_id,
            subscription_id: None,
            description: description.into(),
            state: InvoiceState::Open,
            period_start: None,
            period_end: None,
            entries: snapshot,
            charged_amount: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.period_start = Some(start);
        self.period_end = Some(end);
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == InvoiceState::Open
    }

    /// Entry ids in the snapshot
    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// Computes the invoice totals
    pub fn totals(&self) -> InvoiceTotals {
        let subtotal: Money = self
            .entries
            .iter()
            .filter(|e| e.source.is_line_item())
            .map(|e| e.total_amount(None))
            .sum();

        let mut discount_total: Money = self
            .entries
            .iter()
            .filter(|e| e.source == EntrySource::Discount)
            .map(|e| e.total_amount(Some(subtotal)))
            .sum();
        // a discount can never exceed or flip the sign of the subtotal
        if discount_total.abs() > subtotal.abs() {
            discount_total = -subtotal;
        }

        let tax_total: Money = self
            .entries
            .iter()
            .filter(|e| e.source == EntrySource::Tax)
            .map(|e| e.total_amount(Some(discount_total)))
            .sum();

        InvoiceTotals {
            subtotal,
            discount_total,
            tax_total,
            total: subtotal + discount_total + tax_total,
        }
    }

    /// Records the successful charge; only an open invoice can charge
    pub fn mark_charged(&mut self, amount: Money) -> BillingResult<()> {
        if self.state != InvoiceState::Open {
            return Err(BillingError::state_transition(self.state, "Charged"));
        }
        self.state = InvoiceState::Charged;
        self.charged_amount = Some(amount);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks a charged invoice as settled
    pub fn mark_paid(&mut self) -> BillingResult<()> {
        if self.state != InvoiceState::Charged {
            return Err(BillingError::state_transition(self.state, "Paid"));
        }
        self.state = InvoiceState::Paid;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Voids the invoice; voiding twice is an error
    pub fn mark_voided(&mut self) -> BillingResult<()> {
        if !matches!(self.state, InvoiceState::Open | InvoiceState::Charged) {
            return Err(BillingError::state_transition(self.state, "Voided"));
        }
        self.state = InvoiceState::Voided;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryState;

    fn entry(source: EntrySource) -> Entry {
        Entry::new("test", source).for_account(AccountId::new())
    }

    fn invoice_with(entries: Vec<Entry>) -> Invoice {
        Invoice::from_entries(AccountId::new(), "Test invoice", entries)
    }

    #[test]
    fn test_totals_worked_example() {
        // product 1000 x 2, discount -10%, tax 8% on the discount total
        let invoice = invoice_with(vec![
            entry(EntrySource::Product)
                .with_amount(Money::from_minor(1000))
                .with_quantity(2),
            entry(EntrySource::Discount).with_percent(-10),
            entry(EntrySource::Tax).with_percent(8),
        ]);

        let totals = invoice.totals();
        assert_eq!(totals.subtotal, Money::from_minor(2000));
        assert_eq!(totals.discount_total, Money::from_minor(-200));
        assert_eq!(totals.tax_total, Money::from_minor(-16));
        assert_eq!(totals.total, Money::from_minor(1784));
    }

    #[test]
    fn test_totals_identity() {
        let invoice = invoice_with(vec![
            entry(EntrySource::Product).with_amount(Money::from_minor(1250)),
            entry(EntrySource::General).with_amount(Money::from_minor(300)),
            entry(EntrySource::Discount).with_amount(Money::from_minor(-100)),
            entry(EntrySource::Tax).with_percent(5),
        ]);

        let t = invoice.totals();
        assert_eq!(t.total, t.subtotal + t.discount_total + t.tax_total);
    }

    #[test]
    fn test_discount_clamped_to_subtotal() {
        let invoice = invoice_with(vec![
            entry(EntrySource::Product).with_amount(Money::from_minor(500)),
            entry(EntrySource::Discount).with_amount(Money::from_minor(-2000)),
        ]);

        let totals = invoice.totals();
        assert_eq!(totals.discount_total, Money::from_minor(-500));
        assert_eq!(totals.total, Money::ZERO);
    }

    #[test]
    fn test_proration_counts_toward_subtotal() {
        let invoice = invoice_with(vec![
            entry(EntrySource::Product).with_amount(Money::from_minor(1000)),
            entry(EntrySource::Prorate).with_amount(Money::from_minor(-400)),
        ]);

        assert_eq!(invoice.totals().subtotal, Money::from_minor(600));
    }

    #[test]
    fn test_snapshot_drops_uninvoiceable_entries() {
        let mut voided = entry(EntrySource::Product).with_amount(Money::from_minor(100));
        voided.state = EntryState::Voided;
        let mut exhausted = entry(EntrySource::Discount)
            .with_percent(-10)
            .with_invoices_limit(1);
        exhausted.invoiced_count = 1;

        let invoice = invoice_with(vec![
            voided,
            exhausted,
            entry(EntrySource::Product).with_amount(Money::from_minor(100)),
        ]);

        assert_eq!(invoice.entries.len(), 1);
    }

    #[test]
    fn test_snapshot_is_display_ordered() {
        let invoice = invoice_with(vec![
            entry(EntrySource::Tax).with_percent(8),
            entry(EntrySource::Product).with_amount(Money::from_minor(100)),
            entry(EntrySource::Discount).with_percent(-10),
        ]);

        let sources: Vec<EntrySource> = invoice.entries.iter().map(|e| e.source).collect();
        assert_eq!(
            sources,
            vec![EntrySource::Product, EntrySource::Discount, EntrySource::Tax]
        );
    }

    #[test]
    fn test_charge_only_from_open() {
        let mut invoice = invoice_with(vec![
            entry(EntrySource::Product).with_amount(Money::from_minor(100)),
        ]);
        invoice.mark_charged(Money::from_minor(100)).unwrap();

        let err = invoice.mark_charged(Money::from_minor(100)).unwrap_err();
        assert!(matches!(err, BillingError::StateTransition { .. }));
    }

    #[test]
    fn test_void_twice_is_error() {
        let mut invoice = invoice_with(vec![
            entry(EntrySource::Product).with_amount(Money::from_minor(100)),
        ]);
        invoice.mark_voided().unwrap();
        assert!(invoice.mark_voided().is_err());
    }

    #[test]
    fn test_paid_requires_charged() {
        let mut invoice = invoice_with(vec![
            entry(EntrySource::Product).with_amount(Money::from_minor(100)),
        ]);
        assert!(invoice.mark_paid().is_err());

        invoice.mark_charged(Money::from_minor(100)).unwrap();
        assert!(invoice.mark_paid().is_ok());
    }
}
