//! Invoice orchestration
//!
//! Builds invoice snapshots, charges them to accounts exactly once, and
//! keeps per-entry invoice counts in step with the charged history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_kernel::InvoiceId;
use tracing::info;

use crate::error::{BillingError, BillingResult};
use crate::invoice::Invoice;
use crate::ports::{BillingStore, BillingTask, LedgerEvent, TaskDispatcher};
use crate::services::ledger::{ChargeOptions, LedgerService};
use crate::subscription::Subscription;
use crate::transaction::Transaction;

/// Builds, charges, and voids invoices
pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    ledger: Arc<LedgerService>,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        ledger: Arc<LedgerService>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            ledger,
        }
    }

    /// Snapshots a subscription's currently-invoiceable entries into a
    /// new open invoice for the given period
    pub async fn build_for_subscription(
        &self,
        subscription: &Subscription,
        description: impl Into<String>,
        period: (DateTime<Utc>, DateTime<Utc>),
    ) -> BillingResult<Invoice> {
        let entries = self
            .store
            .invoiceable_entries_for_subscription(subscription.id)
            .await?;
        let invoice = Invoice::from_entries(subscription.account_id, description, entries)
            .for_subscription(subscription.id)
            .with_period(period.0, period.1);
        self.store.save_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Charges an open invoice to its account, exactly once
    ///
    /// On success the invoice moves to charged and an asynchronous
    /// per-entry count refresh is scheduled. On failure the invoice
    /// stays open; retrying or voiding is the caller's decision.
    pub async fn charge_to_account(&self, invoice_id: InvoiceId) -> BillingResult<Transaction> {
        let mut invoice = self.require_invoice(invoice_id).await?;
        if !invoice.is_open() {
            return Err(BillingError::state_transition(invoice.state, "Charged"));
        }

        let totals = invoice.totals();
        let transaction = self
            .ledger
            .enter_charge(
                invoice.account_id,
                totals.total,
                ChargeOptions {
                    description: Some(invoice.description.clone()),
                    invoice_id: Some(invoice.id),
                    subscription_id: invoice.subscription_id,
                    state: None,
                },
            )
            .await?;

        invoice.mark_charged(totals.total)?;
        self.store.save_invoice(&invoice).await?;
        info!(invoice = %invoice.id, total = %totals.total, "invoice charged");

        self.dispatcher
            .schedule(BillingTask::RefreshEntryCounts {
                invoice_id: invoice.id,
            })
            .await?;
        self.dispatcher
            .schedule(BillingTask::Notify {
                event: LedgerEvent::InvoiceCharged(invoice.id),
            })
            .await?;
        Ok(transaction)
    }

    /// Voids an invoice, reversing its linked completed transaction
    ///
    /// Voiding an already-voided invoice is an error.
    pub async fn void(&self, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        let mut invoice = self.require_invoice(invoice_id).await?;
        invoice.mark_voided()?;

        if let Some(transaction) = self.store.completed_for_invoice(invoice_id).await? {
            self.ledger.void(transaction.id).await?;
        }

        self.store.save_invoice(&invoice).await?;
        self.dispatcher
            .schedule(BillingTask::Notify {
                event: LedgerEvent::InvoiceVoided(invoice.id),
            })
            .await?;
        Ok(invoice)
    }

    /// Marks a charged invoice as settled
    pub async fn mark_paid(&self, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        let mut invoice = self.require_invoice(invoice_id).await?;
        invoice.mark_paid()?;
        self.store.save_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Recounts invoice usage for every entry an invoice snapshots
    ///
    /// The count is recomputed from the charged history, so running the
    /// task twice (or late) converges on the same value.
    pub async fn refresh_entry_counts(&self, invoice_id: InvoiceId) -> BillingResult<()> {
        let invoice = self.require_invoice(invoice_id).await?;
        for entry_id in invoice.entry_ids() {
            let Some(mut entry) = self.store.find_entry(entry_id).await? else {
                continue;
            };
            let count = self.store.charged_invoices_with_entry(entry_id).await?.len();
            entry.invoiced_count = count as u32;
            entry.updated_at = Utc::now();
            self.store.save_entry(&entry).await?;
        }
        Ok(())
    }

    async fn require_invoice(&self, invoice_id: InvoiceId) -> BillingResult<Invoice> {
        self.store
            .find_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }
}
