//! Application services
//!
//! Each service takes its collaborators (store, gateway, dispatcher,
//! config) by explicit injection. `BillingServices::new` wires the full
//! set with a shared ledger so per-account serialization holds across
//! every entry point.

pub mod accounts;
pub mod coupons;
pub mod invoicing;
pub mod ledger;
pub mod payments;
pub mod subscriptions;

pub use accounts::AccountService;
pub use coupons::CouponService;
pub use invoicing::InvoiceService;
pub use ledger::{ChargeOptions, CreditOptions, LedgerService};
pub use payments::PaymentService;
pub use subscriptions::SubscriptionService;

use std::sync::Arc;

use tracing::warn;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::ports::{BillingStore, BillingTask, PaymentGateway, TaskDispatcher};

/// The fully wired service set
pub struct BillingServices {
    pub ledger: Arc<LedgerService>,
    pub invoices: Arc<InvoiceService>,
    pub payments: Arc<PaymentService>,
    pub coupons: Arc<CouponService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub accounts: Arc<AccountService>,
}

impl BillingServices {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: BillingConfig,
    ) -> Self {
        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            gateway.clone(),
            dispatcher.clone(),
            config.clone(),
        ));
        let invoices = Arc::new(InvoiceService::new(
            store.clone(),
            dispatcher.clone(),
            ledger.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            store.clone(),
            gateway.clone(),
            dispatcher.clone(),
            ledger.clone(),
        ));
        let coupons = Arc::new(CouponService::new(store.clone(), ledger.clone()));
        let subscriptions = Arc::new(SubscriptionService::new(
            store.clone(),
            config.clone(),
            ledger.clone(),
            invoices.clone(),
            coupons.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            store,
            gateway,
            dispatcher,
            config,
            ledger.clone(),
            payments.clone(),
            coupons.clone(),
        ));

        Self {
            ledger,
            invoices,
            payments,
            coupons,
            subscriptions,
            accounts,
        }
    }

    /// Executes one background task
    ///
    /// The dispatcher delivers at least once and unordered, so every
    /// branch here is idempotent: reconciliation recomputes from
    /// source, count refresh recounts from the charged history, and a
    /// payment attempt that finds nothing payable is a no-op.
    pub async fn run_task(&self, task: &BillingTask) -> BillingResult<()> {
        match task {
            BillingTask::ReconcileBalance { account_id } => {
                self.ledger.update_balance(*account_id).await?;
            }
            BillingTask::RefreshEntryCounts { invoice_id } => {
                self.invoices.refresh_entry_counts(*invoice_id).await?;
            }
            BillingTask::AttemptPayment { account_id } => {
                match self.accounts.enter_payment(*account_id, None).await {
                    Ok(_) => {}
                    // nothing payable, or no instrument yet; the next
                    // sweep will pick the account up again
                    Err(BillingError::InsufficientAmount { .. })
                    | Err(BillingError::Validation(_)) => {}
                    Err(err) => {
                        warn!(account = %account_id, error = %err, "scheduled payment attempt failed");
                        return Err(err);
                    }
                }
            }
            BillingTask::Notify { .. } => {
                // listeners are wired by the embedding application
            }
        }
        Ok(())
    }
}
