//! Payment processing
//!
//! One attempt to move money through the gateway, wrapped with state
//! tracking and a compensating void. The happy path is entered ->
//! gateway charge -> completed -> ledger recording; if the recording
//! fails after the gateway accepted the charge, the charge is voided so
//! no money moves without a matching ledger row.

use std::sync::Arc;

use core_kernel::{AccountId, Money};
use tracing::{error, warn};

use crate::error::{BillingError, BillingResult};
use crate::payment::Payment;
use crate::payment_method::PaymentMethod;
use crate::ports::{BillingStore, BillingTask, LedgerEvent, PaymentGateway, TaskDispatcher};
use crate::services::ledger::LedgerService;

/// Message surfaced when processing dies after the gateway accepted the
/// charge; the raw failure stays in the logs.
const UNEXPECTED_FAILURE_STATUS: &str =
    "An unexpected error occurred processing this payment. Do not re-attempt; contact support.";

/// Drives single payment attempts through the gateway
pub struct PaymentService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<dyn TaskDispatcher>,
    ledger: Arc<LedgerService>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn TaskDispatcher>,
        ledger: Arc<LedgerService>,
    ) -> Self {
        Self {
            store,
            gateway,
            dispatcher,
            ledger,
        }
    }

    /// Attempts to collect `amount` from the account's instrument
    ///
    /// Produces at most one completed transaction; the ledger's
    /// idempotency guard enforces that for repeated completions of the
    /// same payment. A failed attempt leaves an error-state payment
    /// carrying the normalized gateway status.
    pub async fn send_payment(
        &self,
        account_id: AccountId,
        method: &PaymentMethod,
        amount: Money,
    ) -> BillingResult<Payment> {
        if !amount.is_positive() {
            return Err(BillingError::validation(
                "Cannot charge a non-positive amount",
            ));
        }
        if self.store.find_account(account_id).await?.is_none() {
            return Err(BillingError::not_found("Account", account_id));
        }

        let mut payment = Payment::new(account_id, amount, method.snapshot());
        self.store.save_payment(&payment).await?;

        let charge = match self.gateway.send_payment(amount, &method.token).await {
            Ok(charge) => charge,
            Err(err) => {
                warn!(payment = %payment.id, error = %err, "gateway rejected payment");
                payment.fail(err.message.clone());
                self.store.save_payment(&payment).await?;
                self.dispatcher
                    .schedule(BillingTask::Notify {
                        event: LedgerEvent::PaymentFailed(payment.id),
                    })
                    .await?;
                return Err(err.into());
            }
        };

        payment.complete(charge.id, charge.status)?;
        self.store.save_payment(&payment).await?;

        match self.ledger.enter_completed_payment(&payment).await {
            Ok(_) => Ok(payment),
            Err(err @ BillingError::DuplicateTransaction { .. }) => {
                // already on the ledger; the charge stands
                Err(err)
            }
            Err(err) => {
                error!(payment = %payment.id, error = %err, "recording payment failed, voiding gateway charge");
                if let Some(ref_id) = payment.ref_id.clone() {
                    if let Err(void_err) = self.gateway.void_payment(&ref_id).await {
                        error!(payment = %payment.id, error = %void_err, "compensating void failed");
                    }
                }
                payment.fail(UNEXPECTED_FAILURE_STATUS);
                self.store.save_payment(&payment).await?;
                self.dispatcher
                    .schedule(BillingTask::Notify {
                        event: LedgerEvent::PaymentFailed(payment.id),
                    })
                    .await?;
                Err(err)
            }
        }
    }
}
