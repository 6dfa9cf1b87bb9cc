//! Account management
//!
//! Gateway customer provisioning, payment method lifecycle, automatic
//! payment attempts, and the background sweeps over delinquent and
//! drifted accounts.

use std::sync::Arc;

use chrono::{Duration, Utc};
use core_kernel::{AccountId, Money};
use tracing::{info, warn};

use crate::account::Account;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::payment::Payment;
use crate::payment_method::PaymentMethod;
use crate::ports::{BillingStore, BillingTask, CustomerInfo, PaymentGateway, TaskDispatcher};
use crate::services::coupons::CouponService;
use crate::services::ledger::LedgerService;
use crate::services::payments::PaymentService;
use crate::transaction::Transaction;

/// Account-level operations over the ledger, gateway, and coupons
pub struct AccountService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: BillingConfig,
    ledger: Arc<LedgerService>,
    payments: Arc<PaymentService>,
    coupons: Arc<CouponService>,
}

impl AccountService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: BillingConfig,
        ledger: Arc<LedgerService>,
        payments: Arc<PaymentService>,
        coupons: Arc<CouponService>,
    ) -> Self {
        Self {
            store,
            gateway,
            dispatcher,
            config,
            ledger,
            payments,
            coupons,
        }
    }

    /// Creates and persists a fresh account
    pub async fn create_account(&self) -> BillingResult<Account> {
        let account = Account::new();
        self.store.save_account(&account).await?;
        Ok(account)
    }

    /// Lazily provisions the gateway customer, returning its id
    pub async fn ensure_customer(&self, account_id: AccountId) -> BillingResult<String> {
        let mut account = self.require_account(account_id).await?;
        if let Some(customer_id) = &account.customer_id {
            return Ok(customer_id.clone());
        }

        let customer = self
            .gateway
            .create_customer(&CustomerInfo {
                account_id,
                ..Default::default()
            })
            .await?;
        account.customer_id = Some(customer.id.clone());
        account.platform = Some(self.gateway.platform_name().to_string());
        account.updated_at = Utc::now();
        self.store.save_account(&account).await?;
        Ok(customer.id)
    }

    /// Vaults an instrument at the gateway and mirrors it locally
    ///
    /// The first method an account saves becomes its default.
    pub async fn save_payment_method(
        &self,
        account_id: AccountId,
        nonce: &str,
    ) -> BillingResult<PaymentMethod> {
        let customer_id = self.ensure_customer(account_id).await?;
        let snapshot = self
            .gateway
            .save_payment_method(&customer_id, None, nonce)
            .await?;

        let method = PaymentMethod::from_snapshot(account_id, snapshot);
        self.store.save_payment_method(&method).await?;

        let mut account = self.require_account(account_id).await?;
        if account.default_payment_method_id.is_none() {
            account.default_payment_method_id = Some(method.id);
            account.updated_at = Utc::now();
            self.store.save_account(&account).await?;
        }
        Ok(method)
    }

    /// Deletes an instrument at the gateway and locally
    ///
    /// A gateway-side NOT_FOUND is tolerated so a half-deleted method
    /// can always be cleaned up. The account's default falls back to
    /// another owned method, or none.
    pub async fn delete_payment_method(
        &self,
        account_id: AccountId,
        token: &str,
    ) -> BillingResult<()> {
        let method = self
            .store
            .find_payment_method_by_token(token)
            .await?
            .ok_or_else(|| BillingError::not_found("PaymentMethod", token))?;
        if method.account_id != account_id {
            return Err(BillingError::validation(
                "Payment method belongs to another account",
            ));
        }

        if let Err(err) = self.gateway.delete_payment_method(token).await {
            if !err.is_not_found() {
                return Err(err.into());
            }
        }
        self.store.delete_payment_method(method.id).await?;

        let mut account = self.require_account(account_id).await?;
        if account.default_payment_method_id == Some(method.id) {
            let remaining = self
                .store
                .payment_methods_for_account(account_id)
                .await?;
            account.default_payment_method_id = remaining.first().map(|m| m.id);
            account.updated_at = Utc::now();
            self.store.save_account(&account).await?;
        }
        Ok(())
    }

    /// Re-mirrors the gateway's view of the account's instruments
    pub async fn refresh_payment_methods(
        &self,
        account_id: AccountId,
    ) -> BillingResult<Vec<PaymentMethod>> {
        let customer_id = self.ensure_customer(account_id).await?;
        let snapshots = self.gateway.list_payment_methods(&customer_id).await?;

        let existing = self.store.payment_methods_for_account(account_id).await?;
        for stale in existing
            .iter()
            .filter(|m| !snapshots.iter().any(|s| s.token == m.token))
        {
            self.store.delete_payment_method(stale.id).await?;
        }
        let mut methods = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            match existing.iter().find(|m| m.token == snapshot.token) {
                Some(known) => methods.push(known.clone()),
                None => {
                    let method = PaymentMethod::from_snapshot(account_id, snapshot);
                    self.store.save_payment_method(&method).await?;
                    methods.push(method);
                }
            }
        }
        Ok(methods)
    }

    /// Attempts to pay down the account's balance
    ///
    /// Defaults the amount to the freshly reconciled balance. Refuses
    /// amounts at or below the payment floor and accounts without a
    /// stored instrument.
    pub async fn enter_payment(
        &self,
        account_id: AccountId,
        amount: Option<Money>,
    ) -> BillingResult<Payment> {
        let mut account = self.require_account(account_id).await?;
        account.last_payment_attempted_at = Some(Utc::now());
        self.store.save_account(&account).await?;

        let amount = match amount {
            Some(amount) => amount,
            None => self.ledger.update_balance(account_id).await?,
        };
        if amount <= self.config.payment_floor {
            return Err(BillingError::InsufficientAmount {
                minimum: self.config.payment_floor,
            });
        }

        let method = self
            .default_payment_method(&account)
            .await?
            .ok_or_else(|| {
                BillingError::validation("Account must have a valid payment method")
            })?;

        self.payments.send_payment(account_id, &method, amount).await
    }

    /// Redeems an account-style coupon as a credit
    pub async fn redeem_coupon(
        &self,
        account_id: AccountId,
        code: &str,
    ) -> BillingResult<Transaction> {
        self.require_account(account_id).await?;
        self.coupons.redeem_for_account(account_id, code).await
    }

    /// Schedules payment attempts for accounts owing more than the
    /// floor whose cooldown has lapsed. Returns how many were queued.
    pub async fn process_unbilled_accounts(&self) -> BillingResult<usize> {
        let cutoff = Utc::now() - Duration::hours(self.config.payment_retry_cooldown_hours);
        let accounts = self
            .store
            .accounts_with_payable_debt(self.config.payment_floor, cutoff)
            .await?;
        for account in &accounts {
            info!(account = %account.id, balance = %account.balance, "queueing payment attempt");
            self.dispatcher
                .schedule(BillingTask::AttemptPayment {
                    account_id: account.id,
                })
                .await?;
        }
        Ok(accounts.len())
    }

    /// Authoritative recompute for every account flagged as drifted
    pub async fn process_accounts_needing_balance(&self) -> BillingResult<usize> {
        let accounts = self.store.accounts_needing_balance().await?;
        for account in &accounts {
            self.ledger.update_balance(account.id).await?;
        }
        Ok(accounts.len())
    }

    /// Idempotent repair: enters any completed payment that never got
    /// its ledger row, e.g. after a crash between gateway success and
    /// recording. Returns how many rows were added.
    pub async fn ensure_payment_transactions(
        &self,
        account_id: AccountId,
    ) -> BillingResult<usize> {
        let payments = self.store.payments_for_account(account_id).await?;
        let mut repaired = 0;
        for payment in payments.iter().filter(|p| p.is_completed()) {
            match self.ledger.enter_completed_payment(payment).await {
                Ok(_) => repaired += 1,
                Err(BillingError::DuplicateTransaction { .. }) => {}
                Err(err) => {
                    warn!(payment = %payment.id, error = %err, "payment repair failed");
                    return Err(err);
                }
            }
        }
        Ok(repaired)
    }

    async fn default_payment_method(
        &self,
        account: &Account,
    ) -> BillingResult<Option<PaymentMethod>> {
        if let Some(id) = account.default_payment_method_id {
            if let Some(method) = self.store.find_payment_method(id).await? {
                return Ok(Some(method));
            }
        }
        let methods = self.store.payment_methods_for_account(account.id).await?;
        Ok(methods.into_iter().next())
    }

    async fn require_account(&self, account_id: AccountId) -> BillingResult<Account> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Account", account_id))
    }
}
