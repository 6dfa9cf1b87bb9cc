//! The transaction ledger service
//!
//! Single writer for everything that moves an account balance. All
//! public operations serialize per account through a keyed async lock,
//! so two concurrent transactions for the same account can neither race
//! the fast-path balance increment nor interleave with a reconciliation
//! sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use core_kernel::{AccountId, Money, SubscriptionId, TransactionId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::account::Account;
use crate::config::BillingConfig;
use crate::coupon::Coupon;
use crate::error::{BillingError, BillingResult};
use crate::payment::Payment;
use crate::payment_method::PaymentMethod;
use crate::ports::{BillingStore, BillingTask, LedgerEvent, PaymentGateway, TaskDispatcher};
use crate::transaction::{Transaction, TransactionKind, TransactionState};

/// Options for entering a charge
#[derive(Debug, Default)]
pub struct ChargeOptions {
    pub description: Option<String>,
    pub invoice_id: Option<core_kernel::InvoiceId>,
    pub subscription_id: Option<SubscriptionId>,
    /// Initial state; completed by default
    pub state: Option<TransactionState>,
}

/// Options for entering a credit
#[derive(Debug, Default)]
pub struct CreditOptions {
    pub description: Option<String>,
    pub subscription_id: Option<SubscriptionId>,
    pub coupon_id: Option<core_kernel::CouponId>,
}

/// Keyed per-account locks
#[derive(Default)]
struct AccountLocks {
    inner: Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    async fn acquire(&self, account_id: AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("account lock map poisoned");
            map.entry(account_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Append-only record of money movement and the source of truth for
/// account balances
pub struct LedgerService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: BillingConfig,
    locks: AccountLocks,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            dispatcher,
            config,
            locks: AccountLocks::default(),
        }
    }

    /// Records an amount the account owes
    ///
    /// The transaction is completed immediately unless the caller asks
    /// for a different initial state (a gateway-pending charge, say).
    pub async fn enter_charge(
        &self,
        account_id: AccountId,
        amount: Money,
        opts: ChargeOptions,
    ) -> BillingResult<Transaction> {
        let _guard = self.locks.acquire(account_id).await;
        self.require_account(account_id).await?;

        let mut transaction = Transaction::new(
            TransactionKind::Charge,
            account_id,
            amount,
            opts.description.unwrap_or_else(|| "Charge".to_string()),
        );
        if let Some(invoice_id) = opts.invoice_id {
            transaction = transaction.for_invoice(invoice_id);
        }
        if let Some(subscription_id) = opts.subscription_id {
            transaction = transaction.for_subscription(subscription_id);
        }

        let target = opts.state.unwrap_or(TransactionState::Completed);
        if target == TransactionState::Completed {
            transaction.transition_to(TransactionState::Completed)?;
            self.record_completed(transaction).await
        } else {
            transaction.transition_to(target)?;
            self.store.save_transaction(&transaction).await?;
            Ok(transaction)
        }
    }

    /// Collects money through the gateway and records the movement
    ///
    /// On gateway failure the transaction is persisted in the error
    /// state and the balance is untouched.
    pub async fn enter_payment(
        &self,
        account_id: AccountId,
        method: &PaymentMethod,
        amount: Money,
    ) -> BillingResult<Transaction> {
        if !amount.is_positive() {
            return Err(BillingError::validation(
                "Cannot charge a non-positive amount",
            ));
        }
        let _guard = self.locks.acquire(account_id).await;
        self.require_account(account_id).await?;

        let mut transaction =
            Transaction::new(TransactionKind::Payment, account_id, amount, "Payment")
                .with_payment_method(method.snapshot());
        self.store.save_transaction(&transaction).await?;

        match self.gateway.send_payment(amount, &method.token).await {
            Ok(charge) => {
                transaction = transaction.with_ref_id(charge.id);
                transaction.transition_to(TransactionState::Completed)?;
                self.record_completed(transaction).await
            }
            Err(err) => {
                warn!(account = %account_id, error = %err, "gateway rejected payment");
                transaction.status = Some(err.message.clone());
                transaction.transition_to(TransactionState::Error)?;
                self.store.save_transaction(&transaction).await?;
                Err(err.into())
            }
        }
    }

    /// Records the ledger side of an already-completed payment
    ///
    /// The idempotency guard: a completed transaction already
    /// referencing this payment makes a second recording an error, so a
    /// payment can only ever move the balance once.
    pub async fn enter_completed_payment(&self, payment: &Payment) -> BillingResult<Transaction> {
        if !payment.is_completed() {
            return Err(BillingError::validation(
                "Only a completed payment can be entered into the ledger",
            ));
        }
        let _guard = self.locks.acquire(payment.account_id).await;
        self.require_account(payment.account_id).await?;

        if let Some(existing) = self.store.completed_for_payment(payment.id).await? {
            warn!(payment = %payment.id, transaction = %existing.id, "duplicate payment completion rejected");
            return Err(BillingError::DuplicateTransaction {
                payment_id: payment.id,
            });
        }

        let mut transaction = Transaction::new(
            TransactionKind::Payment,
            payment.account_id,
            payment.amount,
            payment.description.clone(),
        )
        .for_payment(payment.id)
        .with_payment_method(payment.payment_method.clone());
        if let Some(ref_id) = &payment.ref_id {
            transaction = transaction.with_ref_id(ref_id.clone());
        }
        transaction.transition_to(TransactionState::Completed)?;
        self.record_completed(transaction).await
    }

    /// Records a ledger-only reduction of debt
    pub async fn enter_credit(
        &self,
        account_id: AccountId,
        amount: Money,
        opts: CreditOptions,
    ) -> BillingResult<Transaction> {
        let _guard = self.locks.acquire(account_id).await;
        self.require_account(account_id).await?;

        let mut transaction = Transaction::new(
            TransactionKind::Credit,
            account_id,
            amount,
            opts.description.unwrap_or_else(|| "Credit".to_string()),
        );
        if let Some(subscription_id) = opts.subscription_id {
            transaction = transaction.for_subscription(subscription_id);
        }
        if let Some(coupon_id) = opts.coupon_id {
            transaction = transaction.for_coupon(coupon_id);
        }
        transaction.transition_to(TransactionState::Completed)?;
        self.record_completed(transaction).await
    }

    /// Records a refund entered outside the gateway
    pub async fn enter_manual_refund(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<String>,
    ) -> BillingResult<Transaction> {
        let _guard = self.locks.acquire(account_id).await;
        self.require_account(account_id).await?;

        let mut transaction = Transaction::new(
            TransactionKind::Refund,
            account_id,
            amount,
            description.unwrap_or_else(|| "Manual refund".to_string()),
        );
        transaction.transition_to(TransactionState::Completed)?;
        self.record_completed(transaction).await
    }

    /// Realizes an account-style coupon as a credit
    pub async fn enter_redeemed_coupon(
        &self,
        account_id: AccountId,
        coupon: &Coupon,
    ) -> BillingResult<Transaction> {
        if !coupon.is_transactionable() {
            return Err(BillingError::ineligible_coupon(
                "This coupon cannot be entered as a transaction",
            ));
        }
        let amount = coupon
            .amount
            .ok_or_else(|| {
                BillingError::validation("An account-style coupon needs a fixed amount")
            })?
            .abs();

        self.enter_credit(
            account_id,
            amount,
            CreditOptions {
                description: Some(format!("Coupon: {}", coupon.title)),
                coupon_id: Some(coupon.id),
                ..Default::default()
            },
        )
        .await
    }

    /// Voids a completed transaction
    ///
    /// Does not re-balance inline; the scheduled reconciliation absorbs
    /// the reversal.
    pub async fn void(&self, transaction_id: TransactionId) -> BillingResult<Transaction> {
        let mut transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Transaction", transaction_id))?;
        let _guard = self.locks.acquire(transaction.account_id).await;

        transaction.transition_to(TransactionState::Void)?;
        self.store.save_transaction(&transaction).await?;
        info!(transaction = %transaction.id, "transaction voided");

        self.store
            .flag_needs_balancing(transaction.account_id, true)
            .await?;
        self.dispatcher
            .schedule(BillingTask::ReconcileBalance {
                account_id: transaction.account_id,
            })
            .await?;
        self.dispatcher
            .schedule(BillingTask::Notify {
                event: LedgerEvent::TransactionVoided(transaction.id),
            })
            .await?;
        Ok(transaction)
    }

    /// Authoritative balance recompute from the full transaction history
    ///
    /// Sums every completed transaction for the account and overwrites
    /// the cached balance, correcting any drift from concurrent
    /// fast-path increments. Idempotent.
    pub async fn update_balance(&self, account_id: AccountId) -> BillingResult<Money> {
        let _guard = self.locks.acquire(account_id).await;
        let mut account = self.require_account(account_id).await?;

        let balance: Money = self
            .store
            .completed_for_account(account_id)
            .await?
            .iter()
            .map(Transaction::balance_effect)
            .sum();

        account.note_balance(balance, Utc::now(), self.config.grace_period_days);
        account.needs_balancing = false;
        self.store.save_account(&account).await?;
        Ok(balance)
    }

    async fn require_account(&self, account_id: AccountId) -> BillingResult<Account> {
        self.store
            .find_account(account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Account", account_id))
    }

    /// Persists a completed transaction and applies its fast-path
    /// balance effect. Callers must hold the account lock.
    async fn record_completed(&self, transaction: Transaction) -> BillingResult<Transaction> {
        debug_assert!(transaction.is_completed());
        self.store.save_transaction(&transaction).await?;

        let account_id = transaction.account_id;
        let balance = self
            .store
            .adjust_balance(account_id, transaction.balance_effect())
            .await?;
        if let Some(mut account) = self.store.find_account(account_id).await? {
            account.note_balance(balance, Utc::now(), self.config.grace_period_days);
            self.store.save_account(&account).await?;
        }
        self.store.flag_needs_balancing(account_id, true).await?;

        info!(
            transaction = %transaction.id,
            account = %account_id,
            kind = ?transaction.kind,
            amount = %transaction.amount,
            "transaction completed"
        );

        self.dispatcher
            .schedule(BillingTask::ReconcileBalance { account_id })
            .await?;
        self.dispatcher
            .schedule(BillingTask::Notify {
                event: LedgerEvent::TransactionCompleted(transaction.id),
            })
            .await?;
        Ok(transaction)
    }
}
