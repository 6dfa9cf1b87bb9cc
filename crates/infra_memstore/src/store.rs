//! In-memory billing store
//!
//! Reference implementation of the repository ports over RwLock-guarded
//! maps. Uniqueness constraints the persistence layer is expected to
//! enforce (payment method tokens, coupon codes) are checked here too,
//! so tests exercise the same conflicts a database would raise.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_kernel::{
    AccountId, CouponId, EntryId, InvoiceId, Money, PaymentId, PaymentMethodId, PortError,
    ProductId, SubscriptionId, TransactionId,
};

use domain_billing::account::Account;
use domain_billing::coupon::Coupon;
use domain_billing::entry::Entry;
use domain_billing::invoice::{Invoice, InvoiceState};
use domain_billing::payment::Payment;
use domain_billing::payment_method::PaymentMethod;
use domain_billing::ports::{
    AccountRepository, CouponRepository, EntryRepository, InvoiceRepository, PaymentRepository,
    PaymentMethodRepository, ProductRepository, SubscriptionRepository, TransactionRepository,
};
use domain_billing::product::Product;
use domain_billing::subscription::{Subscription, SubscriptionState};
use domain_billing::transaction::Transaction;

/// RwLock-guarded in-memory storage implementing every billing
/// repository
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
    payment_methods: RwLock<HashMap<PaymentMethodId, PaymentMethod>>,
    products: RwLock<HashMap<ProductId, Product>>,
    entries: RwLock<HashMap<EntryId, Entry>>,
    coupons: RwLock<HashMap<CouponId, Coupon>>,
    invoices: RwLock<HashMap<InvoiceId, Invoice>>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
    payments: RwLock<HashMap<PaymentId, Payment>>,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    fail_next_transaction_save: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `save_transaction` fail with an internal error,
    /// for exercising compensation paths in tests
    pub fn fail_next_transaction_save(&self) {
        self.fail_next_transaction_save.store(true, Ordering::SeqCst);
    }

    /// Test hook: mutate a stored subscription in place
    pub fn with_subscription_mut<F>(&self, id: SubscriptionId, f: F)
    where
        F: FnOnce(&mut Subscription),
    {
        let mut subscriptions = self.subscriptions.write().unwrap();
        if let Some(subscription) = subscriptions.get_mut(&id) {
            f(subscription);
        }
    }

    /// Test hook: mutate a stored account in place
    pub fn with_account_mut<F>(&self, id: AccountId, f: F)
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.accounts.write().unwrap();
        if let Some(account) = accounts.get_mut(&id) {
            f(account);
        }
    }

    /// All transactions, for test assertions
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.transactions.read().unwrap().values().cloned().collect()
    }
}

impl core_kernel::DomainPort for MemoryStore {}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn save_account(&self, account: &Account) -> Result<(), PortError> {
        self.accounts
            .write()
            .unwrap()
            .insert(account.id, account.clone());
        Ok(())
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, PortError> {
        Ok(self.accounts.read().unwrap().get(&id).cloned())
    }

    async fn adjust_balance(&self, id: AccountId, delta: Money) -> Result<Money, PortError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Account", id))?;
        account.balance += delta;
        Ok(account.balance)
    }

    async fn flag_needs_balancing(&self, id: AccountId, flag: bool) -> Result<(), PortError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("Account", id))?;
        account.needs_balancing = flag;
        Ok(())
    }

    async fn accounts_with_payable_debt(
        &self,
        floor: Money,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<Account>, PortError> {
        Ok(self
            .accounts
            .read()
            .unwrap()
            .values()
            .filter(|a| a.balance > floor)
            .filter(|a| {
                a.last_payment_attempted_at
                    .map_or(true, |at| at < attempted_before)
            })
            .cloned()
            .collect())
    }

    async fn accounts_needing_balance(&self) -> Result<Vec<Account>, PortError> {
        Ok(self
            .accounts
            .read()
            .unwrap()
            .values()
            .filter(|a| a.needs_balancing)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentMethodRepository for MemoryStore {
    async fn save_payment_method(&self, method: &PaymentMethod) -> Result<(), PortError> {
        let mut methods = self.payment_methods.write().unwrap();
        let duplicate = methods
            .values()
            .any(|m| m.token == method.token && m.id != method.id);
        if duplicate {
            return Err(PortError::conflict(format!(
                "payment method token {} already stored",
                method.token
            )));
        }
        methods.insert(method.id, method.clone());
        Ok(())
    }

    async fn delete_payment_method(&self, id: PaymentMethodId) -> Result<(), PortError> {
        self.payment_methods.write().unwrap().remove(&id);
        Ok(())
    }

    async fn find_payment_method(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PortError> {
        Ok(self.payment_methods.read().unwrap().get(&id).cloned())
    }

    async fn find_payment_method_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PaymentMethod>, PortError> {
        Ok(self
            .payment_methods
            .read()
            .unwrap()
            .values()
            .find(|m| m.token == token)
            .cloned())
    }

    async fn payment_methods_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<PaymentMethod>, PortError> {
        let mut methods: Vec<PaymentMethod> = self
            .payment_methods
            .read()
            .unwrap()
            .values()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect();
        methods.sort_by_key(|m| m.created_at);
        Ok(methods)
    }
}

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn save_product(&self, product: &Product) -> Result<(), PortError> {
        let mut products = self.products.write().unwrap();
        let duplicate = products
            .values()
            .any(|p| p.key == product.key && p.id != product.id);
        if duplicate {
            return Err(PortError::conflict(format!(
                "product key {} already taken",
                product.key
            )));
        }
        products.insert(product.id, product.clone());
        Ok(())
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, PortError> {
        Ok(self.products.read().unwrap().get(&id).cloned())
    }

    async fn find_product_by_key(&self, key: &str) -> Result<Option<Product>, PortError> {
        Ok(self
            .products
            .read()
            .unwrap()
            .values()
            .find(|p| p.key == key)
            .cloned())
    }
}

#[async_trait]
impl EntryRepository for MemoryStore {
    async fn save_entry(&self, entry: &Entry) -> Result<(), PortError> {
        self.entries.write().unwrap().insert(entry.id, entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, id: EntryId) -> Result<(), PortError> {
        self.entries.write().unwrap().remove(&id);
        Ok(())
    }

    async fn find_entry(&self, id: EntryId) -> Result<Option<Entry>, PortError> {
        Ok(self.entries.read().unwrap().get(&id).cloned())
    }

    async fn entries_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<Entry>, PortError> {
        let mut entries: Vec<Entry> = self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|e| e.subscription_id == Some(subscription_id))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn invoiceable_entries_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<Entry>, PortError> {
        Ok(self
            .entries_for_subscription(subscription_id)
            .await?
            .into_iter()
            .filter(Entry::is_invoiceable)
            .collect())
    }

    async fn entries_for_coupon(&self, coupon_id: CouponId) -> Result<Vec<Entry>, PortError> {
        Ok(self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|e| e.coupon_id == Some(coupon_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CouponRepository for MemoryStore {
    async fn save_coupon(&self, coupon: &Coupon) -> Result<(), PortError> {
        let mut coupons = self.coupons.write().unwrap();
        let duplicate = coupons
            .values()
            .any(|c| c.code == coupon.code && c.id != coupon.id);
        if duplicate {
            return Err(PortError::conflict(format!(
                "coupon code {} already taken",
                coupon.code
            )));
        }
        coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>, PortError> {
        Ok(self.coupons.read().unwrap().get(&id).cloned())
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, PortError> {
        Ok(self
            .coupons
            .read()
            .unwrap()
            .values()
            .find(|c| c.code == code)
            .cloned())
    }
}

#[async_trait]
impl InvoiceRepository for MemoryStore {
    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), PortError> {
        self.invoices
            .write()
            .unwrap()
            .insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, PortError> {
        Ok(self.invoices.read().unwrap().get(&id).cloned())
    }

    async fn charged_invoices_with_entry(
        &self,
        entry_id: EntryId,
    ) -> Result<Vec<Invoice>, PortError> {
        Ok(self
            .invoices
            .read()
            .unwrap()
            .values()
            .filter(|i| matches!(i.state, InvoiceState::Charged | InvoiceState::Paid))
            .filter(|i| i.entries.iter().any(|e| e.id == entry_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), PortError> {
        if self.fail_next_transaction_save.swap(false, Ordering::SeqCst) {
            return Err(PortError::internal("scripted transaction save failure"));
        }
        self.transactions
            .write()
            .unwrap()
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, PortError> {
        Ok(self.transactions.read().unwrap().get(&id).cloned())
    }

    async fn completed_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, PortError> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .read()
            .unwrap()
            .values()
            .filter(|t| t.account_id == account_id && t.is_completed())
            .cloned()
            .collect();
        transactions.sort_by_key(|t| t.created_at);
        Ok(transactions)
    }

    async fn completed_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Transaction>, PortError> {
        Ok(self
            .transactions
            .read()
            .unwrap()
            .values()
            .find(|t| t.invoice_id == Some(invoice_id) && t.is_completed())
            .cloned())
    }

    async fn completed_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<Transaction>, PortError> {
        Ok(self
            .transactions
            .read()
            .unwrap()
            .values()
            .find(|t| t.payment_id == Some(payment_id) && t.is_completed())
            .cloned())
    }

    async fn completed_for_coupon(
        &self,
        coupon_id: CouponId,
    ) -> Result<Vec<Transaction>, PortError> {
        Ok(self
            .transactions
            .read()
            .unwrap()
            .values()
            .filter(|t| t.coupon_id == Some(coupon_id) && t.is_completed())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn save_payment(&self, payment: &Payment) -> Result<(), PortError> {
        self.payments
            .write()
            .unwrap()
            .insert(payment.id, payment.clone());
        Ok(())
    }

    async fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>, PortError> {
        Ok(self.payments.read().unwrap().get(&id).cloned())
    }

    async fn payments_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Payment>, PortError> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .unwrap()
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), PortError> {
        self.subscriptions
            .write()
            .unwrap()
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, PortError> {
        Ok(self.subscriptions.read().unwrap().get(&id).cloned())
    }

    async fn subscriptions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Subscription>, PortError> {
        Ok(self
            .subscriptions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn active_expired_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PortError> {
        Ok(self
            .subscriptions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.state == SubscriptionState::Active && s.is_expired(now))
            .cloned()
            .collect())
    }
}
