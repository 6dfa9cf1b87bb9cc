//! Billing domain ports
//!
//! The billing services depend on three collaborators, all injected
//! explicitly: a storage backend (`BillingStore`), the payment gateway
//! (`PaymentGateway`), and a background task dispatcher
//! (`TaskDispatcher`). Adapters live outside the domain; the in-memory
//! reference implementations are in the `infra_memstore` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_kernel::{
    AccountId, CouponId, DomainPort, EntryId, InvoiceId, Money, PaymentId, PaymentMethodId,
    PortError, ProductId, SubscriptionId, TransactionId,
};
use thiserror::Error;

use crate::account::Account;
use crate::coupon::Coupon;
use crate::entry::Entry;
use crate::invoice::Invoice;
use crate::payment::Payment;
use crate::payment_method::{PaymentMethod, PaymentMethodSnapshot};
use crate::product::Product;
use crate::subscription::Subscription;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Payment gateway
// ---------------------------------------------------------------------------

/// Machine-readable gateway failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    NotFound,
    Declined,
    Unavailable,
}

impl GatewayErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayErrorCode::NotFound => "not_found",
            GatewayErrorCode::Declined => "declined",
            GatewayErrorCode::Unavailable => "unavailable",
        }
    }
}

/// A normalized gateway failure
///
/// Adapters translate provider payloads into this; raw provider errors
/// never cross the port boundary.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
    pub message: String,
    pub code: Option<GatewayErrorCode>,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(GatewayErrorCode::NotFound),
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(GatewayErrorCode::Declined),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Some(GatewayErrorCode::NotFound)
    }
}

/// Customer details sent when creating a gateway customer
#[derive(Debug, Clone, Default)]
pub struct CustomerInfo {
    pub account_id: AccountId,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// A customer created at the gateway
#[derive(Debug, Clone)]
pub struct GatewayCustomer {
    pub id: String,
}

/// A charge accepted by the gateway
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    pub id: String,
    pub status: String,
}

/// The external payment processor
///
/// Every call is a blocking I/O boundary. Amounts are integer minor
/// units.
#[async_trait]
pub trait PaymentGateway: DomainPort {
    /// Name of the platform, recorded on accounts and instruments
    fn platform_name(&self) -> &str;

    async fn create_customer(&self, info: &CustomerInfo) -> Result<GatewayCustomer, GatewayError>;

    /// Vaults an instrument; `token` updates an existing one
    async fn save_payment_method(
        &self,
        customer_id: &str,
        token: Option<&str>,
        nonce: &str,
    ) -> Result<PaymentMethodSnapshot, GatewayError>;

    async fn delete_payment_method(&self, token: &str) -> Result<(), GatewayError>;

    async fn list_payment_methods(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PaymentMethodSnapshot>, GatewayError>;

    async fn send_payment(
        &self,
        amount: Money,
        payment_method_token: &str,
    ) -> Result<GatewayCharge, GatewayError>;

    async fn void_payment(&self, charge_id: &str) -> Result<(), GatewayError>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AccountRepository: DomainPort {
    async fn save_account(&self, account: &Account) -> Result<(), PortError>;
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, PortError>;
    /// Atomically increments the cached balance, returning the new value
    async fn adjust_balance(&self, id: AccountId, delta: Money) -> Result<Money, PortError>;
    async fn flag_needs_balancing(&self, id: AccountId, flag: bool) -> Result<(), PortError>;
    /// Accounts owing more than `floor` whose last attempt predates `attempted_before`
    async fn accounts_with_payable_debt(
        &self,
        floor: Money,
        attempted_before: DateTime<Utc>,
    ) -> Result<Vec<Account>, PortError>;
    async fn accounts_needing_balance(&self) -> Result<Vec<Account>, PortError>;
}

#[async_trait]
pub trait PaymentMethodRepository: DomainPort {
    async fn save_payment_method(&self, method: &PaymentMethod) -> Result<(), PortError>;
    async fn delete_payment_method(&self, id: PaymentMethodId) -> Result<(), PortError>;
    async fn find_payment_method(
        &self,
        id: PaymentMethodId,
    ) -> Result<Option<PaymentMethod>, PortError>;
    async fn find_payment_method_by_token(
        &self,
        token: &str,
    ) -> Result<Option<PaymentMethod>, PortError>;
    async fn payment_methods_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<PaymentMethod>, PortError>;
}

#[async_trait]
pub trait ProductRepository: DomainPort {
    async fn save_product(&self, product: &Product) -> Result<(), PortError>;
    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, PortError>;
    async fn find_product_by_key(&self, key: &str) -> Result<Option<Product>, PortError>;
}

#[async_trait]
pub trait EntryRepository: DomainPort {
    async fn save_entry(&self, entry: &Entry) -> Result<(), PortError>;
    async fn delete_entry(&self, id: EntryId) -> Result<(), PortError>;
    async fn find_entry(&self, id: EntryId) -> Result<Option<Entry>, PortError>;
    async fn entries_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<Entry>, PortError>;
    /// Valid entries still under their invoice limit
    async fn invoiceable_entries_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<Entry>, PortError>;
    async fn entries_for_coupon(&self, coupon_id: CouponId) -> Result<Vec<Entry>, PortError>;
}

#[async_trait]
pub trait CouponRepository: DomainPort {
    async fn save_coupon(&self, coupon: &Coupon) -> Result<(), PortError>;
    async fn find_coupon(&self, id: CouponId) -> Result<Option<Coupon>, PortError>;
    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, PortError>;
}

#[async_trait]
pub trait InvoiceRepository: DomainPort {
    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), PortError>;
    async fn find_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, PortError>;
    /// Charged (or later) invoices whose snapshot contains the entry
    async fn charged_invoices_with_entry(
        &self,
        entry_id: EntryId,
    ) -> Result<Vec<Invoice>, PortError>;
}

#[async_trait]
pub trait TransactionRepository: DomainPort {
    async fn save_transaction(&self, transaction: &Transaction) -> Result<(), PortError>;
    async fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, PortError>;
    async fn completed_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, PortError>;
    async fn completed_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Transaction>, PortError>;
    /// The idempotency guard's lookup
    async fn completed_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<Transaction>, PortError>;
    async fn completed_for_coupon(
        &self,
        coupon_id: CouponId,
    ) -> Result<Vec<Transaction>, PortError>;
}

#[async_trait]
pub trait PaymentRepository: DomainPort {
    async fn save_payment(&self, payment: &Payment) -> Result<(), PortError>;
    async fn find_payment(&self, id: PaymentId) -> Result<Option<Payment>, PortError>;
    async fn payments_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Payment>, PortError>;
}

#[async_trait]
pub trait SubscriptionRepository: DomainPort {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), PortError>;
    async fn find_subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, PortError>;
    async fn subscriptions_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Subscription>, PortError>;
    /// Active subscriptions whose period has lapsed
    async fn active_expired_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, PortError>;
}

/// The full storage collaborator the services are wired with
pub trait BillingStore:
    AccountRepository
    + PaymentMethodRepository
    + ProductRepository
    + EntryRepository
    + CouponRepository
    + InvoiceRepository
    + TransactionRepository
    + PaymentRepository
    + SubscriptionRepository
{
}

impl<T> BillingStore for T where
    T: AccountRepository
        + PaymentMethodRepository
        + ProductRepository
        + EntryRepository
        + CouponRepository
        + InvoiceRepository
        + TransactionRepository
        + PaymentRepository
        + SubscriptionRepository
{
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Ledger events announced to interested listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    TransactionCompleted(TransactionId),
    TransactionVoided(TransactionId),
    InvoiceCharged(InvoiceId),
    InvoiceVoided(InvoiceId),
    PaymentFailed(PaymentId),
}

/// Work scheduled for asynchronous execution
///
/// Delivery is at-least-once with no ordering guarantee, so every
/// handler must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingTask {
    /// Recompute an account balance from its transaction history
    ReconcileBalance { account_id: AccountId },
    /// Recount invoice usage for the entries an invoice snapshots
    RefreshEntryCounts { invoice_id: InvoiceId },
    /// Attempt an automatic payment against an account's debt
    AttemptPayment { account_id: AccountId },
    /// Fan out a ledger event to listeners
    Notify { event: LedgerEvent },
}

/// Fire-and-forget background task scheduling
#[async_trait]
pub trait TaskDispatcher: DomainPort {
    async fn schedule(&self, task: BillingTask) -> Result<(), PortError>;
}
