//! Billing Domain - Subscription Billing Ledger
//!
//! This crate implements the subscription-billing core: billable
//! entries rolled into invoices with ordered adjustments, an immutable
//! transaction ledger behind account balances, subscription renewal and
//! proration, coupon redemption constraints, and idempotent payment
//! recording against an external gateway.
//!
//! # Money flow
//!
//! Subscription accumulates entries -> invoice snapshots them and
//! computes ordered totals -> the invoice charges the account exactly
//! once -> the charge lands as a completed transaction -> the balance
//! moves, and a background reconciliation recomputes it from the full
//! ledger to absorb drift.
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingConfig, BillingServices};
//!
//! let services = BillingServices::new(store, gateway, dispatcher, BillingConfig::default());
//! let account = services.accounts.create_account().await?;
//! let subscription = services.subscriptions.subscribe(account.id, "basic").await?;
//! ```

pub mod account;
pub mod config;
pub mod coupon;
pub mod entry;
pub mod error;
pub mod invoice;
pub mod payment;
pub mod payment_method;
pub mod ports;
pub mod product;
pub mod services;
pub mod subscription;
pub mod transaction;

pub use account::{Account, BalanceState};
pub use config::BillingConfig;
pub use coupon::{Coupon, CouponState, CouponStyle};
pub use entry::{Entry, EntryContext, EntrySource, EntryState};
pub use error::{BillingError, BillingResult};
pub use invoice::{Invoice, InvoiceState, InvoiceTotals};
pub use payment::{Payment, PaymentState};
pub use payment_method::{PaymentMethod, PaymentMethodKind, PaymentMethodSnapshot};
pub use product::{PeriodUnit, Product};
pub use subscription::{Subscription, SubscriptionState};
pub use transaction::{Transaction, TransactionKind, TransactionState};

pub use services::{
    AccountService, BillingServices, CouponService, InvoiceService, LedgerService,
    PaymentService, SubscriptionService,
};
