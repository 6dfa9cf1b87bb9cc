//! Core Kernel - Foundational types and utilities for the billing system
//!
//! This crate provides the fundamental building blocks used across all
//! domain modules:
//! - Money in integer minor units with exact percent arithmetic
//! - Strongly-typed identifiers
//! - Port abstractions for the storage and gateway boundaries

pub mod error;
pub mod identifiers;
pub mod money;
pub mod ports;

pub use error::CoreError;
pub use identifiers::{
    AccountId, CouponId, EntryId, InvoiceId, PaymentId, PaymentMethodId, ProductId,
    SubscriptionId, TransactionId,
};
pub use money::{Money, MoneyError};
pub use ports::{DomainPort, PortError};
